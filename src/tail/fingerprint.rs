//! Tail-line fingerprinting for change detection.
//!
//! A fingerprint is the first [`FINGERPRINT_LEN`] characters of the last line
//! of a log snapshot. With timestamped logs that prefix is the timestamp of the
//! newest entry, so comparing fingerprints is enough to tell whether new output
//! arrived. Two different tail lines sharing the same prefix compare equal.

/// Default fingerprint budget in characters.
pub const FINGERPRINT_LEN: usize = 30;

/// Select the last line of a snapshot.
///
/// A trailing newline leaves an empty final element after splitting; in that
/// case the element before it is the last line.
pub fn last_line(snapshot: &str) -> &str {
    let mut lines = snapshot.rsplit('\n');
    let last = lines.next().unwrap_or("");
    if last.is_empty() {
        if let Some(previous) = lines.next() {
            return previous;
        }
    }
    last
}

/// Bounded prefix of a snapshot's last line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LogFingerprint(String);

impl LogFingerprint {
    /// Fingerprint `snapshot` with a budget of `len` characters.
    ///
    /// Lines shorter than the budget yield the empty fingerprint.
    pub fn of(snapshot: &str, len: usize) -> Self {
        let line = last_line(snapshot);
        if line.chars().count() < len {
            return Self::default();
        }
        Self(line.chars().take(len).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Fingerprints seen and emitted by one polling loop.
#[derive(Debug, Clone, Default)]
pub struct PollState {
    last_observed: LogFingerprint,
    last_emitted: LogFingerprint,
}

impl PollState {
    /// Record a poll result. Returns `true` when a notification is due.
    ///
    /// Empty fingerprints never replace the last observed one.
    pub fn observe(&mut self, fingerprint: LogFingerprint) -> bool {
        if !fingerprint.is_empty() {
            self.last_observed = fingerprint;
        }

        if self.last_observed.is_empty() || self.last_observed == self.last_emitted {
            return false;
        }

        self.last_emitted = self.last_observed.clone();
        true
    }

    pub fn last_observed(&self) -> &LogFingerprint {
        &self.last_observed
    }

    pub fn last_emitted(&self) -> &LogFingerprint {
        &self.last_emitted
    }
}
