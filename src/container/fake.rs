//! In-memory runtime used by unit tests.

use crate::container::{
    ContainerError, ContainerInfo, ExecChannel, ExecStatus, ImageInfo, Result, RuntimeApi,
};
use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::stream::{Stream, StreamExt};
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

/// Scripted runtime. Log fetches pop from `logs`; once the script is empty
/// the last successful snapshot is returned again.
#[derive(Default)]
pub(crate) struct FakeRuntime {
    logs: Mutex<VecDeque<Result<String>>>,
    last_logs: Mutex<String>,
    containers: Mutex<Vec<ContainerInfo>>,
    channels: Mutex<VecDeque<ExecChannel>>,
    pub fail_list: AtomicBool,
    pub fail_create_exec: AtomicBool,
    pub fail_attach: AtomicBool,
    pub fail_inspect: AtomicBool,
    pub exec_exited: AtomicBool,
    pub fetch_calls: AtomicUsize,
    pub create_exec_calls: AtomicUsize,
    pub inspect_calls: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_logs(&self, text: &str) {
        self.logs.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn push_log_error(&self) {
        self.logs
            .lock()
            .unwrap()
            .push_back(Err(ContainerError::Other("log fetch failed".to_string())));
    }

    pub fn set_containers(&self, containers: Vec<ContainerInfo>) {
        *self.containers.lock().unwrap() = containers;
    }

    /// Queue a channel for the next `attach_exec` and return its remote end.
    pub fn expect_exec(&self) -> FakeRemote {
        let (channel, remote) = FakeRemote::pair();
        self.channels.lock().unwrap().push_back(channel);
        remote
    }
}

#[async_trait]
impl RuntimeApi for FakeRuntime {
    async fn list_images(&self) -> Result<Vec<ImageInfo>> {
        Ok(vec![ImageInfo {
            id: "sha256:fake".to_string(),
            repo_tags: vec!["alpine:latest".to_string()],
            size: 7_000_000,
            created: 1_700_000_000,
        }])
    }

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(ContainerError::Other("list failed".to_string()));
        }
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn create_and_start_container(&self, image: &str) -> Result<String> {
        Ok(format!("container-{}", image))
    }

    async fn stop_container(&self, _container_id: &str) -> Result<()> {
        Ok(())
    }

    async fn fetch_logs(&self, _container_id: &str, _timestamps: bool) -> Result<String> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.logs.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => {
                *self.last_logs.lock().unwrap() = text.clone();
                Ok(text)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last_logs.lock().unwrap().clone()),
        }
    }

    async fn create_exec(&self, container_id: &str, _cmd: &[String], _tty: bool) -> Result<String> {
        self.create_exec_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create_exec.load(Ordering::SeqCst) {
            return Err(ContainerError::NotFound(container_id.to_string()));
        }
        Ok(format!("exec-{}", container_id))
    }

    async fn attach_exec(&self, _exec_id: &str, _tty: bool) -> Result<ExecChannel> {
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(ContainerError::ExecError("attach refused".to_string()));
        }
        Ok(self
            .channels
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| FakeRemote::pair().0))
    }

    async fn inspect_exec(&self, _exec_id: &str) -> Result<ExecStatus> {
        self.inspect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_inspect.load(Ordering::SeqCst) {
            return Err(ContainerError::ExecError("inspect failed".to_string()));
        }
        let exited = self.exec_exited.load(Ordering::SeqCst);
        Ok(ExecStatus {
            running: !exited,
            exit_code: exited.then_some(0),
        })
    }
}

/// Remote side of a fake exec connection.
pub(crate) struct FakeRemote {
    output_tx: Option<fmpsc::UnboundedSender<Result<Vec<u8>>>>,
    pub written: Arc<Mutex<Vec<u8>>>,
    pub input_shutdowns: Arc<AtomicUsize>,
    pub input_releases: Arc<AtomicUsize>,
    pub output_releases: Arc<AtomicUsize>,
}

impl FakeRemote {
    fn pair() -> (ExecChannel, FakeRemote) {
        let (tx, rx) = fmpsc::unbounded();
        let written = Arc::new(Mutex::new(Vec::new()));
        let input_shutdowns = Arc::new(AtomicUsize::new(0));
        let input_releases = Arc::new(AtomicUsize::new(0));
        let output_releases = Arc::new(AtomicUsize::new(0));

        let channel = ExecChannel {
            output: TrackedStream {
                inner: rx,
                releases: output_releases.clone(),
            }
            .boxed(),
            input: Box::pin(RecordingWriter {
                buf: written.clone(),
                shutdowns: input_shutdowns.clone(),
                releases: input_releases.clone(),
            }),
        };

        let remote = FakeRemote {
            output_tx: Some(tx),
            written,
            input_shutdowns,
            input_releases,
            output_releases,
        };
        (channel, remote)
    }

    pub fn send_output(&self, bytes: &[u8]) {
        if let Some(tx) = &self.output_tx {
            let _ = tx.unbounded_send(Ok(bytes.to_vec()));
        }
    }

    pub fn send_read_error(&self) {
        if let Some(tx) = &self.output_tx {
            let _ = tx.unbounded_send(Err(ContainerError::IoError(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))));
        }
    }

    pub fn close_output(&mut self) {
        self.output_tx.take();
    }

    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written.lock().unwrap()).into_owned()
    }

    /// Total number of connection halves released so far.
    pub fn releases(&self) -> usize {
        self.input_releases.load(Ordering::SeqCst) + self.output_releases.load(Ordering::SeqCst)
    }
}

struct TrackedStream<S> {
    inner: S,
    releases: Arc<AtomicUsize>,
}

impl<S: Stream + Unpin> Stream for TrackedStream<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for TrackedStream<S> {
    fn drop(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

struct RecordingWriter {
    buf: Arc<Mutex<Vec<u8>>>,
    shutdowns: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl AsyncWrite for RecordingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

impl Drop for RecordingWriter {
    fn drop(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
