use dockhand::cli::{Args, host};
use dockhand::env;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("dockhand=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env::DEFAULT_LOG_FILTER))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting dockhand {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = host::run(args).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
