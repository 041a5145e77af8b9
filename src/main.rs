//! swrcache - stale-while-revalidate cache demos
//!
//! Runs the cache against simulated producers: a flaky single-key producer,
//! a paginated listing indexer, and a random-walk price feed.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use swrcache::app;
use swrcache::cli::Cli;

/// Sets up log output on stderr so stdout stays clean for demo output
fn setup_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_tracing(&cli.log_level);

    match app::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
