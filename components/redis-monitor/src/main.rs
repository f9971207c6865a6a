//! Polls Redis instances for `INFO` status and indexes one snapshot document
//! per instance into a daily Elasticsearch index.

mod cli;
mod helpers;
mod instrumentation;
mod metrics;
mod parser;
mod poller;
mod runtime;
mod shipper;
mod snapshot;

use clap::Parser;
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = cli::cli::Cli::parse();

    // Keep the file writer guard alive until exit so buffered lines are flushed
    let _log_guard = match instrumentation::tracing::init_tracing(&cli.log_options()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to install tracing subscriber: {e}");
            return ExitCode::FAILURE;
        }
    };
    instrumentation::tracing::init_panic_handler();

    // Main entrypoint simply delegates control to CLI layer.
    match cli::cli::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "redis-monitor stopped on a fatal error");
            ExitCode::FAILURE
        }
    }
}
