mod app;
mod cli;
mod error;
mod signal;
mod telemetry;

use crate::cli::Args;
use crate::telemetry::LogOptions;
use clap::Parser;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let logging = LogOptions { verbose: args.verbose, silent: args.silent, json: args.json_logs };
    if let Err(e) = telemetry::init_tracing(logging) {
        eprintln!("regsync: {e:?}");
        return ExitCode::FAILURE;
    }

    let shutdown = CancellationToken::new();
    signal::cancel_on_signal(shutdown.clone());
    match app::run(args, shutdown).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:?}");
            ExitCode::FAILURE
        },
    }
}
