//! advlock: drive the advisory lock engine from the command line.
//!
//! This is the main entry point for the `advlock` CLI. It sets up logging,
//! parses arguments, dispatches to the appropriate command handler, and
//! exits with the errno of a failed request.

mod cli;
mod commands;

use cli::Cli;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,advlock=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse_args();

    match commands::dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Print user-actionable error message to stderr
            eprintln!("Error: {}", err);

            ExitCode::from(err.errno() as u8)
        }
    }
}
