//! conveyor CLI.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use conveyor::{Cli, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.execute().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "conveyor failed");
            eprintln!("Error: {}", snafu::Report::from_error(e));
            ExitCode::FAILURE
        }
    }
}
