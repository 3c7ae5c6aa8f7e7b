mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::error::CliError;

const LOG_ENV: &str = "RATEFETCH_LOG";

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();

    let report = commands::run(&cli).await?;
    output::render(&report, cli.pretty)?;

    if cli.strict && !report.is_complete() {
        return Err(CliError::StrictModeViolation {
            lost_pages: report.meta.lost_pages.len(),
            missing_ids: report.meta.missing_ids.len(),
            truncated: report.meta.truncated,
        });
    }

    if !report.is_complete() {
        return Ok(ExitCode::from(3));
    }

    Ok(ExitCode::SUCCESS)
}
