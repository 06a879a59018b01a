#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;
mod input;
mod report;

use std::process;

use anyhow::Context;
use colloquy_engine::{LlmBackend, RemoteLlmBackend};

use crate::config::Cli;
use crate::report::BatchReport;

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "colloquy_cli::startup";
pub const TRACING_TARGET_SHUTDOWN: &str = "colloquy_cli::shutdown";
pub const TRACING_TARGET_CONFIG: &str = "colloquy_cli::config";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        tracing::info!(
            target: TRACING_TARGET_SHUTDOWN,
            "application terminated successfully"
        );
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            error = %format!("{error:#}"),
            "application terminated with error"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();

    Cli::init_tracing();
    cli.log();
    cli.validate()?;

    let sequences = input::read_sequences(&cli.io.input)
        .await
        .context("failed to load prompt sequences")?;

    tracing::info!(
        target: TRACING_TARGET_STARTUP,
        sequences = sequences.len(),
        "prompt sequences loaded"
    );

    let mut backend = RemoteLlmBackend::new(cli.llm.clone()).context("invalid llm configuration")?;
    backend
        .setup()
        .await
        .context("failed to set up remote backend")?;

    let outcome = backend.complete_batch(&sequences).await;
    if let Err(err) = backend.teardown().await {
        tracing::warn!(
            target: TRACING_TARGET_SHUTDOWN,
            error = %err,
            "failed to release remote backend"
        );
    }
    let outcome = outcome.context("batch failed")?;

    BatchReport::from(&outcome)
        .write(cli.io.output.as_deref(), cli.io.pretty)
        .await?;

    Ok(())
}
