//! sigview - aggregate node metric events into dashboard snapshots
//!
//! Reads commands from stdin (see [`sigview::command`]), feeds them through
//! the update pipeline, and prints every dispatched snapshot as one JSON
//! line on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use sigview::command::{Command, ParseError};
use sigview::config::AppConfig;
use sigview::{Snapshot, UpdatePipeline};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for logging (respects RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration from CLI, environment, and config file
    let app_config = AppConfig::load()?;
    info!("Starting with {:?}", app_config.pipeline);

    let (tx, rx) = mpsc::unbounded_channel();
    let (handle, worker) = UpdatePipeline::spawn(&app_config.pipeline, tx)?;
    if !app_config.visible {
        handle.set_visible(false);
    }

    let printer = tokio::spawn(print_snapshots(rx, app_config.pretty));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0u64;
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        line_no += 1;
        match line.parse::<Command>() {
            Ok(command) => {
                if let Err(e) = command.apply(&handle) {
                    warn!("line {}: {}", line_no, e);
                }
            }
            Err(ParseError::Empty) => {}
            Err(e) => warn!("line {}: {}", line_no, e),
        }
    }

    // Drain what is queued, then let the printer see the closed channel
    handle.shutdown();
    drop(handle);
    worker.await.context("Pipeline worker failed")?;
    printer.await.context("Snapshot printer failed")??;

    Ok(())
}

/// Write each snapshot as JSON to stdout
async fn print_snapshots(mut rx: mpsc::UnboundedReceiver<Snapshot>, pretty: bool) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut count = 0u64;

    while let Some(snapshot) = rx.recv().await {
        let mut json = if pretty {
            serde_json::to_string_pretty(&snapshot)?
        } else {
            serde_json::to_string(&snapshot)?
        };
        json.push('\n');
        stdout.write_all(json.as_bytes()).await?;
        stdout.flush().await?;
        count += 1;
    }

    info!("Printed {} snapshots", count);
    Ok(())
}
