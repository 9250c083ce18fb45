//! `nutrilens recognize`: identify the food in one photo.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use nutrilens_core::config::load_config;
use nutrilens_core::types::ImageRef;

use crate::{helpers, wiring};

/// Run the recognize command.
pub async fn run(image: PathBuf, json: bool) -> Result<()> {
    let config = load_config(None);
    let runtime = wiring::build(&config)?;

    let flusher = runtime.flusher.clone();
    let flush_task = tokio::spawn(async move { flusher.start().await });

    let request_id = Uuid::new_v4();
    let image = ImageRef::new(image);
    let span = info_span!("recognize", request_id = %request_id);

    // Ctrl+C drops the in-flight call; an unanswered request is never charged.
    let outcome = tokio::select! {
        result = runtime.orchestrator.recognize(&image).instrument(span) => Some(result),
        _ = tokio::signal::ctrl_c() => {
            info!(request_id = %request_id, "recognition cancelled");
            None
        }
    };

    runtime.flusher.stop();
    if let Err(e) = flush_task.await {
        warn!(error = %e, "ledger flusher task failed");
    }

    let Some(result) = outcome else {
        println!("  {}", "Cancelled.".dimmed());
        return Ok(());
    };
    let result = result.context("recognition failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        helpers::print_result(&result);
    }

    Ok(())
}
