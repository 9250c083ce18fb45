//! `nutrilens status`: show configuration and backend availability.
//!
//! - Shows config path and state directory
//! - Shows the remote backend, its key status, models and caps
//! - Probes each backend without charging anything

use anyhow::Result;
use colored::Colorize;

use nutrilens_core::config::{get_config_path, load_config};
use nutrilens_providers::registry::BACKENDS;

use crate::wiring;

fn mark(ok: bool) -> String {
    if ok {
        "✓".green().to_string()
    } else {
        "✗".red().to_string()
    }
}

fn cap(limit: u32) -> String {
    if limit == 0 {
        "uncapped".to_string()
    } else {
        limit.to_string()
    }
}

/// This build links no captioning model, so an enabled in-process backend
/// always falls through.
fn in_process_label(enabled: bool) -> String {
    if enabled {
        format!("enabled {}", "(no model linked)".yellow())
    } else {
        format!("{}", "· disabled".dimmed())
    }
}

/// Run the status command.
pub async fn run() -> Result<()> {
    let config = load_config(None);
    let config_path = get_config_path();

    println!();
    println!("{}", "🍽  NutriLens Status".cyan().bold());
    println!();

    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        config_path.display(),
        if config_path.exists() {
            "✓".green().to_string()
        } else {
            "(not found)".red().to_string()
        }
    );
    println!(
        "  {:<18} {}",
        "State:".bold(),
        wiring::state_dir(&config).display()
    );

    // Remote
    println!();
    let remote = &config.remote;
    let key_status = if remote.is_configured() {
        format!("{} (key set)", "✓".green())
    } else {
        format!("{}", "· not configured".dimmed())
    };
    let display_name = BACKENDS
        .iter()
        .find(|b| b.name == remote.backend)
        .map(|b| b.display_name)
        .unwrap_or(remote.backend.as_str());
    println!("  {:<18} {} {}", "Remote:".bold(), display_name, key_status);
    if !remote.models.is_empty() {
        println!("  {:<18} {}", "Models:".bold(), remote.models.join(", "));
    }
    println!(
        "  {:<18} {}",
        "Caps:".bold(),
        format!(
            "daily: {} | monthly: {}",
            cap(config.quota.daily_limit),
            cap(config.quota.monthly_limit)
        )
        .dimmed()
    );

    // Local
    println!();
    let on_device = if config.on_device.enabled {
        config.on_device.endpoint.clone()
    } else {
        format!("{}", "· disabled".dimmed())
    };
    println!("  {:<18} {}", "On-device:".bold(), on_device);
    println!(
        "  {:<18} {}",
        "In-process:".bold(),
        in_process_label(config.in_process.enabled)
    );

    // Live availability
    println!();
    let runtime = match wiring::build(&config) {
        Ok(runtime) => runtime,
        Err(e) => {
            println!("  {} {:#}", "✗".red(), e);
            println!();
            return Ok(());
        }
    };
    let status = runtime.orchestrator.get_status().await;

    println!("  {:<18} {}", "Online:".bold(), mark(status.online));
    let remote_line = match (&status.remote_blocked_reason, status.remote_remaining) {
        (Some(reason), _) => format!("{} {}", mark(false), reason.dimmed()),
        (None, Some(remaining)) => format!("{} {} calls left today", mark(status.remote_available), remaining),
        (None, None) => mark(status.remote_available),
    };
    println!("  {:<18} {}", "Remote ready:".bold(), remote_line);
    println!("  {:<18} {}", "On-device ready:".bold(), mark(status.on_device_available));
    println!("  {:<18} {}", "In-process ready:".bold(), mark(status.in_process_available));
    println!(
        "  {:<18} {}",
        "Recommended:".bold(),
        status
            .recommended_backend
            .as_deref()
            .unwrap_or("manual entry")
            .cyan()
    );
    println!();

    Ok(())
}
