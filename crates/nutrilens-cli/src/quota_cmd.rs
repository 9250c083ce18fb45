//! `nutrilens quota`: usage counters from the persisted ledger.

use anyhow::Result;
use colored::Colorize;

use nutrilens_core::config::load_config;
use nutrilens_core::quota::{QuotaRecord, QuotaReport};

use crate::wiring;

/// Run the quota command.
pub fn run(json: bool) -> Result<()> {
    let config = load_config(None);
    let ledger = wiring::open_ledger(&config)?;
    let report = ledger.report();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn format_usage(record: &QuotaRecord) -> String {
    match record.limit {
        Some(limit) => format!("{}/{}", record.count, limit),
        None => format!("{} (uncapped)", record.count),
    }
}

fn print_report(report: &QuotaReport) {
    println!();
    println!("{}", "🍽  NutriLens Quota".cyan().bold());
    println!();

    if report.backends.is_empty() {
        println!("  {}", "· no remote calls recorded yet".dimmed());
        println!();
        return;
    }

    for backend in &report.backends {
        let state = if backend.exhausted_today {
            "exhausted today".red().to_string()
        } else {
            "✓".green().to_string()
        };
        println!("  {:<18} {}", format!("{}:", backend.backend_id).bold(), state);
        println!(
            "    {:<16} {}  {}",
            format!("day {}", backend.day.period_key),
            format_usage(&backend.day),
            format!("resets {}", backend.day.reset_at.format("%Y-%m-%d %H:%M UTC")).dimmed()
        );
        println!(
            "    {:<16} {}  {}",
            format!("month {}", backend.month.period_key),
            format_usage(&backend.month),
            format!("resets {}", backend.month.reset_at.format("%Y-%m-%d %H:%M UTC")).dimmed()
        );
        for bucket in backend.day_history.iter().rev().take(7) {
            println!(
                "    {}",
                format!("{:<16} {} calls, {} ok", bucket.period_key, bucket.count, bucket.successes).dimmed()
            );
        }
    }
    println!();
}
