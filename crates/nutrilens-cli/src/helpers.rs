//! Shared CLI helpers: path expansion and result printing.

use std::path::PathBuf;

use colored::Colorize;

use nutrilens_core::types::{AttemptStatus, Confidence, RecognitionItem, RecognitionResult};

/// Expand `~` at the start of a path to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_next::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs_next::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// One-line nutrition summary for an item.
pub fn format_item(item: &RecognitionItem) -> String {
    format!(
        "{} ({}, {}g): {} kcal | P {}g  C {}g  F {}g",
        item.name, item.portion_description, item.portion_grams, item.calories, item.protein, item.carbs, item.fat
    )
}

fn confidence_label(confidence: Confidence) -> String {
    match confidence {
        Confidence::High => "high".green().to_string(),
        Confidence::Medium => "medium".yellow().to_string(),
        Confidence::Low => "low".red().to_string(),
    }
}

/// Print a recognition result for humans.
pub fn print_result(result: &RecognitionResult) {
    println!();
    println!("{}", "🍽  NutriLens".cyan().bold());
    println!();

    if result.is_manual() {
        println!(
            "  {} {}",
            "✗".red(),
            result.explanation.as_deref().unwrap_or("Could not identify the food.")
        );
    } else {
        for item in &result.items {
            println!("  {} {}", "•".cyan(), format_item(item));
        }
        if result.is_multi_item {
            let t = &result.totals;
            println!(
                "  {:<12} {} kcal | P {}g  C {}g  F {}g",
                "Total:".bold(),
                t.calories,
                t.protein,
                t.carbs,
                t.fat
            );
        }
        println!();
        println!(
            "  {:<12} {}  via {}",
            "Confidence:".bold(),
            confidence_label(result.confidence),
            result.backend_id.as_deref().unwrap_or("-")
        );
        if !result.description.is_empty() {
            println!("  {:<12} {}", "Seen:".bold(), result.description.dimmed());
        }
    }

    if let Some(warning) = &result.warning {
        println!("  {} {}", "⚠".yellow(), warning.yellow());
    }

    if !result.attempts.is_empty() {
        println!();
        println!("  {}", "Attempts:".bold());
        for attempt in &result.attempts {
            let mark = if attempt.status == AttemptStatus::Success {
                "✓".green()
            } else {
                "·".dimmed()
            };
            let target = match &attempt.model {
                Some(model) => format!("{}/{}", attempt.backend_id, model),
                None => attempt.backend_id.clone(),
            };
            println!(
                "    {} {:<40} {:<16} {}",
                mark,
                target,
                attempt.status.as_str(),
                format!("{} ms", attempt.latency.as_millis()).dimmed()
            );
        }
    }
    println!();
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
