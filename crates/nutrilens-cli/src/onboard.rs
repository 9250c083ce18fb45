//! `nutrilens onboard`: initialize configuration and state directory.
//!
//! - Creates `~/.nutrilens/config.json` with defaults
//! - Creates the state directory that holds the quota ledger

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use nutrilens_core::config::{get_config_path, load_config, save_config};

use crate::wiring;

/// Run the onboard command.
pub fn run() -> Result<()> {
    println!();
    println!("{}", "🍽  NutriLens — Setup".cyan().bold());
    println!();

    let config_path = get_config_path();
    ensure_config(&config_path)?;

    let config = load_config(Some(&config_path));
    let state_dir = wiring::state_dir(&config);
    std::fs::create_dir_all(&state_dir)?;
    println!("  {} state dir at {}", "✓".green(), state_dir.display());

    println!();
    if config.remote.is_configured() {
        println!(
            "{}",
            "  Setup complete! Run `nutrilens recognize <photo>` to try it.".green()
        );
    } else {
        println!(
            "  {} add your API key under {} in {}",
            "→".cyan(),
            "remote.apiKey".bold(),
            config_path.display()
        );
    }
    println!();

    Ok(())
}

/// Write a default config unless one already exists. Returns whether a file
/// was created.
fn ensure_config(path: &Path) -> Result<bool> {
    if path.exists() {
        println!("  {} config already exists at {}", "✓".green(), path.display());
        return Ok(false);
    }
    let config = load_config(Some(path));
    save_config(&config, Some(path))?;
    println!("  {} created config at {}", "✓".green(), path.display());
    Ok(true)
}
