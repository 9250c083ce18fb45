//! NutriLens CLI: entry point.
//!
//! # Commands
//!
//! - `nutrilens recognize <IMAGE> [--json]`: identify the food in a photo
//! - `nutrilens status`: show configuration and backend availability
//! - `nutrilens quota [--json]`: show remote usage counters
//! - `nutrilens onboard`: initialize config and state directory

mod helpers;
mod onboard;
mod quota_cmd;
mod recognize;
mod status;
mod wiring;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// 🍽 NutriLens: food photo recognition with quota-aware fallbacks
#[derive(Parser)]
#[command(name = "nutrilens", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize the food in a photo
    Recognize {
        /// Path to the image file
        image: PathBuf,

        /// Print the result as JSON
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Show configuration and backend availability
    Status {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Show remote usage counters from the quota ledger
    Quota {
        /// Print the report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Initialize configuration and state directory
    Onboard,
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Recognize { image, json, logs } => {
            init_logging(logs);
            recognize::run(image, json).await
        }
        Commands::Status { logs } => {
            init_logging(logs);
            status::run().await
        }
        Commands::Quota { json } => {
            init_logging(false);
            quota_cmd::run(json)
        }
        Commands::Onboard => onboard::run(),
    }
}

/// Initialize tracing/logging.
///
/// `NUTRILENS_LOG_JSON=1` switches to one JSON object per line.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("nutrilens=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    let json = std::env::var("NUTRILENS_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}
