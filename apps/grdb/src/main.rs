//! # grdb - Growth Recipe Database
//!
//! The main binary for the recipe database and its derived-metrics engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    apps/grdb (THE BINARY)                │
//! │                                                          │
//! │  ┌───────────┐   ┌────────────┐   ┌──────────────────┐   │
//! │  │   CLI     │   │  HTTP API  │   │ Spectrum fetcher │   │
//! │  │  (clap)   │   │   (axum)   │   │    (reqwest)     │   │
//! │  └─────┬─────┘   └─────┬──────┘   └────────┬─────────┘   │
//! │        └───────────────┼───────────────────┘             │
//! │                        ▼                                 │
//! │                ┌───────────────┐                         │
//! │                │   grdb-core   │                         │
//! │                │ (THE ENGINE)  │                         │
//! │                └───────────────┘                         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! grdb server --host 0.0.0.0 --port 8080
//! grdb ingest -f recipes.json
//! grdb list --strategy memory
//! grdb search -c "growth_duration>=10" -c "uses_argon==true"
//! ```

use clap::Parser;
use grdb::cli;
use grdb::config::LogFormat;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // Configuration errors are reported before logging exists.
    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "grdb=info,grdb_core=info,tower_http=debug".into());

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli, config).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    println!(
        r#"
   ____ ____  ____  ____
  / ___|  _ \|  _ \| __ )
 | |  _| |_) | | | |  _ \
 | |_| |  _ <| |_| | |_) |
  \____|_| \_\____/|____/

  Growth Recipe Database v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
