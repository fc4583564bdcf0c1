//! # grdb CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `status` - Show store counts (default)
//! - `init` - Initialize a new database
//! - `ingest` - Ingest recipes (or experiments) from a JSON file
//! - `list` - List recipes with their metrics
//! - `show` - Show one recipe with metrics and steps
//! - `metric` - Evaluate one metric on one recipe
//! - `explain` - Print a metric's compiled pushdown expression
//! - `search` - Filter recipes by metric conditions
//! - `delete` - Delete a recipe
//! - `verify` - Cross-check both evaluators on every recipe
//! - `spectrum` - Retrieve and parse a Raman spectrum

mod commands;

use crate::config::{Backend, Config};
use clap::{Parser, Subcommand};
use grdb_core::{GrdbError, Strategy};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// grdb - growth recipe database
///
/// Stores CVD growth recipes and computes derived metrics either in memory
/// or pushed down into the step store.
#[derive(Parser, Debug)]
#[command(name = "grdb")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (default: ./grdb.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the database (overrides config)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend (overrides config)
    #[arg(short = 'B', long, global = true, value_enum)]
    pub backend: Option<Backend>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Load configuration and apply command-line overrides.
    pub fn load_config(&self) -> Result<Config, GrdbError> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(path) = &self.database {
            config.storage.path = path.clone();
        }
        if let Some(backend) = self.backend {
            config.storage.backend = backend;
        }
        if let Some(Commands::Server { host, port }) = &self.command {
            if let Some(host) = host {
                config.server.host = host.clone();
            }
            if let Some(port) = port {
                config.server.port = *port;
            }
        }
        Ok(config)
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show store counts
    Status,

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Ingest recipes from a JSON file (one object or an array)
    Ingest {
        /// Path to the input file
        #[arg(short, long)]
        file: PathBuf,

        /// The file holds experiments instead of recipes
        #[arg(long)]
        experiments: bool,
    },

    /// List recipes with their metrics
    List {
        /// Evaluation strategy (memory, pushdown)
        #[arg(short, long, default_value_t = Strategy::Pushdown)]
        strategy: Strategy,
    },

    /// Show one recipe with metrics and steps
    Show {
        /// Recipe ID
        id: u64,

        /// Evaluation strategy (memory, pushdown)
        #[arg(short, long, default_value_t = Strategy::Pushdown)]
        strategy: Strategy,
    },

    /// Evaluate one metric on one recipe
    Metric {
        /// Metric name (e.g. growth_duration)
        name: String,

        /// Recipe ID
        id: u64,

        /// Evaluation strategy (memory, pushdown)
        #[arg(short, long, default_value_t = Strategy::Pushdown)]
        strategy: Strategy,
    },

    /// Print a metric's compiled pushdown expression as SQL
    Explain {
        /// Metric name
        name: String,
    },

    /// Filter recipes by metric conditions (all must hold)
    Search {
        /// Condition such as "growth_duration>=10" (repeatable)
        #[arg(short, long = "condition", required = true)]
        conditions: Vec<String>,
    },

    /// Delete a recipe and its steps
    Delete {
        /// Recipe ID
        id: u64,
    },

    /// Cross-check both evaluators on every stored recipe
    Verify,

    /// Retrieve and parse a Raman spectrum
    Spectrum {
        /// Raman file ID
        id: u64,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments and loaded configuration.
pub async fn execute(cli: Cli, config: Config) -> Result<(), GrdbError> {
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { .. }) => cmd_server(&config).await,
        Some(Commands::Status) | None => cmd_status(&config, json_mode),
        Some(Commands::Init { force }) => cmd_init(&config, force),
        Some(Commands::Ingest { file, experiments }) => {
            cmd_ingest(&config, json_mode, &file, experiments)
        }
        Some(Commands::List { strategy }) => cmd_list(&config, json_mode, strategy),
        Some(Commands::Show { id, strategy }) => cmd_show(&config, json_mode, id, strategy),
        Some(Commands::Metric { name, id, strategy }) => {
            cmd_metric(&config, json_mode, &name, id, strategy)
        }
        Some(Commands::Explain { name }) => cmd_explain(&config, &name),
        Some(Commands::Search { conditions }) => cmd_search(&config, json_mode, &conditions),
        Some(Commands::Delete { id }) => cmd_delete(&config, id),
        Some(Commands::Verify) => cmd_verify(&config, json_mode),
        Some(Commands::Spectrum { id }) => cmd_spectrum(&config, json_mode, id).await,
    }
}

// =============================================================================
// TESTS
// =============================================================================
