//! # Configuration
//!
//! Layered settings: `grdb.toml` first, then `GRDB_*` environment
//! variables, then command-line flags (applied by the CLI).
//!
//! Every key is optional:
//!
//! ```toml
//! [storage]
//! backend = "redb"        # or "file"
//! path = "grdb.db"
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! body_limit_bytes = 2097152
//!
//! [remote]
//! signer_url = "https://signer.internal/presign"
//! timeout_secs = 30
//! allow_insecure = false
//!
//! [logging]
//! format = "text"         # or "json"
//! ```

use clap::ValueEnum;
use grdb_core::GrdbError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration file read when none is given explicitly.
pub const DEFAULT_CONFIG_FILE: &str = "grdb.toml";

/// Maximum configuration file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// SECTIONS
// =============================================================================

/// Storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// ACID database with column-oriented step tables.
    #[default]
    Redb,
    /// Whole-store binary snapshot, loaded into memory.
    File,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redb => f.write_str("redb"),
            Self::File => f.write_str("file"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = GrdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "redb" => Ok(Self::Redb),
            "file" => Ok(Self::File),
            other => Err(GrdbError::InvalidInput(format!(
                "unknown backend '{}' (expected redb or file)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: Backend,
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            path: PathBuf::from("grdb.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Request body limit; batch ingestion is the largest payload.
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            body_limit_bytes: 2 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Remote spectrum retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// Endpoint that exchanges an object name for a presigned URL.
    pub signer_url: Option<String>,
    pub timeout_secs: u64,
    /// Accept plain `http://` URLs. Only meant for local testing.
    pub allow_insecure: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            signer_url: None,
            timeout_secs: 30,
            allow_insecure: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

// =============================================================================
// CONFIG
// =============================================================================

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, GrdbError> {
        toml::from_str(text)
            .map_err(|e| GrdbError::InvalidInput(format!("invalid configuration: {}", e)))
    }

    /// Load the configuration file and apply environment overrides.
    ///
    /// An explicit `path` must exist; without one, `grdb.toml` in the
    /// working directory is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self, GrdbError> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::read_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, GrdbError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            GrdbError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(GrdbError::InvalidInput(format!(
                "config file {} bytes exceeds maximum {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            GrdbError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `GRDB_*` overrides through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), GrdbError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("GRDB_DATABASE") {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(backend) = lookup("GRDB_BACKEND") {
            self.storage.backend = backend.parse()?;
        }
        if let Some(host) = lookup("GRDB_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("GRDB_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| {
                    GrdbError::InvalidInput(format!("GRDB_PORT '{}' is not a port", port))
                })?;
        }
        if let Some(url) = lookup("GRDB_SIGNER_URL") {
            self.remote.signer_url = Some(url);
        }
        if let Some(format) = lookup("GRDB_LOG_FORMAT") {
            self.logging.format = match format.as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            };
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
