//! Index configuration and logging setup.
//!
//! Provides [`IndexConfig`] with defaults for the data directory, which
//! optional indexes are enabled, and the tuning knobs of the startup scan
//! and the drop protocol.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_subscriber::util::TryInitError;

use tessera_core::constants::{DEFAULT_DROP_BATCH_SIZE, DEFAULT_LOCATOR_SCAN_STEP};

/// Configuration for the index layer of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Maintain the transaction location index. When disabled, an existing
    /// index is dropped at startup.
    pub tx_index: bool,
    /// Maximum entries deleted per transaction while dropping an index.
    pub drop_batch_size: usize,
    /// Forward-scan step used to recover the block locator counter.
    pub locator_scan_step: u32,
    /// Log level filter string (e.g. "info", "debug", "tessera_index=trace").
    pub log_level: String,
    /// "json" for structured output; anything else is human-readable text.
    pub log_format: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tessera");

        Self {
            data_dir,
            tx_index: true,
            drop_batch_size: DEFAULT_DROP_BATCH_SIZE,
            locator_scan_step: DEFAULT_LOCATOR_SCAN_STEP,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl IndexConfig {
    /// Path to the RocksDB index directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("indexes")
    }

    /// Install the global tracing subscriber for this configuration.
    pub fn init_logging(&self) -> Result<(), TryInitError> {
        init_logging(&self.log_level, &self.log_format)
    }
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// `RUST_LOG` takes precedence over `level_str`. Pass `format = "json"` for
/// structured JSON output; any other value gives human-readable text. Fails
/// if a global subscriber is already installed.
pub fn init_logging(level_str: &str, format: &str) -> Result<(), TryInitError> {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .try_init()
    }
}
