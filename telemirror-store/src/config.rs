//! Store configuration.
//!
//! The store is addressed by a directory and a file name, matching the
//! `[store]` section of the service configuration:
//!
//! ```toml
//! [store]
//! data_dir = "/var/lib/telemirror"
//! data_file = "telemirror.sqlite"
//! busy_timeout_ms = 5000
//! ```

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DATA_FILE: &str = "telemirror.sqlite";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Location and connection options of the SQLite database.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the database file. It must already exist.
    pub data_dir: PathBuf,
    /// Database file name inside `data_dir`
    #[serde(default = "default_data_file")]
    pub data_file: String,
    /// How long a connection waits on a lock held by another writer
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_data_file() -> String {
    DEFAULT_DATA_FILE.to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            data_file: default_data_file(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>, data_file: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            data_file: data_file.into(),
            ..Self::default()
        }
    }

    /// Full path of the database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.data_file)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
