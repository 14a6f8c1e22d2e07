//! Configuration for the telemirror binary and library.
//!
//! Sources, in increasing precedence:
//! 1. Defaults embedded from `config/default.toml`
//! 2. System-wide file `/etc/telemirror/config.toml`, if present
//! 3. File given with `--config`
//! 4. Environment variables prefixed with `TELEMIRROR_`, sections separated by
//!    a double underscore (`TELEMIRROR_STORE__DATA_DIR`)
//! 5. Command-line flags
//!
//! Query window bounds are stored as offsets. The window itself is computed
//! from the clock each time a query is built.

use crate::actions::PersistenceFlags;
use crate::query::{QueryWindow, SensorQuery};
use crate::render::RenderMode;
use clap::{Parser, Subcommand};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::PathBuf;
use telemirror_store::StoreConfig;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");
const DEFAULT_CONFIG_PATH: &str = "/etc/telemirror/config.toml";

#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory holding the SQLite database
    #[arg(long, env = "TELEMIRROR_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Database file name inside the data directory
    #[arg(long, env = "TELEMIRROR_DATA_FILE")]
    pub data_file: Option<String>,

    /// Directory for exported files
    #[arg(long, env = "TELEMIRROR_EXPORT_DIR")]
    pub export_dir: Option<PathBuf>,

    /// Log filter directive, e.g. `telemirror=debug`
    #[arg(long, env = "TELEMIRROR_LOG")]
    pub log_filter: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create all tables
    Init,
    /// List stored account references
    Accounts,
    /// List the things linked to an account
    Things { account_ref: String },
    /// Print one stored thing
    ShowThing { thing_id: String },
    /// Pivot and render a series body read from a JSON file
    Render {
        input: PathBuf,
        /// Device name used in export file names
        #[arg(long)]
        device: String,
        /// Render one document per axis
        #[arg(long)]
        per_axis: bool,
        /// Also write the documents to the export directory
        #[arg(long)]
        export: bool,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub store: StoreConfig,
    pub query: QuerySettings,
    pub export: ExportSettings,
    pub logging: LoggingSettings,
    #[serde(default)]
    pub persistence: PersistenceFlags,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuerySettings {
    pub lookback_secs: i64,
    pub stop_offset_secs: i64,
    pub limit: u32,
    pub time_source: String,
}

impl QuerySettings {
    pub fn window(&self) -> QueryWindow {
        QueryWindow::trailing(self.lookback_secs, self.stop_offset_secs)
    }

    /// A query for `sensor_name` carrying the configured limit, time source
    /// and a window computed now.
    pub fn sensor_query(&self, sensor_name: impl Into<String>) -> SensorQuery {
        let mut query = SensorQuery::new(sensor_name).with_window(self.window());
        query.limit = self.limit;
        query.time_source = self.time_source.clone();
        query
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportSettings {
    pub directory: PathBuf,
    #[serde(default)]
    pub per_axis: bool,
}

impl ExportSettings {
    pub fn mode(&self) -> RenderMode {
        if self.per_axis {
            RenderMode::PerAxis
        } else {
            RenderMode::Combined
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    pub filter: String,
}

impl Settings {
    /// Loads configuration from all available sources.
    pub fn new(cli: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if let Ok(metadata) = std::fs::metadata(DEFAULT_CONFIG_PATH) {
            if metadata.is_file() {
                builder = builder.add_source(File::from(PathBuf::from(DEFAULT_CONFIG_PATH)));
            }
        }

        if let Some(ref config_path) = cli.config {
            builder = builder.add_source(File::from(config_path.clone()));
        }

        builder = builder.add_source(
            Environment::with_prefix("TELEMIRROR")
                .prefix_separator("_")
                .separator("__"),
        );

        if let Some(ref dir) = cli.data_dir {
            builder = builder.set_override("store.data_dir", dir.to_string_lossy().as_ref())?;
        }
        if let Some(ref file) = cli.data_file {
            builder = builder.set_override("store.data_file", file.as_str())?;
        }
        if let Some(ref dir) = cli.export_dir {
            builder = builder.set_override("export.directory", dir.to_string_lossy().as_ref())?;
        }
        if let Some(ref filter) = cli.log_filter {
            builder = builder.set_override("logging.filter", filter.as_str())?;
        }

        builder.build()?.try_deserialize()
    }
}
