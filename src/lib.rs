//! Telemirror: local mirror and tabular export of IoT sensor telemetry.
//!
//! Sensor readings arrive from a remote service as one sparse series per
//! axis. This library aligns them into a single timestamp-ordered table,
//! renders that table as comma separated text, and optionally appends it to
//! files on disk. Account and device metadata are mirrored into a local
//! SQLite store (see [`telemirror_store`]) so queries can run without asking
//! the remote service for definitions again.
//!
//! # Example
//!
//! ```rust,no_run
//! use telemirror::pivot::{pivot, SeriesSet};
//! use telemirror::render::{render, RenderMode};
//! use telemirror::export::FileExporter;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let series = SeriesSet::from_json_str(
//!         r#"{"A": [[200, "2"], [100, "1"]], "B": [[100, "5"]]}"#,
//!     )?;
//!
//!     let rendered = render(&pivot(&series), RenderMode::Combined)?;
//!     print!("{}", rendered.documents[0].text);
//!
//!     let paths = FileExporter::new("/tmp").export(&rendered, "Weather Station", 1_700_000_000)?;
//!     println!("wrote {:?}", paths);
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod config;
pub mod error;
pub mod export;
pub mod pivot;
pub mod query;
pub mod render;

#[cfg(test)]
mod tests;

pub use actions::{
    AccountActions, ActionOutcome, PersistenceFlags, ReadingBatch, ReadingsPayload, RemoteService,
    ServiceStatus,
};
pub use config::{CliArgs, Command, Settings};
pub use error::{
    ActionFailure, BoxError, FileIOError, MirrorError, PivotInputError, QueryFailure, RenderError,
};
pub use export::FileExporter;
pub use pivot::{pivot, AxisReading, Cell, PivotRow, PivotedTable, SeriesSet};
pub use query::{QueryOutcome, QueryRunner, QueryStatus, QueryWindow, SensorQuery, TelemetrySource};
pub use render::{render, RenderMode, RenderedDocument, TextOutput};
