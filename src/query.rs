//! Sensor queries against a remote telemetry source.
//!
//! A query selects one sensor of a [`Thing`], asks a [`TelemetrySource`] for
//! the readings of its axes inside a time window, then pivots and renders them
//! and optionally exports the result to disk.

use crate::error::{BoxError, FileIOError, QueryFailure};
use crate::export::FileExporter;
use crate::pivot::{pivot, SeriesSet};
use crate::render::{render, RenderMode, TextOutput};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use telemirror_store::{Account, Thing};
use tracing::{error, info, instrument, warn};

pub const DEFAULT_LOOKBACK_SECS: i64 = 86_400;
pub const DEFAULT_STOP_OFFSET_SECS: i64 = 300;
pub const DEFAULT_LIMIT: u32 = 1440;
pub const DEFAULT_TIME_SOURCE: &str = "ORIGIN";

/// A `[start, stop]` range of unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub start: i64,
    pub stop: i64,
}

impl QueryWindow {
    pub fn new(start: i64, stop: i64) -> Self {
        Self { start, stop }
    }

    /// A window that ends `stop_offset_secs` before now and spans back
    /// `lookback_secs` from now. Reads the clock on every call.
    pub fn trailing(lookback_secs: i64, stop_offset_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            start: now - lookback_secs,
            stop: now - stop_offset_secs,
        }
    }

    pub fn last_day() -> Self {
        Self::trailing(DEFAULT_LOOKBACK_SECS, DEFAULT_STOP_OFFSET_SECS)
    }
}

/// Everything the transport needs to fetch one sensor's series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRequest {
    pub session_token: String,
    pub thing_token: String,
    pub thing_id: String,
    pub sensor_name: String,
    pub window: QueryWindow,
    pub time_source: String,
    pub limit: u32,
    pub axis_names: Vec<String>,
    pub trace_id: Option<String>,
}

/// Transport collaborator that fetches sensor readings.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Returns the parsed body `{"axis": [[timestamp, value], ...], ...}`.
    async fn fetch_series(&self, request: SeriesRequest) -> Result<Value, BoxError>;
}

/// Parameters of one sensor query.
#[derive(Debug, Clone)]
pub struct SensorQuery {
    pub sensor_name: String,
    /// `None` means the trailing default window, computed when the query runs
    pub window: Option<QueryWindow>,
    pub time_source: String,
    pub limit: u32,
    /// Axes to fetch. Empty selects every axis of the sensor; names the sensor
    /// does not define are dropped.
    pub axis_names: Vec<String>,
    pub mode: RenderMode,
    pub export_dir: Option<PathBuf>,
    pub return_data_set: bool,
    pub trace_id: Option<String>,
}

impl SensorQuery {
    pub fn new(sensor_name: impl Into<String>) -> Self {
        Self {
            sensor_name: sensor_name.into(),
            window: None,
            time_source: DEFAULT_TIME_SOURCE.to_string(),
            limit: DEFAULT_LIMIT,
            axis_names: Vec::new(),
            mode: RenderMode::Combined,
            export_dir: None,
            return_data_set: true,
            trace_id: None,
        }
    }

    pub fn with_window(mut self, window: QueryWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_axes<I, S>(mut self, axes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.axis_names = axes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mode(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn export_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = Some(dir.into());
        self
    }

    pub fn without_data_set(mut self) -> Self {
        self.return_data_set = false;
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Succeeded,
    Failed,
}

/// Result of a sensor query.
#[derive(Debug)]
pub struct QueryOutcome {
    pub status: QueryStatus,
    pub message: Option<String>,
    pub error: Option<QueryFailure>,
    pub total_records_returned: usize,
    /// Absent when the query failed or the caller opted out of the data set
    pub rendered: Option<TextOutput>,
    pub exported: Vec<PathBuf>,
    pub trace_id: Option<String>,
}

impl QueryOutcome {
    fn failed(query: &SensorQuery, failure: QueryFailure) -> Self {
        error!(sensor = %query.sensor_name, error = %failure, "sensor query failed");
        Self {
            status: QueryStatus::Failed,
            message: None,
            error: Some(failure),
            total_records_returned: 0,
            rendered: None,
            exported: Vec::new(),
            trace_id: query.trace_id.clone(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Failed
    }
}

pub struct QueryRunner {
    source: Box<dyn TelemetrySource>,
}

impl QueryRunner {
    pub fn new(source: Box<dyn TelemetrySource>) -> Self {
        Self { source }
    }

    /// Runs one sensor query for `thing` on behalf of `account`.
    ///
    /// Returns `Err` only when exporting fails. Every other failure comes
    /// back as an outcome with [`QueryStatus::Failed`].
    #[instrument(skip_all, fields(thing_id = %thing.thing_id, sensor = %query.sensor_name))]
    pub async fn query_thing_sensor(
        &self,
        account: &Account,
        thing: &Thing,
        query: &SensorQuery,
    ) -> Result<QueryOutcome, FileIOError> {
        let Some(sensor) = thing.sensor(&query.sensor_name) else {
            return Ok(QueryOutcome::failed(
                query,
                QueryFailure::UnknownSensor(query.sensor_name.clone()),
            ));
        };

        let axis_names: Vec<String> = if query.axis_names.is_empty() {
            sensor.axis_names().map(str::to_string).collect()
        } else {
            let (known, unknown): (Vec<String>, Vec<String>) = query
                .axis_names
                .iter()
                .cloned()
                .partition(|a| sensor.axes.contains_key(a));
            if !unknown.is_empty() {
                warn!(?unknown, "dropping axes not defined on sensor");
            }
            known
        };

        let Some(session_token) = account.session_token.clone() else {
            return Ok(QueryOutcome::failed(
                query,
                QueryFailure::MissingToken("account session token"),
            ));
        };
        let Some(thing_token) = thing.token.clone() else {
            return Ok(QueryOutcome::failed(
                query,
                QueryFailure::MissingToken("thing token"),
            ));
        };

        let request = SeriesRequest {
            session_token,
            thing_token,
            thing_id: thing.thing_id.clone(),
            sensor_name: sensor.sensor_name.clone(),
            window: query.window.unwrap_or_else(QueryWindow::last_day),
            time_source: query.time_source.clone(),
            limit: query.limit,
            axis_names,
            trace_id: query.trace_id.clone(),
        };

        let body = match self.source.fetch_series(request).await {
            Ok(body) => body,
            Err(e) => return Ok(QueryOutcome::failed(query, QueryFailure::Source(e.to_string()))),
        };

        let series = match SeriesSet::from_json(&body) {
            Ok(series) => series,
            Err(e) => return Ok(QueryOutcome::failed(query, e.into())),
        };
        let message = format!(
            "captured {} readings across {} axes",
            series.reading_count(),
            series.len()
        );

        let rendered = match render(&pivot(&series), query.mode) {
            Ok(rendered) => rendered,
            Err(e) => return Ok(QueryOutcome::failed(query, e.into())),
        };

        let exported = match &query.export_dir {
            Some(dir) => FileExporter::new(dir).export(
                &rendered,
                &thing.name,
                Utc::now().timestamp(),
            )?,
            None => Vec::new(),
        };

        info!(
            records = rendered.total_records_returned,
            files = exported.len(),
            "sensor query completed"
        );
        Ok(QueryOutcome {
            status: QueryStatus::Succeeded,
            message: Some(message),
            error: None,
            total_records_returned: rendered.total_records_returned,
            rendered: query.return_data_set.then_some(rendered),
            exported,
            trace_id: query.trace_id.clone(),
        })
    }
}
