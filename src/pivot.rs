//! Pivots independent per-axis series into one timestamp-aligned table.
//!
//! The remote source reports each axis of a sensor as its own sparse list of
//! `[timestamp, value]` pairs. [`pivot`] merges them into a rectangular
//! table: one row per distinct timestamp, one column per axis, with
//! [`Cell::Missing`] wherever an axis reported nothing at that timestamp.
//!
//! Ordering is deterministic:
//! - columns are the axis names in lexicographic order
//! - rows are in ascending numeric timestamp order

use crate::error::PivotInputError;
use serde_json::Value;
use std::collections::BTreeMap;

/// Unix timestamp in seconds
pub type Timestamp = i64;

/// One reading of one axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisReading {
    pub timestamp: Timestamp,
    pub value: String,
}

impl AxisReading {
    pub fn new(timestamp: Timestamp, value: impl Into<String>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }
}

/// Readings grouped by axis name, in the order the source reported them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesSet {
    axes: BTreeMap<String, Vec<AxisReading>>,
}

impl SeriesSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the readings of an axis.
    pub fn insert(&mut self, axis_name: impl Into<String>, readings: Vec<AxisReading>) {
        self.axes.insert(axis_name.into(), readings);
    }

    /// Appends one reading to an axis.
    pub fn push(&mut self, axis_name: &str, timestamp: Timestamp, value: impl Into<String>) {
        self.axes
            .entry(axis_name.to_string())
            .or_default()
            .push(AxisReading::new(timestamp, value));
    }

    /// Parses a series body of the form
    /// `{"axis": [[timestamp, value], ...], ...}`.
    ///
    /// Timestamps must be integers, or strings holding one. String values
    /// are kept verbatim; numbers and booleans are kept in their JSON text
    /// form. Anything else fails the whole body.
    pub fn from_json(body: &Value) -> Result<Self, PivotInputError> {
        let object = body.as_object().ok_or(PivotInputError::NotAnObject)?;
        let mut series = SeriesSet::new();
        for (axis, readings) in object {
            let entries = readings
                .as_array()
                .ok_or_else(|| PivotInputError::NotAList { axis: axis.clone() })?;
            let mut parsed = Vec::with_capacity(entries.len());
            for (index, entry) in entries.iter().enumerate() {
                parsed.push(parse_reading(axis, index, entry)?);
            }
            series.insert(axis.clone(), parsed);
        }
        Ok(series)
    }

    pub fn from_json_str(body: &str) -> Result<Self, PivotInputError> {
        let value: Value = serde_json::from_str(body)?;
        Self::from_json(&value)
    }

    /// Axis names in lexicographic order.
    pub fn axis_names(&self) -> impl Iterator<Item = &str> {
        self.axes.keys().map(String::as_str)
    }

    pub fn readings(&self, axis_name: &str) -> Option<&[AxisReading]> {
        self.axes.get(axis_name).map(Vec::as_slice)
    }

    /// Number of axes.
    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Total number of readings across all axes.
    pub fn reading_count(&self) -> usize {
        self.axes.values().map(Vec::len).sum()
    }
}

fn parse_reading(axis: &str, index: usize, entry: &Value) -> Result<AxisReading, PivotInputError> {
    let pair = match entry.as_array() {
        Some(pair) if pair.len() == 2 => pair,
        Some(pair) => {
            return Err(PivotInputError::malformed(
                axis,
                index,
                format!("expected [timestamp, value], got {} elements", pair.len()),
            ))
        }
        None => {
            return Err(PivotInputError::malformed(
                axis,
                index,
                "expected a [timestamp, value] pair",
            ))
        }
    };

    let timestamp = match &pair[0] {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| {
        PivotInputError::malformed(axis, index, format!("timestamp {} is not an integer", pair[0]))
    })?;

    let value = match &pair[1] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => {
            return Err(PivotInputError::malformed(
                axis,
                index,
                format!("value {} is not a scalar", other),
            ))
        }
    };

    Ok(AxisReading { timestamp, value })
}

/// One cell of a pivoted table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    /// The axis reported nothing at this timestamp. Distinct from an empty
    /// string value.
    Missing,
    Value(String),
}

impl Cell {
    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    pub fn as_value(&self) -> Option<&str> {
        match self {
            Cell::Missing => None,
            Cell::Value(v) => Some(v),
        }
    }
}

/// One timestamp of a pivoted table. `cells` is aligned with the table's
/// axis names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotRow {
    pub timestamp: Timestamp,
    pub cells: Vec<Cell>,
}

/// A dense, timestamp-ordered table built from a [`SeriesSet`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PivotedTable {
    axis_names: Vec<String>,
    rows: Vec<PivotRow>,
}

impl PivotedTable {
    /// Assembles a table from parts without checking its shape.
    pub fn from_parts(axis_names: Vec<String>, rows: Vec<PivotRow>) -> Self {
        Self { axis_names, rows }
    }

    pub fn axis_names(&self) -> &[String] {
        &self.axis_names
    }

    pub fn rows(&self) -> &[PivotRow] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, axis_name: &str) -> Option<usize> {
        self.axis_names.iter().position(|a| a == axis_name)
    }

    /// The cell at `(timestamp, axis)`, or `None` if either is not in the
    /// table.
    pub fn cell(&self, timestamp: Timestamp, axis_name: &str) -> Option<&Cell> {
        let column = self.column_index(axis_name)?;
        let row = self
            .rows
            .binary_search_by_key(&timestamp, |r| r.timestamp)
            .ok()?;
        self.rows[row].cells.get(column)
    }

    /// Single-axis table holding only the timestamps where `axis_name` has a
    /// reading. Equal to pivoting that axis's series on its own.
    pub fn project(&self, axis_name: &str) -> Option<PivotedTable> {
        let column = self.column_index(axis_name)?;
        let rows = self
            .rows
            .iter()
            .filter_map(|row| match row.cells.get(column) {
                Some(cell @ Cell::Value(_)) => Some(PivotRow {
                    timestamp: row.timestamp,
                    cells: vec![cell.clone()],
                }),
                _ => None,
            })
            .collect();
        Some(PivotedTable {
            axis_names: vec![axis_name.to_string()],
            rows,
        })
    }
}

/// Merges every axis of `series` into one table.
///
/// Every timestamp seen on any axis becomes a row, initialized with
/// [`Cell::Missing`] for all axes. Cells are then filled from the readings;
/// if an axis reports the same timestamp twice, its last reading wins.
pub fn pivot(series: &SeriesSet) -> PivotedTable {
    let axis_names: Vec<String> = series.axes.keys().cloned().collect();
    let width = axis_names.len();

    let mut rows: BTreeMap<Timestamp, Vec<Cell>> = BTreeMap::new();
    for readings in series.axes.values() {
        for reading in readings {
            rows.entry(reading.timestamp)
                .or_insert_with(|| vec![Cell::Missing; width]);
        }
    }

    for (column, readings) in series.axes.values().enumerate() {
        for reading in readings {
            if let Some(cells) = rows.get_mut(&reading.timestamp) {
                cells[column] = Cell::Value(reading.value.clone());
            }
        }
    }

    PivotedTable {
        axis_names,
        rows: rows
            .into_iter()
            .map(|(timestamp, cells)| PivotRow { timestamp, cells })
            .collect(),
    }
}

/// Parses a series body and pivots it.
pub fn pivot_json(body: &Value) -> Result<PivotedTable, PivotInputError> {
    Ok(pivot(&SeriesSet::from_json(body)?))
}
