//! Text rendering of pivoted tables.
//!
//! A rendered document is comma separated with a header line of
//! `timestamp` followed by each axis name in double quotes. Each row holds
//! the timestamp and one field per axis; a missing reading is an empty field.
//! Every line ends with `\n`, including the last. A table without rows
//! renders as an empty document with no header.
//!
//! Values that contain a comma, a double quote, or a line break are wrapped in
//! double quotes with inner quotes doubled. Other values are written
//! verbatim.

use crate::error::RenderError;
use crate::pivot::{Cell, PivotedTable};
use serde::Deserialize;
use std::borrow::Cow;
use std::fmt::Write;

/// How a table is split into documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// One document with every axis as a column
    #[default]
    Combined,
    /// One single-column document per axis, holding only the timestamps
    /// where that axis has a reading
    PerAxis,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    /// The axis this document covers. `None` for a combined document.
    pub axis_name: Option<String>,
    pub text: String,
    pub record_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextOutput {
    pub mode: RenderMode,
    pub documents: Vec<RenderedDocument>,
    /// Row count of the first document, or 0 when there is none. In
    /// per-axis mode this is the first axis's count, not a total.
    pub total_records_returned: usize,
}

impl TextOutput {
    /// The single combined document, if this output was rendered in
    /// combined mode.
    pub fn combined(&self) -> Option<&RenderedDocument> {
        match self.mode {
            RenderMode::Combined => self.documents.first(),
            RenderMode::PerAxis => None,
        }
    }

    pub fn document_for(&self, axis_name: &str) -> Option<&RenderedDocument> {
        self.documents
            .iter()
            .find(|d| d.axis_name.as_deref() == Some(axis_name))
    }
}

/// Renders `table` in the given mode.
pub fn render(table: &PivotedTable, mode: RenderMode) -> Result<TextOutput, RenderError> {
    let documents = match mode {
        RenderMode::Combined => vec![RenderedDocument {
            axis_name: None,
            text: render_table(table)?,
            record_count: table.row_count(),
        }],
        RenderMode::PerAxis => {
            check_shape(table)?;
            let mut documents = Vec::with_capacity(table.axis_names().len());
            for axis in table.axis_names() {
                let projected = table.project(axis).unwrap_or_default();
                documents.push(RenderedDocument {
                    axis_name: Some(axis.clone()),
                    text: render_table(&projected)?,
                    record_count: projected.row_count(),
                });
            }
            documents
        }
    };

    let total_records_returned = documents.first().map_or(0, |d| d.record_count);
    Ok(TextOutput {
        mode,
        documents,
        total_records_returned,
    })
}

fn check_shape(table: &PivotedTable) -> Result<(), RenderError> {
    let expected = table.axis_names().len();
    match table.rows().iter().find(|r| r.cells.len() != expected) {
        Some(row) => Err(RenderError::RaggedRow {
            timestamp: row.timestamp,
            expected,
            found: row.cells.len(),
        }),
        None => Ok(()),
    }
}

fn render_table(table: &PivotedTable) -> Result<String, RenderError> {
    check_shape(table)?;
    let mut out = String::new();
    if table.is_empty() {
        return Ok(out);
    }

    out.push_str("timestamp");
    for axis in table.axis_names() {
        write!(out, ",\"{}\"", axis.replace('"', "\"\""))?;
    }
    out.push('\n');

    for row in table.rows() {
        write!(out, "{}", row.timestamp)?;
        for cell in &row.cells {
            out.push(',');
            if let Cell::Value(value) = cell {
                out.push_str(&escape_value(value));
            }
        }
        out.push('\n');
    }
    Ok(out)
}

fn escape_value(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}
