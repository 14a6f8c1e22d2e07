//! Writes rendered documents to disk.
//!
//! File names follow `<device>_<generated_at>_all-sensors.csv` for a combined
//! document and `<device>_<generated_at>_sensor_<axis>.csv` for each per-axis
//! document. Spaces and path separators in the device and axis names become
//! hyphens. Files are opened in append mode, so exporting twice with the same
//! device name and timestamp concatenates the documents.

use crate::error::FileIOError;
use crate::render::{RenderMode, TextOutput};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

pub struct FileExporter {
    directory: PathBuf,
}

impl FileExporter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File names `export` would use, in document order.
    pub fn file_names(rendered: &TextOutput, device_name: &str, generated_at: i64) -> Vec<String> {
        let base = format!("{}_{}_", sanitize_name_part(device_name), generated_at);
        rendered
            .documents
            .iter()
            .map(|doc| match (rendered.mode, doc.axis_name.as_deref()) {
                (RenderMode::PerAxis, Some(axis)) => {
                    format!("{}sensor_{}.csv", base, sanitize_name_part(axis))
                }
                _ => format!("{}all-sensors.csv", base),
            })
            .collect()
    }

    /// Appends every document to its file and returns the absolute paths
    /// written.
    ///
    /// Stops at the first failure. Files written before it are left in place
    /// and the error names the path that failed.
    #[instrument(skip(self, rendered), fields(dir = %self.directory.display()))]
    pub fn export(
        &self,
        rendered: &TextOutput,
        device_name: &str,
        generated_at: i64,
    ) -> Result<Vec<PathBuf>, FileIOError> {
        let directory = self.directory.canonicalize().map_err(|source| FileIOError {
            path: self.directory.clone(),
            source,
        })?;

        let names = Self::file_names(rendered, device_name, generated_at);
        let mut written = Vec::with_capacity(names.len());
        for (doc, name) in rendered.documents.iter().zip(names) {
            let path = directory.join(name);
            append(&path, &doc.text).map_err(|source| FileIOError {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path.display(), records = doc.record_count, "exported document");
            written.push(path);
        }
        Ok(written)
    }
}

fn append(path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(text.as_bytes())?;
    file.flush()
}

/// Replaces characters that cannot appear in a file name component.
pub fn sanitize_name_part(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '-',
            c => c,
        })
        .collect()
}
