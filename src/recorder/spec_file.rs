//! Flat ASCII table (`.spec`).
//!
//! One file holds many scans; each run appends a block:
//!
//! ```text
//! #S 12 ascan mot1 0 1 1 0.1
//! #U operator
//! #D 1767225600.0
//! #C Acquisition started at Thu Jan  1 00:00:00 2026
//! #O0 mot1  mot2
//! #P0 0.5 1.5
//! #N 2
//! #L mot1  det1
//! 0.0 10.5
//! 1.0 11.2
//! #C Acquisition ended at Thu Jan  1 00:00:10 2026
//! ```
//!
//! Only scalar channels of a supported type become columns. A block appended to an
//! existing file is preceded by an empty line.

use super::{end_time, Backend, CustomDataOptions, RecorderContext};
use crate::environment::{Environment, SnapshotEntry};
use crate::error::RecorderResult;
use crate::format::{ctime, epoch_seconds};
use crate::record::{Record, Value};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SNAPSHOT_ITEMS_PER_LINE: usize = 8;

/// Flat-table writer.
#[derive(Debug)]
pub struct SpecFileBackend {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    /// Channel names in column order.
    columns: Vec<String>,
}

impl SpecFileBackend {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: None,
            columns: Vec::new(),
        }
    }

    fn open_append(&self) -> RecorderResult<BufWriter<File>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        Ok(BufWriter::new(file))
    }

    fn write_line(&mut self, line: &str) -> RecorderResult<()> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(line.as_bytes())?;
            file.flush()?;
        }
        Ok(())
    }
}

/// `#<prefix><n> ` lines of at most eight items each.
fn multi_lines(prefix: char, separator: &str, items: &[String]) -> String {
    items
        .chunks(SNAPSHOT_ITEMS_PER_LINE)
        .enumerate()
        .map(|(n, chunk)| format!("#{prefix}{n} {}\n", chunk.join(separator)))
        .collect()
}

/// Scalar, supported snapshot entries as (labels, values).
fn snapshot_columns(snapshot: &[SnapshotEntry]) -> (Vec<String>, Vec<String>) {
    let mut labels = Vec::new();
    let mut values = Vec::new();
    for entry in snapshot {
        let descriptor = &entry.descriptor;
        if !descriptor.is_scalar() || !entry.value.is_scalar() {
            info!(
                label = descriptor.display_label(),
                "pre-scan snapshot will not be stored: value is non-scalar"
            );
            continue;
        }
        if !descriptor.dtype.is_supported() {
            info!(
                label = descriptor.display_label(),
                dtype = %descriptor.dtype,
                "pre-scan snapshot will not be stored: type not supported"
            );
            continue;
        }
        labels.push(descriptor.display_label().to_string());
        values.push(entry.value.to_text());
    }
    (labels, values)
}

/// Scan header block.
fn header(environment: &Environment, columns: &[String], labels: &[String]) -> String {
    let (snapshot_labels, snapshot_values) = snapshot_columns(&environment.snapshot);
    let mut header = String::new();
    header.push_str(&format!("#S {} {}\n", environment.serial_no, environment.title));
    header.push_str(&format!("#U {}\n", environment.user));
    header.push_str(&format!("#D {}\n", epoch_seconds(&environment.start_time)));
    header.push_str(&format!(
        "#C Acquisition started at {}\n",
        ctime(&environment.start_time)
    ));
    header.push_str(&multi_lines('O', "  ", &snapshot_labels));
    header.push_str(&multi_lines('P', " ", &snapshot_values));
    header.push_str(&format!("#N {}\n", columns.len()));
    header.push_str(&format!("#L {}\n", labels.join("  ")));
    header
}

impl Backend for SpecFileBackend {
    fn start(&mut self, _ctx: &RecorderContext, environment: &Environment) -> RecorderResult<()> {
        let mut columns = Vec::new();
        let mut labels = Vec::new();
        for descriptor in &environment.descriptors {
            if !descriptor.is_scalar() {
                continue;
            }
            if !descriptor.dtype.is_supported() {
                info!(
                    channel = %descriptor.name,
                    dtype = %descriptor.dtype,
                    "channel will not be stored: type not supported"
                );
                continue;
            }
            columns.push(descriptor.name.clone());
            labels.push(descriptor.sanitized_label());
        }

        let mut block = String::new();
        if self.path.exists() {
            block.push('\n');
        }
        block.push_str(&header(environment, &columns, &labels));

        self.file = Some(self.open_append()?);
        self.columns = columns;
        debug!(path = %self.path.display(), columns = self.columns.len(), "flat table opened");
        self.write_line(&block)
    }

    fn write_record(&mut self, _ctx: &RecorderContext, record: &Record) -> RecorderResult<()> {
        let line = self
            .columns
            .iter()
            .map(|name| record.text(name))
            .collect::<Vec<_>>()
            .join(" ");
        self.write_line(&format!("{line}\n"))
    }

    fn end(&mut self, _ctx: &RecorderContext, environment: &Environment) -> RecorderResult<()> {
        let trailer = format!("#C Acquisition ended at {}\n", ctime(&end_time(environment)));
        self.write_line(&trailer)?;
        self.file = None;
        Ok(())
    }

    fn abort(&mut self, _ctx: &RecorderContext) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
    }

    fn add_custom_data(
        &mut self,
        _ctx: &RecorderContext,
        name: &str,
        value: &Value,
        _options: &CustomDataOptions,
    ) -> RecorderResult<()> {
        if !value.is_scalar() {
            info!(name, "custom data will not be stored: value is non-scalar");
            return Ok(());
        }
        let text = value.to_text();
        if text.contains('\n') || name.contains('\n') {
            info!(name, "custom data will not be stored: unsupported format");
            return Ok(());
        }

        let was_closed = self.file.is_none();
        if was_closed {
            self.file = Some(self.open_append()?);
        }
        let result = self.write_line(&format!("#C {name} : {text}\n"));
        if was_closed {
            self.file = None;
        }
        result
    }

    fn output_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Descriptor;

    #[test]
    fn multi_lines_wrap_after_eight_items() {
        let items: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
        let text = multi_lines('O', "  ", &items);
        assert_eq!(
            text,
            "#O0 m0  m1  m2  m3  m4  m5  m6  m7\n#O1 m8  m9\n"
        );
        assert_eq!(multi_lines('P', " ", &[]), "");
    }

    #[test]
    fn snapshot_skips_arrays_and_unsupported_types() {
        let snapshot = vec![
            SnapshotEntry {
                descriptor: Descriptor::new("mot1", "float64"),
                value: Value::Float(0.5),
            },
            SnapshotEntry {
                descriptor: Descriptor::new("mca", "float64").with_shape(vec![3]),
                value: Value::from(vec![1.0, 2.0, 3.0]),
            },
            SnapshotEntry {
                descriptor: Descriptor::new("sample", "string"),
                value: Value::from("Si"),
            },
        ];
        let (labels, values) = snapshot_columns(&snapshot);
        assert_eq!(labels, vec!["mot1"]);
        assert_eq!(values, vec!["0.5"]);
    }
}
