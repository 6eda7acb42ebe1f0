//! Container-writer service boundary.
//!
//! The dynamic-schema back-end does not write the container itself. It hands a
//! composite schema to a writer service and then streams JSON payloads to it.

use crate::error::ServiceError;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// An out-of-process container writer.
pub trait ContainerWriterService: Send + Sync {
    fn open_file(&self, path: &Path, schema: &str) -> Result<(), ServiceError>;

    /// Opens the entry; `payload` carries the values needed at entry creation
    /// (`start_time`, `serialno`, `scan_title`).
    fn open_entry(&self, payload: &serde_json::Value) -> Result<(), ServiceError>;

    /// One point, `{"data": {...}}`.
    fn record(&self, payload: &serde_json::Value) -> Result<(), ServiceError>;

    fn close_entry(&self, payload: &serde_json::Value) -> Result<(), ServiceError>;

    fn close_file(&self) -> Result<(), ServiceError>;
}

/// A call received by [`MemoryWriterService`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriterCall {
    OpenFile { path: PathBuf, schema: String },
    OpenEntry(serde_json::Value),
    Record(serde_json::Value),
    CloseEntry(serde_json::Value),
    CloseFile,
}

#[derive(Debug, Default)]
struct Journal {
    calls: Vec<WriterCall>,
    reject_records: bool,
}

/// Writer service that journals every call instead of writing.
#[derive(Debug, Default)]
pub struct MemoryWriterService {
    journal: Mutex<Journal>,
}

impl MemoryWriterService {
    pub fn new() -> Self {
        Self::default()
    }

    /// A writer that accepts the file and entry but fails every `record` call.
    pub fn rejecting_records() -> Self {
        Self {
            journal: Mutex::new(Journal {
                calls: Vec::new(),
                reject_records: true,
            }),
        }
    }

    pub fn calls(&self) -> Vec<WriterCall> {
        self.journal
            .lock()
            .map(|j| j.calls.clone())
            .unwrap_or_default()
    }

    /// Payloads of the `record` calls, in order.
    pub fn records(&self) -> Vec<serde_json::Value> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                WriterCall::Record(payload) => Some(payload),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: WriterCall) -> Result<(), ServiceError> {
        let mut journal = self
            .journal
            .lock()
            .map_err(|_| ServiceError::Unreachable("writer journal poisoned".into()))?;
        if journal.reject_records && matches!(call, WriterCall::Record(_)) {
            return Err(ServiceError::Rejected("record refused by writer".into()));
        }
        journal.calls.push(call);
        Ok(())
    }
}

impl ContainerWriterService for MemoryWriterService {
    fn open_file(&self, path: &Path, schema: &str) -> Result<(), ServiceError> {
        self.push(WriterCall::OpenFile {
            path: path.to_path_buf(),
            schema: schema.to_string(),
        })
    }

    fn open_entry(&self, payload: &serde_json::Value) -> Result<(), ServiceError> {
        self.push(WriterCall::OpenEntry(payload.clone()))
    }

    fn record(&self, payload: &serde_json::Value) -> Result<(), ServiceError> {
        self.push(WriterCall::Record(payload.clone()))
    }

    fn close_entry(&self, payload: &serde_json::Value) -> Result<(), ServiceError> {
        self.push(WriterCall::CloseEntry(payload.clone()))
    }

    fn close_file(&self) -> Result<(), ServiceError> {
        self.push(WriterCall::CloseFile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journals_calls_in_order() {
        let writer = MemoryWriterService::new();
        writer.open_file(Path::new("/tmp/a.nxs"), "<definition/>").unwrap();
        writer.record(&serde_json::json!({"data": {"x": 1}})).unwrap();
        writer.close_file().unwrap();
        let calls = writer.calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(calls[0], WriterCall::OpenFile { .. }));
        assert_eq!(writer.records(), vec![serde_json::json!({"data": {"x": 1}})]);
        assert_eq!(calls[2], WriterCall::CloseFile);
    }

    #[test]
    fn rejecting_writer_fails_records_only() {
        let writer = MemoryWriterService::rejecting_records();
        writer.open_entry(&serde_json::json!({})).unwrap();
        assert!(writer.record(&serde_json::json!({"data": {}})).is_err());
        assert_eq!(writer.calls().len(), 1);
    }
}
