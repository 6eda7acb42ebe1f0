//! Per-run metadata.

use crate::descriptor::Descriptor;
use crate::error::{RecorderError, RecorderResult};
use crate::record::Value;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A value captured before acquisition started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    #[serde(flatten)]
    pub descriptor: Descriptor,
    pub value: Value,
}

/// Current position of a positioner, `None` when it could not be read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionerReading {
    pub name: String,
    #[serde(default)]
    pub position: Option<f64>,
}

/// Captures everything the recorders need to know about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    /// Scan serial number; names entries and numbers output files.
    pub serial_no: u64,
    pub title: String,
    /// Operator.
    pub user: String,
    pub start_time: DateTime<FixedOffset>,
    /// Set by the run driver when the run completes.
    #[serde(default)]
    pub end_time: Option<DateTime<FixedOffset>>,
    pub descriptors: Vec<Descriptor>,
    /// Pre-run snapshot.
    #[serde(default)]
    pub snapshot: Vec<SnapshotEntry>,
    /// Instrument tree: path (`/instrument/monochromator`) → structural class.
    #[serde(default)]
    pub instruments: BTreeMap<String, String>,
    /// Moveables driven by the scan, in scan order.
    #[serde(default)]
    pub moveables: Vec<String>,
    #[serde(default)]
    pub positioners: Vec<PositionerReading>,
    /// Estimated total scan time in seconds.
    #[serde(default)]
    pub estimated_time: Option<f64>,
    #[serde(default)]
    pub total_scan_intervals: Option<u64>,
    /// Per-run setting overrides, first link of the settings chain.
    #[serde(default)]
    pub overrides: BTreeMap<String, serde_json::Value>,
}

impl Environment {
    /// Checks the descriptor invariants: non-empty names, and sanitized labels that are
    /// unique and keep at least one alphanumeric character.
    pub fn validate(&self) -> RecorderResult<()> {
        let mut labels = HashSet::new();
        for d in &self.descriptors {
            if d.name.is_empty() {
                return Err(RecorderError::InvalidEnvironment(
                    "descriptor with empty name".into(),
                ));
            }
            let label = d.sanitized_label();
            if !label.chars().any(char::is_alphanumeric) {
                return Err(RecorderError::InvalidEnvironment(format!(
                    "label '{}' of channel '{}' has no usable characters",
                    d.display_label(),
                    d.name
                )));
            }
            if !labels.insert(label.clone()) {
                return Err(RecorderError::InvalidEnvironment(format!(
                    "duplicate label '{label}' (channel '{}')",
                    d.name
                )));
            }
        }
        Ok(())
    }

    /// Integration time per point, derived from the estimated scan time.
    pub fn sample_time(&self) -> Option<f64> {
        let estimated = self.estimated_time?;
        let intervals = self.total_scan_intervals?;
        Some(estimated / (intervals as f64 + 1.0))
    }

    pub fn descriptor(&self, name: &str) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }
}

/// A builder for constructing `Environment` instances.
pub struct EnvironmentBuilder {
    inner: Environment,
}

impl EnvironmentBuilder {
    pub fn new(serial_no: u64, start_time: DateTime<FixedOffset>) -> Self {
        Self {
            inner: Environment {
                serial_no,
                title: String::new(),
                user: String::new(),
                start_time,
                end_time: None,
                descriptors: Vec::new(),
                snapshot: Vec::new(),
                instruments: BTreeMap::new(),
                moveables: Vec::new(),
                positioners: Vec::new(),
                estimated_time: None,
                total_scan_intervals: None,
                overrides: BTreeMap::new(),
            },
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.inner.title = title.to_string();
        self
    }

    pub fn user(mut self, user: &str) -> Self {
        self.inner.user = user.to_string();
        self
    }

    pub fn descriptor(mut self, descriptor: Descriptor) -> Self {
        self.inner.descriptors.push(descriptor);
        self
    }

    pub fn snapshot(mut self, descriptor: Descriptor, value: impl Into<Value>) -> Self {
        self.inner.snapshot.push(SnapshotEntry {
            descriptor,
            value: value.into(),
        });
        self
    }

    pub fn instrument(mut self, path: &str, class: &str) -> Self {
        self.inner.instruments.insert(path.to_string(), class.to_string());
        self
    }

    pub fn moveable(mut self, name: &str) -> Self {
        self.inner.moveables.push(name.to_string());
        self
    }

    pub fn positioner(mut self, name: &str, position: Option<f64>) -> Self {
        self.inner.positioners.push(PositionerReading {
            name: name.to_string(),
            position,
        });
        self
    }

    pub fn timing(mut self, estimated_time: f64, total_scan_intervals: u64) -> Self {
        self.inner.estimated_time = Some(estimated_time);
        self.inner.total_scan_intervals = Some(total_scan_intervals);
        self
    }

    pub fn override_setting(mut self, key: &str, value: serde_json::Value) -> Self {
        self.inner.overrides.insert(key.to_string(), value);
        self
    }

    pub fn end_time(mut self, end_time: DateTime<FixedOffset>) -> Self {
        self.inner.end_time = Some(end_time);
        self
    }

    pub fn build(self) -> Environment {
        self.inner
    }
}
