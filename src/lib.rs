//! # Scan Recorder
//!
//! Persists the records produced by a data-acquisition run. A run driver builds a
//! [`Recorder`] for an output path, calls `start` with the run [`Environment`], then
//! `write_record` once per acquired point and finally `end`. The on-disk
//! representation is chosen from the file extension:
//!
//! | Extension | Format |
//! |---|---|
//! | `.spec` (and anything unknown) | flat ASCII table, many scans per file |
//! | `.fio` | sectioned ASCII, one file per scan, sidecar files for traces |
//! | `.h5`, `.nx` | hierarchical container, NXscan layout |
//! | `.nxs` | container written by an external writer service from a composite schema |
//!
//! ## Crate Structure
//!
//! - **`descriptor`**, **`environment`**, **`record`**: the run data model.
//! - **`recorder`**: the lifecycle state machine and the four back-ends.
//! - **`container`**: the hierarchical container abstraction (HDF5 or in-memory).
//! - **`alias`**, **`resolver`**: channel aliasing and data-source resolution against
//!   the component catalog.
//! - **`services`**: boundaries of the naming, configuration and container-writer
//!   services, each with an in-memory implementation.
//! - **`config`**, **`settings`**: local configuration and the settings fallback chain.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: [`RecorderError`] and [`ServiceError`].

pub mod alias;
pub mod config;
pub mod container;
pub mod descriptor;
pub mod environment;
pub mod error;
pub mod format;
pub mod logging;
pub mod naming;
pub mod record;
pub mod recorder;
pub mod resolver;
pub mod services;
pub mod settings;

pub use config::RecorderConfig;
pub use descriptor::{Descriptor, ElementType, PlotKind};
pub use environment::{Environment, EnvironmentBuilder};
pub use error::{RecorderError, RecorderResult, ServiceError};
pub use record::{Record, Value};
pub use recorder::{
    Backend, CustomDataOptions, DataFormat, Recorder, RecorderContext, RecorderState,
};
