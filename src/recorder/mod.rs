//! Recorder lifecycle.
//!
//! A [`Recorder`] drives one [`Backend`] through the run lifecycle:
//!
//! ```text
//! Idle ──start──▶ Started ──write_record──▶ Writing ──end──▶ Ended
//!                    │                         │
//!                    └────────── error ────────┴──▶ Failed
//! ```
//!
//! `start` is accepted from `Idle`, `Ended` and `Failed`, so one recorder can record
//! consecutive runs. Any back-end error moves the recorder to `Failed` after the
//! back-end has been told to [`Backend::abort`] (close handles, drop transient
//! server-side state). A recorder built without an output path is disabled: every
//! operation succeeds without doing anything.
//!
//! The back-end is chosen from the output extension, see [`DataFormat::from_path`].

pub mod fio;
pub mod nexus;
pub mod nxs;
pub mod spec_file;

use crate::config::RecorderConfig;
use crate::container::{ContainerProvider, Hdf5Provider};
use crate::descriptor::ElementType;
use crate::environment::Environment;
use crate::error::{RecorderError, RecorderResult};
use crate::record::{Record, Value};
use crate::services::{
    ConfigurationService, ContainerWriterService, NamingService, StaticNamingService,
};
use crate::settings::SettingsChain;
use chrono::{DateTime, FixedOffset};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// On-disk representation, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFormat {
    /// Flat ASCII table (`.spec`); also the fallback for unknown extensions.
    Spec,
    /// Sectioned ASCII with per-point sidecar files (`.fio`).
    Fio,
    /// Hierarchical container written in-process (`.h5`, `.nx`).
    Nexus,
    /// Hierarchical container written by the container-writer service (`.nxs`).
    DynamicNexus,
}

impl DataFormat {
    pub const ALL: [DataFormat; 4] = [
        DataFormat::Spec,
        DataFormat::Fio,
        DataFormat::Nexus,
        DataFormat::DynamicNexus,
    ];

    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        DataFormat::ALL
            .into_iter()
            .find(|format| format.extensions().contains(&extension.as_str()))
            .unwrap_or(DataFormat::Spec)
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            DataFormat::Spec => &["spec"],
            DataFormat::Fio => &["fio"],
            DataFormat::Nexus => &["h5", "nx"],
            DataFormat::DynamicNexus => &["nxs"],
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DataFormat::Spec => "flat ASCII table",
            DataFormat::Fio => "sectioned ASCII with per-point sidecar files",
            DataFormat::Nexus => "hierarchical container (NXscan)",
            DataFormat::DynamicNexus => "component-based container via writer service",
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataFormat::Spec => "spec",
            DataFormat::Fio => "fio",
            DataFormat::Nexus => "nexus",
            DataFormat::DynamicNexus => "nxs",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a [`Recorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Started,
    Writing,
    Ended,
    Failed,
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderState::Idle => write!(f, "Idle"),
            RecorderState::Started => write!(f, "Started"),
            RecorderState::Writing => write!(f, "Writing"),
            RecorderState::Ended => write!(f, "Ended"),
            RecorderState::Failed => write!(f, "Failed"),
        }
    }
}

/// Where and how custom data is stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomDataOptions {
    /// Container group path; defaults to the entry's `custom_data` collection.
    pub group: Option<String>,
    /// Storage type for numeric values in containers.
    pub dtype: Option<ElementType>,
    /// Drop a previously added value instead of storing one. Only the dynamic-schema
    /// format can take data back; the others ignore the call.
    pub remove: bool,
}

/// Services and settings shared by every back-end.
#[derive(Clone)]
pub struct RecorderContext {
    pub config: RecorderConfig,
    pub naming: Arc<dyn NamingService>,
    pub configuration: Option<Arc<dyn ConfigurationService>>,
    pub writer: Option<Arc<dyn ContainerWriterService>>,
    pub containers: Arc<dyn ContainerProvider>,
}

impl fmt::Debug for RecorderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecorderContext")
            .field("config", &self.config)
            .field("configuration", &self.configuration.is_some())
            .field("writer", &self.writer.is_some())
            .finish_non_exhaustive()
    }
}

impl RecorderContext {
    /// Context with an empty alias table, no remote services and HDF5 containers.
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            naming: Arc::new(StaticNamingService::new()),
            configuration: None,
            writer: None,
            containers: Arc::new(Hdf5Provider),
        }
    }

    pub fn with_naming(mut self, naming: Arc<dyn NamingService>) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_configuration(mut self, configuration: Arc<dyn ConfigurationService>) -> Self {
        self.configuration = Some(configuration);
        self
    }

    pub fn with_writer(mut self, writer: Arc<dyn ContainerWriterService>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_containers(mut self, containers: Arc<dyn ContainerProvider>) -> Self {
        self.containers = containers;
        self
    }

    /// Settings lookup for one run.
    pub fn settings<'a>(&'a self, environment: &'a Environment) -> SettingsChain<'a> {
        SettingsChain::new(environment, self.configuration.as_deref(), &self.config)
    }
}

impl Default for RecorderContext {
    fn default() -> Self {
        Self::new(RecorderConfig::default())
    }
}

/// One on-disk representation.
///
/// The [`Recorder`] enforces ordering (state, point monotonicity) before calling in,
/// so implementations only deal with their format.
pub trait Backend: Send {
    /// Creates structure and writes headers.
    fn start(&mut self, ctx: &RecorderContext, environment: &Environment) -> RecorderResult<()>;

    fn write_record(&mut self, ctx: &RecorderContext, record: &Record) -> RecorderResult<()>;

    /// Writes trailers and closes.
    fn end(&mut self, ctx: &RecorderContext, environment: &Environment) -> RecorderResult<()>;

    /// Best-effort teardown after a failure. Must not fail.
    fn abort(&mut self, ctx: &RecorderContext);

    fn add_custom_data(
        &mut self,
        _ctx: &RecorderContext,
        name: &str,
        _value: &Value,
        _options: &CustomDataOptions,
    ) -> RecorderResult<()> {
        info!(name, "custom data not supported by this format, ignored");
        Ok(())
    }

    /// File currently (or last) written.
    fn output_path(&self) -> Option<&Path>;
}

/// Builds the back-end for `format` writing to `path`.
pub fn backend_for(format: DataFormat, path: &Path) -> Box<dyn Backend> {
    match format {
        DataFormat::Spec => Box::new(spec_file::SpecFileBackend::new(path)),
        DataFormat::Fio => Box::new(fio::FioBackend::new(path)),
        DataFormat::Nexus => Box::new(nexus::NexusBackend::new(path)),
        DataFormat::DynamicNexus => Box::new(nxs::NxsBackend::new(path)),
    }
}

/// Generic lifecycle wrapper around a [`Backend`].
pub struct Recorder {
    base_path: Option<PathBuf>,
    format: DataFormat,
    backend: Option<Box<dyn Backend>>,
    state: RecorderState,
    last_point: Option<u64>,
    context: RecorderContext,
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("base_path", &self.base_path)
            .field("format", &self.format)
            .field("state", &self.state)
            .field("last_point", &self.last_point)
            .finish_non_exhaustive()
    }
}

impl Recorder {
    /// Recorder for `path`, back-end chosen by extension.
    pub fn new(path: impl Into<PathBuf>, context: RecorderContext) -> Self {
        let path = path.into();
        let format = DataFormat::from_path(&path);
        let backend = backend_for(format, &path);
        Self::with_backend(path, format, backend, context)
    }

    /// Recorder around a caller-provided back-end.
    pub fn with_backend(
        path: impl Into<PathBuf>,
        format: DataFormat,
        backend: Box<dyn Backend>,
        context: RecorderContext,
    ) -> Self {
        Self {
            base_path: Some(path.into()),
            format,
            backend: Some(backend),
            state: RecorderState::Idle,
            last_point: None,
            context,
        }
    }

    /// Recorder with no output target: every operation is a no-op.
    pub fn disabled(context: RecorderContext) -> Self {
        Self {
            base_path: None,
            format: DataFormat::Spec,
            backend: None,
            state: RecorderState::Idle,
            last_point: None,
            context,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn format(&self) -> DataFormat {
        self.format
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Actual file written by the last run (after numbering), if any.
    pub fn output_path(&self) -> Option<&Path> {
        self.backend.as_ref().and_then(|b| b.output_path())
    }

    pub fn context(&self) -> &RecorderContext {
        &self.context
    }

    fn violation(&self, operation: &'static str) -> RecorderError {
        RecorderError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    fn fail(&mut self, error: RecorderError) -> RecorderError {
        warn!(state = %self.state, error = %error, "recording failed, tearing down");
        if let Some(backend) = self.backend.as_mut() {
            backend.abort(&self.context);
        }
        self.state = RecorderState::Failed;
        error
    }

    pub fn start(&mut self, environment: &Environment) -> RecorderResult<()> {
        if self.backend.is_none() {
            return Ok(());
        }
        if !matches!(
            self.state,
            RecorderState::Idle | RecorderState::Ended | RecorderState::Failed
        ) {
            return Err(self.violation("start"));
        }
        environment.validate()?;

        if let Some(dir) = self.base_path.as_deref().and_then(Path::parent) {
            if let Err(e) = ensure_directory(dir) {
                self.state = RecorderState::Failed;
                return Err(e);
            }
        }

        debug!(serial = environment.serial_no, format = %self.format, "starting run");
        let result = match self.backend.as_mut() {
            Some(backend) => backend.start(&self.context, environment),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                self.state = RecorderState::Started;
                self.last_point = None;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    pub fn write_record(&mut self, record: &Record) -> RecorderResult<()> {
        if self.backend.is_none() {
            return Ok(());
        }
        if !matches!(self.state, RecorderState::Started | RecorderState::Writing) {
            return Err(self.violation("write a record"));
        }
        if let Some(previous) = self.last_point {
            if record.point_nb <= previous {
                return Err(RecorderError::NonMonotonicPoint {
                    previous,
                    got: record.point_nb,
                });
            }
        }
        let result = match self.backend.as_mut() {
            Some(backend) => backend.write_record(&self.context, record),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                self.state = RecorderState::Writing;
                self.last_point = Some(record.point_nb);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    pub fn end(&mut self, environment: &Environment) -> RecorderResult<()> {
        if self.backend.is_none() {
            return Ok(());
        }
        if !matches!(self.state, RecorderState::Started | RecorderState::Writing) {
            return Err(self.violation("end"));
        }
        let result = match self.backend.as_mut() {
            Some(backend) => backend.end(&self.context, environment),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                debug!(serial = environment.serial_no, points = ?self.last_point, "run ended");
                self.state = RecorderState::Ended;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Stores an out-of-band value. Accepted while a run is open and after it ended.
    pub fn add_custom_data(
        &mut self,
        name: &str,
        value: &Value,
        options: &CustomDataOptions,
    ) -> RecorderResult<()> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(());
        };
        if !matches!(
            self.state,
            RecorderState::Started | RecorderState::Writing | RecorderState::Ended
        ) {
            return Err(RecorderError::InvalidState {
                operation: "add custom data",
                state: self.state.to_string(),
            });
        }
        backend.add_custom_data(&self.context, name, value, options)
    }
}

/// Creates `dir` (and its parents) when missing. Every directory created here is
/// made world-writable on Unix; directories that already existed keep their mode.
pub fn ensure_directory(dir: &Path) -> RecorderResult<()> {
    if dir.as_os_str().is_empty() || dir.is_dir() {
        return Ok(());
    }
    let to_error = |path: &Path, source: std::io::Error| RecorderError::OutputDirectory {
        path: path.to_path_buf(),
        source,
    };
    let created: Vec<&Path> = dir
        .ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
        .collect();
    fs::create_dir_all(dir).map_err(|e| to_error(dir, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        for &path in created.iter().rev() {
            fs::set_permissions(path, fs::Permissions::from_mode(0o777))
                .map_err(|e| to_error(path, e))?;
        }
    }
    debug!(dir = %dir.display(), created = created.len(), "created output directory");
    Ok(())
}

/// End time of the run, or now when the driver did not set one.
pub fn end_time(environment: &Environment) -> DateTime<FixedOffset> {
    environment
        .end_time
        .unwrap_or_else(|| chrono::Local::now().fixed_offset())
}
