//! Hierarchical container (`.h5`, `.nx`) following the NXscan layout.
//!
//! ```text
//! /entry<serial>:NXentry
//!     definition, program_name@version, start_time@epoch, title, entry_identifier
//!     user:NXuser/name
//!     measurement:NXcollection
//!         <label>                       [unlimited] + shape, chunk [1] + shape
//!         pre_scan_snapshot:NXcollection/<label>
//!     plot_<n>:NXdata                   links to spectra and their axes
//!     custom_data:NXcollection
//!     end_time
//! ```
//!
//! Several runs can share one file; each gets its own entry and a second run with
//! the same serial number is rejected with [`RecorderError::DuplicateEntry`].

use super::{end_time, Backend, CustomDataOptions, RecorderContext};
use crate::container::{
    basename, join, AttrValue, Container, DatasetSpec, FieldValue, OpenMode,
};
use crate::descriptor::{CompressionHint, Descriptor, ElementType, PlotKind};
use crate::environment::Environment;
use crate::error::{RecorderError, RecorderResult};
use crate::record::{Record, Value};
use chrono::{DateTime, FixedOffset, SecondsFormat};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MEASUREMENT: &str = "measurement";
const SNAPSHOT: &str = "pre_scan_snapshot";
const CUSTOM_DATA: &str = "custom_data:NXcollection";
const DEFAULT_CLASS: &str = "NXcollection";

/// A descriptor accepted for storage together with its dataset location.
#[derive(Debug, Clone)]
struct Channel {
    descriptor: Descriptor,
    label: String,
    dtype: ElementType,
}

/// NXscan writer.
pub struct NexusBackend {
    path: PathBuf,
    container: Option<Box<dyn Container>>,
    entry: Option<String>,
    channels: Vec<Channel>,
    /// Snapshot labels that got a dataset, with the instrument they belong to.
    snapshot: Vec<(String, Option<String>)>,
    instruments: BTreeMap<String, String>,
}

impl std::fmt::Debug for NexusBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NexusBackend")
            .field("path", &self.path)
            .field("open", &self.container.is_some())
            .field("entry", &self.entry)
            .field("channels", &self.channels.len())
            .finish()
    }
}

fn iso(time: &DateTime<FixedOffset>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// Whether `descriptor` gets deflate compression: the per-channel hint wins, otherwise
/// datasets of rank above `threshold` are compressed (a negative threshold disables).
fn compression_for(descriptor: &Descriptor, threshold: i32, level: u8) -> Option<u8> {
    match descriptor.compression {
        Some(CompressionHint::Off) => None,
        Some(CompressionHint::Deflate(level)) => Some(level),
        None => {
            let rank = i32::try_from(descriptor.rank()).unwrap_or(i32::MAX);
            (threshold >= 0 && rank > threshold).then_some(level)
        }
    }
}

/// Storage type for `dtype`, or `None` (with a warning) when it cannot be stored.
fn storage_type(what: &str, name: &str, dtype: &ElementType) -> Option<ElementType> {
    let stored = dtype.storage_type();
    match &stored {
        None => warn!(
            channel = name,
            dtype = %dtype,
            "{what} will not be stored. Reason: type not supported"
        ),
        Some(stored) if stored != dtype => {
            debug!(channel = name, dtype = %stored, "{what} will be stored with a promoted type")
        }
        Some(_) => {}
    }
    stored
}

impl NexusBackend {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            container: None,
            entry: None,
            channels: Vec::new(),
            snapshot: Vec::new(),
            instruments: BTreeMap::new(),
        }
    }

    fn container(&mut self) -> RecorderResult<&mut Box<dyn Container>> {
        self.container
            .as_mut()
            .ok_or_else(|| RecorderError::Container(format!("{} is not open", self.path.display())))
    }

    fn entry(&self) -> RecorderResult<&str> {
        self.entry
            .as_deref()
            .ok_or_else(|| RecorderError::Container("no entry has been started".into()))
    }

    fn open_mode(&self, ctx: &RecorderContext, environment: &Environment) -> OpenMode {
        let overwrite = ctx.settings(environment).get_or("overwrite", ctx.config.overwrite);
        if !overwrite && ctx.containers.exists(&self.path) {
            OpenMode::ReadWrite
        } else {
            OpenMode::Create
        }
    }

    /// Creates (when missing) every group along `path` and returns its absolute form.
    ///
    /// Segments may use `name:class` notation; otherwise the class comes from the
    /// instrument tree, falling back to `NXcollection`. Relative paths start at the
    /// current entry.
    fn create_branch(&mut self, path: &str) -> RecorderResult<String> {
        let entry = self.entry()?.to_string();
        let rooted_at_entry = path
            .trim_start_matches('/')
            .split('/')
            .next()
            .is_some_and(|first| first.ends_with(":NXentry"));
        let mut absolute = if rooted_at_entry { "/".to_string() } else { entry };
        let mut relative = String::new();
        let instruments = self.instruments.clone();
        let container = self.container()?;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let (name, class) = match segment.split_once(':') {
                Some((name, class)) => (name, Some(class)),
                None => (segment, None),
            };
            relative.push('/');
            relative.push_str(name);
            absolute = join(&absolute, name);
            if container.exists(&absolute) {
                continue;
            }
            let class = class
                .map(str::to_string)
                .or_else(|| instruments.get(&relative).cloned())
                .unwrap_or_else(|| DEFAULT_CLASS.to_string());
            container.create_group(&absolute, &class)?;
        }
        Ok(absolute)
    }

    fn write_header(&mut self, ctx: &RecorderContext, environment: &Environment) -> RecorderResult<()> {
        let entry = self.entry()?.to_string();
        let container = self.container()?;
        container.create_group(&entry, "NXentry")?;
        container.write_field(&join(&entry, "definition"), &FieldValue::text("NXscan"))?;

        let program = join(&entry, "program_name");
        container.write_field(&program, &FieldValue::text(ctx.config.program_name.as_str()))?;
        container.set_attr(&program, "version", &AttrValue::from(env!("CARGO_PKG_VERSION")))?;

        let start = join(&entry, "start_time");
        container.write_field(&start, &FieldValue::text(iso(&environment.start_time)))?;
        let epoch = environment.start_time.timestamp() as f64
            + f64::from(environment.start_time.timestamp_subsec_micros()) / 1e6;
        container.set_attr(&start, "epoch", &AttrValue::Float(epoch))?;

        container.write_field(&join(&entry, "title"), &FieldValue::text(environment.title.as_str()))?;
        container.write_field(
            &join(&entry, "entry_identifier"),
            &FieldValue::text(environment.serial_no.to_string()),
        )?;

        let user = join(&entry, "user");
        container.create_group(&user, "NXuser")?;
        container.write_field(&join(&user, "name"), &FieldValue::text(environment.user.as_str()))?;
        Ok(())
    }

    fn create_measurement(&mut self, ctx: &RecorderContext, environment: &Environment) -> RecorderResult<()> {
        let measurement = join(self.entry()?, MEASUREMENT);
        let settings = ctx.settings(environment);
        let threshold = settings.get_or("compression_rank", ctx.config.compression_rank);
        let level = settings.get_or("compression_level", ctx.config.compression_level);

        let mut channels = Vec::new();
        for descriptor in &environment.descriptors {
            let Some(dtype) = storage_type("channel", &descriptor.name, &descriptor.dtype) else {
                continue;
            };
            channels.push(Channel {
                descriptor: descriptor.clone(),
                label: descriptor.sanitized_label(),
                dtype,
            });
        }

        let container = self.container()?;
        container.create_group(&measurement, "NXcollection")?;
        for channel in &channels {
            let path = join(&measurement, &channel.label);
            container.create_dataset(&DatasetSpec {
                path: path.clone(),
                dtype: channel.dtype.clone(),
                shape: channel.descriptor.shape.clone(),
                compression: compression_for(&channel.descriptor, threshold, level),
            })?;
            if let Some(units) = &channel.descriptor.units {
                container.set_attr(&path, "units", &AttrValue::from(units.as_str()))?;
            }
        }
        self.channels = channels;
        Ok(())
    }

    fn create_snapshot(&mut self, environment: &Environment) -> RecorderResult<()> {
        let measurement = join(self.entry()?, MEASUREMENT);
        let group = join(&measurement, SNAPSHOT);
        let container = self.container()?;
        container.create_group(&group, "NXcollection")?;

        let mut stored = Vec::new();
        for entry in &environment.snapshot {
            let descriptor = &entry.descriptor;
            let Some(dtype) = storage_type("pre-scan snapshot", &descriptor.name, &descriptor.dtype)
            else {
                continue;
            };
            let data = entry.value.elements();
            let shape = if descriptor.shape.is_empty() {
                vec![1]
            } else {
                descriptor.shape.clone()
            };
            if data.len() != shape.iter().product::<usize>() {
                warn!(
                    channel = %descriptor.name,
                    "pre-scan snapshot will not be stored. Reason: value does not match its shape"
                );
                continue;
            }
            let label = descriptor.sanitized_label();
            container.write_field(&join(&group, &label), &FieldValue::Number { dtype, shape, data })?;
            stored.push((label, descriptor.instrument.clone()));
        }

        let existing = container.children(&measurement)?;
        for (label, _) in &stored {
            if !existing.contains(label) {
                container.link(&join(&group, label), &join(&measurement, label))?;
            }
        }
        self.snapshot = stored;
        Ok(())
    }

    /// Links measurement and snapshot datasets into their instrument groups.
    fn populate_instruments(&mut self) -> RecorderResult<()> {
        let measurement = join(self.entry()?, MEASUREMENT);
        let mut links: Vec<(String, String, String)> = self
            .channels
            .iter()
            .filter_map(|c| {
                let instrument = c.descriptor.instrument.clone().filter(|i| !i.is_empty())?;
                Some((join(&measurement, &c.label), instrument, c.label.clone()))
            })
            .collect();
        links.extend(self.snapshot.iter().filter_map(|(label, instrument)| {
            let instrument = instrument.clone().filter(|i| !i.is_empty())?;
            Some((join(&join(&measurement, SNAPSHOT), label), instrument, label.clone()))
        }));

        for (source, instrument, label) in links {
            let result = self
                .create_branch(&instrument)
                .and_then(|group| self.container()?.link(&source, &join(&group, &label)));
            if let Err(e) = result {
                warn!(source = %source, instrument = %instrument, error = %e, "could not create instrument link");
            }
        }
        Ok(())
    }

    /// One `plot_<n>:NXdata` group per distinct axis set of spectrum channels.
    fn create_plots(&mut self) -> RecorderResult<()> {
        let entry = self.entry()?.to_string();
        let measurement = join(&entry, MEASUREMENT);

        let mut plots: Vec<(String, Vec<String>)> = Vec::new();
        for channel in &self.channels {
            if channel.descriptor.plot_type != PlotKind::Spectrum {
                continue;
            }
            let axes = channel.descriptor.plot_axes.join(":");
            match plots.iter_mut().find(|(a, _)| *a == axes) {
                Some((_, signals)) => signals.push(channel.label.clone()),
                None => plots.push((axes, vec![channel.label.clone()])),
            }
        }

        let container = self.container()?;
        for (n, (axes, signals)) in plots.iter().enumerate() {
            let group = join(&entry, &format!("plot_{}", n + 1));
            container.create_group(&group, "NXdata")?;
            for (i, label) in signals.iter().enumerate() {
                let link = join(&group, label);
                container.link(&join(&measurement, label), &link)?;
                let signal = i64::try_from((i + 1).min(2)).unwrap_or(2);
                container.set_attr(&link, "signal", &AttrValue::Int(signal))?;
                container.set_attr(&link, "axes", &AttrValue::from(axes.as_str()))?;
                container.set_attr(&link, "interpretation", &AttrValue::from("spectrum"))?;
            }
            for axis in axes.split(':').filter(|a| !a.is_empty()) {
                let target = join(&measurement, axis);
                let link = join(&group, axis);
                if container.exists(&link) {
                    continue;
                }
                if let Err(e) = container.link(&target, &link) {
                    warn!(axis, plot = %basename(&group), error = %e, "cannot create link for axis, skipping");
                }
            }
        }
        Ok(())
    }

    fn close(&mut self) -> RecorderResult<()> {
        match self.container.take() {
            Some(mut container) => container.close(),
            None => Ok(()),
        }
    }
}

/// Element type and flat data for a custom value.
fn custom_field(value: &Value, requested: Option<&ElementType>) -> Option<FieldValue> {
    if let Value::Text(text) = value {
        return Some(FieldValue::text(text.as_str()));
    }
    let (inferred, shape) = match value {
        Value::Bool(_) => (ElementType::Int8, Vec::new()),
        Value::Int(_) => (ElementType::Int64, Vec::new()),
        Value::Float(_) => (ElementType::Float64, Vec::new()),
        Value::Array(array) => (ElementType::Float64, array.shape.clone()),
        Value::Null | Value::Text(_) => return None,
    };
    let dtype = requested.cloned().unwrap_or(inferred).storage_type()?;
    Some(FieldValue::Number {
        dtype,
        shape,
        data: value.elements(),
    })
}

impl Backend for NexusBackend {
    fn start(&mut self, ctx: &RecorderContext, environment: &Environment) -> RecorderResult<()> {
        let mode = self.open_mode(ctx, environment);
        let container = ctx.containers.open(&self.path, mode)?;
        let entry = format!("/entry{}", environment.serial_no);
        self.container = Some(container);
        if self.container()?.exists(&entry) {
            self.close()?;
            return Err(RecorderError::DuplicateEntry {
                entry: entry.trim_start_matches('/').to_string(),
                file: self.path.clone(),
            });
        }
        self.entry = Some(entry);
        self.instruments = environment.instruments.clone();
        debug!(serial = environment.serial_no, path = %self.path.display(), ?mode, "starting container entry");

        self.write_header(ctx, environment)?;
        self.create_measurement(ctx, environment)?;
        self.create_snapshot(environment)?;
        self.container()?.flush()
    }

    fn write_record(&mut self, _ctx: &RecorderContext, record: &Record) -> RecorderResult<()> {
        let measurement = join(self.entry()?, MEASUREMENT);
        let mut slabs = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let Some(value) = record.data.get(&channel.descriptor.name) else {
                debug!(label = %channel.label, point = record.point_nb, "missing data for channel");
                continue;
            };
            let data = if value.is_null() {
                vec![0.0; channel.descriptor.element_count()]
            } else {
                if matches!(value, Value::Float(_)) && !channel.dtype.is_float() {
                    debug!(label = %channel.label, dtype = %channel.dtype, "value cast to channel type");
                }
                value.elements()
            };
            slabs.push((join(&measurement, &channel.label), data));
        }

        let container = self.container()?;
        for (path, data) in slabs {
            container.write_slab(&path, record.point_nb, &data)?;
        }
        container.flush()
    }

    fn end(&mut self, _ctx: &RecorderContext, environment: &Environment) -> RecorderResult<()> {
        self.populate_instruments()?;
        self.create_plots()?;
        let entry = self.entry()?.to_string();
        let container = self.container()?;
        container.write_field(&join(&entry, "end_time"), &FieldValue::text(iso(&end_time(environment))))?;
        container.flush()?;
        debug!(serial = environment.serial_no, path = %self.path.display(), "container entry finished");
        self.close()
    }

    fn abort(&mut self, _ctx: &RecorderContext) {
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "closing container after failure");
        }
    }

    fn add_custom_data(
        &mut self,
        ctx: &RecorderContext,
        name: &str,
        value: &Value,
        options: &CustomDataOptions,
    ) -> RecorderResult<()> {
        if options.remove {
            info!(name, "custom data already written cannot be removed, ignored");
            return Ok(());
        }
        let Some(field) = custom_field(value, options.dtype.as_ref()) else {
            warn!(name, "cannot write custom data. Reason: unsupported data type");
            return Ok(());
        };

        let was_closed = self.container.is_none();
        if was_closed {
            // Appends to the finished run; `overwrite` only applies when a run starts.
            let mode = if ctx.containers.exists(&self.path) {
                OpenMode::ReadWrite
            } else {
                OpenMode::Create
            };
            self.container = Some(ctx.containers.open(&self.path, mode)?);
        }

        let group = options.group.as_deref().unwrap_or(CUSTOM_DATA).to_string();
        let result = self.create_branch(&group).and_then(|group| {
            let path = join(&group, name);
            self.container()?.write_field(&path, &field)
        });
        if let Err(e) = result {
            warn!(name, error = %e, "error writing custom data");
        }

        if was_closed {
            self.close()?;
        }
        Ok(())
    }

    fn output_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_follows_rank_threshold_and_hint() {
        let scalar = Descriptor::new("ct01", "float64");
        let image = Descriptor::new("ccd", "uint16").with_shape(vec![4, 4]);
        assert_eq!(compression_for(&scalar, 1, 6), None);
        assert_eq!(compression_for(&image, 1, 6), Some(6));
        assert_eq!(compression_for(&image, -1, 6), None);
        let forced = scalar.with_compression(CompressionHint::Deflate(9));
        assert_eq!(compression_for(&forced, -1, 6), Some(9));
        let off = image.with_compression(CompressionHint::Off);
        assert_eq!(compression_for(&off, 0, 6), None);
    }

    #[test]
    fn custom_values_map_to_fields() {
        assert_eq!(custom_field(&Value::from("Si"), None), Some(FieldValue::text("Si")));
        assert_eq!(
            custom_field(&Value::Bool(true), None),
            Some(FieldValue::scalar(ElementType::Int8, 1.0))
        );
        assert_eq!(
            custom_field(&Value::Int(3), Some(&ElementType::UInt16)),
            Some(FieldValue::scalar(ElementType::UInt16, 3.0))
        );
        assert_eq!(custom_field(&Value::Null, None), None);
        assert_eq!(
            custom_field(&Value::Float(1.0), Some(&ElementType::from("char"))),
            None
        );
    }

    #[test]
    fn iso_keeps_offset() {
        let t = DateTime::parse_from_rfc3339("2026-03-01T12:00:00+01:00").unwrap();
        assert_eq!(iso(&t), "2026-03-01T12:00:00+01:00");
    }
}
