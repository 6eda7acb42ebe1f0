//! Dynamic-schema container (`.nxs`) written through external services.
//!
//! At `start` the channels of the run are matched against the component catalog of
//! the configuration service (see [`crate::resolver`]). Channels no eligible component
//! supplies are covered by a transient dynamic component so they are still stored. The
//! composite schema of the persisted components is then handed to the
//! container-writer service, which receives one JSON payload per point.
//!
//! The dynamic component only exists while the schema is built. It is removed before
//! `start` returns, whether schema construction succeeded or not. The same holds for
//! the run variables (`scan_title`, `serialno`) pushed to the service next to the
//! operator's `config_variables`: once the schema is built only the latter remain.
//!
//! Settings read through the chain:
//!
//! | key | effect |
//! |-----|--------|
//! | `user_components`, `automatic_components` | persisted components |
//! | `data_sources` | extra data sources required next to the channels |
//! | `data_record` | object merged into every payload's `data` |
//! | `config_variables` | variables for component markup |

use super::{end_time, Backend, CustomDataOptions, RecorderContext};
use crate::alias::AliasResolver;
use crate::environment::Environment;
use crate::error::{RecorderError, RecorderResult};
use crate::naming::output_path;
use crate::record::{Record, Value};
use crate::resolver::{resolve, ResolutionRequest};
use crate::services::{ConfigurationService, ContainerWriterService};
use chrono::{DateTime, FixedOffset};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A transient component registered with the configuration service, removed on drop.
struct TransientComponent<'a> {
    service: &'a dyn ConfigurationService,
    name: String,
}

impl TransientComponent<'_> {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TransientComponent<'_> {
    fn drop(&mut self) {
        match self.service.delete_transient_component(&self.name) {
            Ok(()) => debug!(component = %self.name, "dynamic component removed"),
            Err(e) => warn!(component = %self.name, error = %e, "cannot remove dynamic component"),
        }
    }
}

/// Run variables applied to the configuration service; the operator's set is put
/// back on drop.
struct RunVariables<'a> {
    service: &'a dyn ConfigurationService,
    restore: serde_json::Value,
}

impl Drop for RunVariables<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.service.set_config_variables(&self.restore) {
            warn!(error = %e, "cannot restore config variables");
        }
    }
}

/// Writer progress, so `abort` closes exactly what was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Closed,
    FileOpen,
    EntryOpen,
}

/// Dynamic-schema writer.
pub struct NxsBackend {
    base: PathBuf,
    path: Option<PathBuf>,
    stage: Stage,
    /// Custom data; merged into the entry payloads and requested as record keys.
    user_data: BTreeMap<String, serde_json::Value>,
    /// `data_record` of the current run.
    data_record: serde_json::Map<String, serde_json::Value>,
}

impl std::fmt::Debug for NxsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NxsBackend")
            .field("base", &self.base)
            .field("path", &self.path)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

fn timestamp(time: &DateTime<FixedOffset>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.6f%z").to_string()
}

fn services(
    ctx: &RecorderContext,
) -> RecorderResult<(Arc<dyn ConfigurationService>, Arc<dyn ContainerWriterService>)> {
    let configuration = ctx
        .configuration
        .clone()
        .ok_or_else(|| RecorderError::Configuration("no configuration service".into()))?;
    let writer = ctx
        .writer
        .clone()
        .ok_or_else(|| RecorderError::Configuration("no container-writer service".into()))?;
    Ok((configuration, writer))
}

impl NxsBackend {
    pub fn new(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            path: None,
            stage: Stage::Closed,
            user_data: BTreeMap::new(),
            data_record: serde_json::Map::new(),
        }
    }

    /// Builds the composite schema for this run. The dynamic component, if any, is
    /// dropped (and so deleted) on every return path.
    fn build_schema(
        &self,
        ctx: &RecorderContext,
        service: &dyn ConfigurationService,
        environment: &Environment,
        append_entry: bool,
    ) -> RecorderResult<String> {
        let settings = ctx.settings(environment);
        let index = AliasResolver::new(ctx.naming.clone()).collect(environment);

        let mut request = ResolutionRequest::for_run(&index, environment);
        request.restrict_to_user_components =
            settings.get_or("restrict_to_user_components", ctx.config.restrict_to_user_components);
        request.allow_dynamic_fallback =
            settings.get_or("dynamic_components", ctx.config.dynamic_components);
        for key in ["user_components", "automatic_components"] {
            request
                .user
                .extend(settings.get::<Vec<String>>(key).unwrap_or_default());
        }
        let extra_sources = settings.get::<Vec<String>>("data_sources").unwrap_or_default();
        if !extra_sources.is_empty() {
            debug!(sources = ?extra_sources, "additional data sources requested");
            request.required.extend(extra_sources);
        }
        request.mandatory = service.list_mandatory_components()?.into_iter().collect();
        info!(mandatory = ?request.mandatory, user = ?request.user, "selected components");

        let optional: BTreeSet<String> = settings
            .get::<Vec<String>>("optional_components")
            .unwrap_or_default()
            .into_iter()
            .collect();
        request.available = match service.list_components() {
            Ok(all) => all
                .into_iter()
                .filter(|c| optional.is_empty() || optional.contains(c))
                .collect(),
            Err(e) => {
                warn!(error = %e, "cannot list available components");
                BTreeSet::new()
            }
        };
        request.user_keys = self.user_data.keys().cloned().collect();

        let resolution = resolve(service, &request);
        debug!(
            missing = ?resolution.missing,
            required = ?resolution.component_to_required,
            missing_keys = ?resolution.missing_keys,
            "data sources resolved"
        );

        let dynamic = match &resolution.dynamic {
            Some(spec) => Some(TransientComponent {
                service,
                name: service.create_transient_component(spec)?,
            }),
            None => None,
        };
        let components =
            resolution.persisted_components(&request, dynamic.as_ref().map(TransientComponent::name));

        let configured: serde_json::Map<String, serde_json::Value> =
            settings.get("config_variables").unwrap_or_default();
        let mut variables = serde_json::Map::new();
        if append_entry {
            variables.insert("serialno".into(), json!(environment.serial_no));
        }
        variables.insert("scan_title".into(), json!(environment.title));
        variables.extend(configured.clone());
        let run_variables = RunVariables {
            service,
            restore: serde_json::Value::Object(configured),
        };
        service.set_config_variables(&serde_json::Value::Object(variables))?;

        info!(components = ?components, "building schema");
        let schema = service.build_schema(&components)?;
        drop(run_variables);
        drop(dynamic);
        Ok(schema)
    }

    /// INIT and FINAL payload: custom data, then `fields`, then `data_record`.
    fn entry_payload(&self, fields: serde_json::Value) -> serde_json::Value {
        let mut data = serde_json::Map::new();
        for (name, value) in &self.user_data {
            data.insert(name.clone(), value.clone());
        }
        if let serde_json::Value::Object(fields) = fields {
            data.extend(fields);
        }
        data.extend(self.data_record.clone());
        json!({ "data": data })
    }

    /// STEP payload: the point's values, completed by `data_record` keys the point
    /// does not carry.
    fn step_payload(&self, record: &Record) -> serde_json::Value {
        let mut payload = record.to_payload();
        if let Some(serde_json::Value::Object(data)) = payload.get_mut("data") {
            for (name, value) in &self.data_record {
                data.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
        payload
    }
}

impl Backend for NxsBackend {
    fn start(&mut self, ctx: &RecorderContext, environment: &Environment) -> RecorderResult<()> {
        let (configuration, writer) = services(ctx)?;
        let settings = ctx.settings(environment);
        let append_entry = settings.get_or("append_entry", ctx.config.append_entry);
        self.data_record = settings.get("data_record").unwrap_or_default();
        let path = output_path(&self.base, environment.serial_no, !append_entry);

        let schema = self.build_schema(ctx, configuration.as_ref(), environment, append_entry)?;
        debug!(bytes = schema.len(), "schema received");

        writer.open_file(&path, &schema)?;
        self.stage = Stage::FileOpen;
        self.path = Some(path);

        let payload = self.entry_payload(json!({
            "start_time": timestamp(&environment.start_time),
            "serialno": environment.serial_no,
            "scan_title": environment.title,
        }));
        writer.open_entry(&payload)?;
        self.stage = Stage::EntryOpen;
        Ok(())
    }

    fn write_record(&mut self, ctx: &RecorderContext, record: &Record) -> RecorderResult<()> {
        let (_, writer) = services(ctx)?;
        writer.record(&self.step_payload(record))?;
        Ok(())
    }

    fn end(&mut self, ctx: &RecorderContext, environment: &Environment) -> RecorderResult<()> {
        let (_, writer) = services(ctx)?;
        let payload = self.entry_payload(json!({ "end_time": timestamp(&end_time(environment)) }));
        writer.close_entry(&payload)?;
        self.stage = Stage::FileOpen;
        writer.close_file()?;
        self.stage = Stage::Closed;
        Ok(())
    }

    fn abort(&mut self, ctx: &RecorderContext) {
        let Some(writer) = ctx.writer.as_ref() else {
            return;
        };
        if self.stage == Stage::EntryOpen {
            if let Err(e) = writer.close_entry(&self.entry_payload(json!({}))) {
                warn!(error = %e, "closing entry after failure");
            }
        }
        if self.stage != Stage::Closed {
            if let Err(e) = writer.close_file() {
                warn!(error = %e, "closing file after failure");
            }
        }
        self.stage = Stage::Closed;
    }

    fn add_custom_data(
        &mut self,
        _ctx: &RecorderContext,
        name: &str,
        value: &Value,
        options: &CustomDataOptions,
    ) -> RecorderResult<()> {
        if options.remove {
            if self.user_data.remove(name).is_some() {
                debug!(name, "custom data removed");
            }
        } else {
            self.user_data
                .insert(name.to_string(), serde_json::Value::from(value.clone()));
        }
        Ok(())
    }

    fn output_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_carry_microseconds_and_offset() {
        let t = DateTime::parse_from_rfc3339("2026-03-01T12:00:00.25+01:00").unwrap();
        assert_eq!(timestamp(&t), "2026-03-01T12:00:00.250000+0100");
    }

    #[test]
    fn entry_payload_merges_custom_data() {
        let mut backend = NxsBackend::new(Path::new("/data/scan.nxs"));
        backend
            .add_custom_data(
                &RecorderContext::default(),
                "sample",
                &Value::from("Si"),
                &CustomDataOptions::default(),
            )
            .unwrap();
        let payload = backend.entry_payload(json!({ "serialno": 3 }));
        assert_eq!(payload, json!({ "data": { "sample": "Si", "serialno": 3 } }));
    }

    #[test]
    fn data_record_completes_step_payload_without_overriding_points() {
        let mut backend = NxsBackend::new(Path::new("/data/scan.nxs"));
        backend.data_record = json!({ "mot1": -1.0, "energy": 8.0 })
            .as_object()
            .cloned()
            .unwrap();
        let record = Record::new(0).with("mot1", 0.5);
        let payload = backend.step_payload(&record);
        assert_eq!(payload["data"]["mot1"], json!(0.5));
        assert_eq!(payload["data"]["energy"], json!(8.0));

        let entry = backend.entry_payload(json!({ "energy": 1.0 }));
        assert_eq!(entry["data"]["energy"], json!(8.0));
    }

    #[test]
    fn removing_custom_data_drops_the_key() {
        let ctx = RecorderContext::default();
        let mut backend = NxsBackend::new(Path::new("/data/scan.nxs"));
        backend
            .add_custom_data(&ctx, "sample", &Value::from("Si"), &CustomDataOptions::default())
            .unwrap();
        let remove = CustomDataOptions {
            remove: true,
            ..CustomDataOptions::default()
        };
        backend.add_custom_data(&ctx, "sample", &Value::Null, &remove).unwrap();
        backend.add_custom_data(&ctx, "never_added", &Value::Null, &remove).unwrap();
        assert_eq!(backend.entry_payload(json!({})), json!({ "data": {} }));
    }
}
