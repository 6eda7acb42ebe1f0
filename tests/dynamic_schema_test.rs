//! Dynamic-schema (`.nxs`) recording through the configuration and writer services.
//!
//! - Data-source resolution and the composite schema request
//! - Lifetime of the dynamic component on success and on failure
//! - Payloads streamed to the container-writer service

use chrono::{DateTime, FixedOffset, TimeZone};
use scan_recorder::services::{
    ComponentEntry, MemoryConfigurationService, MemoryWriterService, StaticNamingService,
    WriterCall,
};
use scan_recorder::{
    CustomDataOptions, Descriptor, Environment, EnvironmentBuilder, Record, Recorder,
    RecorderConfig, RecorderContext, RecorderError, RecorderState, Value,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_test::traced_test;

fn start() -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .unwrap()
}

fn environment() -> Environment {
    EnvironmentBuilder::new(5, start())
        .title("ascan mot1 0 1 1 0.1")
        .descriptor(Descriptor::new("mot1", "float64"))
        .descriptor(Descriptor::new("det1", "float64"))
        .end_time(start() + chrono::Duration::seconds(10))
        .build()
}

fn catalog() -> MemoryConfigurationService {
    MemoryConfigurationService::new()
        .with_component("base", vec![ComponentEntry::step("mot1")])
        .with_component("slits", vec![ComponentEntry::step("s1gap")])
}

fn config() -> RecorderConfig {
    RecorderConfig {
        user_components: vec!["base".into()],
        ..RecorderConfig::default()
    }
}

struct Harness {
    configuration: Arc<MemoryConfigurationService>,
    writer: Arc<MemoryWriterService>,
    recorder: Recorder,
}

fn harness(
    configuration: MemoryConfigurationService,
    writer: MemoryWriterService,
    config: RecorderConfig,
) -> Harness {
    let configuration = Arc::new(configuration);
    let writer = Arc::new(writer);
    let context = RecorderContext::new(config)
        .with_naming(Arc::new(StaticNamingService::new()))
        .with_configuration(configuration.clone())
        .with_writer(writer.clone());
    Harness {
        configuration,
        writer,
        recorder: Recorder::new("scan.nxs", context),
    }
}

fn points() -> Vec<Record> {
    vec![
        Record::new(0).with("mot1", 0.0).with("det1", 10.5),
        Record::new(1).with("mot1", 1.0).with("det1", 11.2),
    ]
}

#[test]
fn test_dynamic_component_covers_unsupplied_channel() {
    let mut h = harness(catalog(), MemoryWriterService::new(), config());
    let env = environment();
    h.recorder.start(&env).unwrap();

    assert_eq!(h.configuration.transient_created(), 1);
    assert!(h.configuration.transient_components().is_empty());
    assert_eq!(
        h.configuration.schema_requests(),
        vec![vec!["__dynamic_component_1__".to_string(), "base".to_string()]]
    );

    let calls = h.writer.calls();
    match &calls[0] {
        WriterCall::OpenFile { path, schema } => {
            assert_eq!(path, &PathBuf::from("scan.nxs"));
            assert!(schema.contains("<datasource name=\"det1\"/>"));
            assert!(schema.contains("<datasource name=\"mot1\"/>"));
        }
        other => panic!("unexpected first call {other:?}"),
    }
    assert_eq!(
        calls[1],
        WriterCall::OpenEntry(json!({
            "data": {
                "start_time": "2026-03-01T12:00:00.000000+0000",
                "serialno": 5,
                "scan_title": "ascan mot1 0 1 1 0.1",
            }
        }))
    );
}

#[test]
fn test_full_run_streams_payloads() {
    let mut h = harness(catalog(), MemoryWriterService::new(), config());
    let env = environment();
    h.recorder.start(&env).unwrap();
    for record in points() {
        h.recorder.write_record(&record).unwrap();
    }
    h.recorder.end(&env).unwrap();

    assert_eq!(
        h.writer.records(),
        vec![
            json!({ "data": { "mot1": 0.0, "det1": 10.5 } }),
            json!({ "data": { "mot1": 1.0, "det1": 11.2 } }),
        ]
    );
    let calls = h.writer.calls();
    assert_eq!(
        calls[calls.len() - 2],
        WriterCall::CloseEntry(json!({ "data": { "end_time": "2026-03-01T12:00:10.000000+0000" } }))
    );
    assert_eq!(calls[calls.len() - 1], WriterCall::CloseFile);
    assert_eq!(h.recorder.state(), RecorderState::Ended);
}

#[test]
fn test_schema_failure_still_removes_dynamic_component() {
    let mut h = harness(
        catalog().rejecting_schema(),
        MemoryWriterService::new(),
        config(),
    );
    let err = h.recorder.start(&environment()).unwrap_err();

    assert!(matches!(err, RecorderError::Service(_)));
    assert_eq!(h.recorder.state(), RecorderState::Failed);
    assert_eq!(h.configuration.transient_created(), 1);
    assert!(h.configuration.transient_components().is_empty());
    assert!(h.writer.calls().is_empty());
}

#[test]
fn test_record_failure_closes_entry_and_file() {
    let mut h = harness(catalog(), MemoryWriterService::rejecting_records(), config());
    let env = environment();
    h.recorder.start(&env).unwrap();
    let err = h.recorder.write_record(&points()[0]).unwrap_err();

    assert!(matches!(err, RecorderError::Service(_)));
    assert_eq!(h.recorder.state(), RecorderState::Failed);
    let calls = h.writer.calls();
    assert!(matches!(calls[calls.len() - 2], WriterCall::CloseEntry(_)));
    assert_eq!(calls[calls.len() - 1], WriterCall::CloseFile);
    assert!(h.configuration.transient_components().is_empty());
}

#[test]
fn test_unreachable_configuration_service_is_fatal() {
    let mut h = harness(catalog().offline(), MemoryWriterService::new(), config());
    let err = h.recorder.start(&environment()).unwrap_err();
    assert!(matches!(err, RecorderError::Service(_)));
    assert!(err.is_fatal());
    assert_eq!(h.configuration.transient_created(), 0);
    assert!(h.writer.calls().is_empty());
}

#[test]
#[traced_test]
fn test_disabled_fallback_warns_and_skips_dynamic_component() {
    let config = RecorderConfig {
        dynamic_components: false,
        ..config()
    };
    let mut h = harness(catalog(), MemoryWriterService::new(), config);
    h.recorder.start(&environment()).unwrap();

    assert_eq!(h.configuration.transient_created(), 0);
    assert_eq!(h.configuration.schema_requests(), vec![vec!["base".to_string()]]);
    assert!(logs_contain("channel not covered by any component and will not be stored"));
    assert!(logs_contain("det1"));
}

#[test]
fn test_unrestricted_selection_persists_supplying_components() {
    let env = EnvironmentBuilder::new(5, start())
        .descriptor(Descriptor::new("mot1", "float64"))
        .descriptor(Descriptor::new("s1gap", "float64"))
        .build();
    let config = RecorderConfig {
        restrict_to_user_components: false,
        ..config()
    };
    let mut h = harness(catalog(), MemoryWriterService::new(), config);
    h.recorder.start(&env).unwrap();

    assert_eq!(h.configuration.transient_created(), 0);
    assert_eq!(
        h.configuration.schema_requests(),
        vec![vec!["base".to_string(), "slits".to_string()]]
    );
}

#[test]
fn test_numbered_file_when_not_appending() {
    let config = RecorderConfig {
        append_entry: false,
        ..config()
    };
    let mut h = harness(catalog(), MemoryWriterService::new(), config);
    h.recorder.start(&environment()).unwrap();
    assert_eq!(
        h.recorder.output_path(),
        Some(PathBuf::from("scan_00005.nxs").as_path())
    );
}

#[test]
fn test_settings_come_from_service_and_overrides() {
    let configuration = catalog().with_setting("user_components", json!("[\"slits\"]"));
    let env = EnvironmentBuilder::new(5, start())
        .descriptor(Descriptor::new("mot1", "float64"))
        .override_setting("dynamic_components", json!(false))
        .build();
    let mut h = harness(configuration, MemoryWriterService::new(), config());
    h.recorder.start(&env).unwrap();

    assert_eq!(h.configuration.transient_created(), 0);
    assert_eq!(h.configuration.schema_requests(), vec![vec!["slits".to_string()]]);
}

#[test]
fn test_custom_data_becomes_record_key() {
    let mut h = harness(catalog(), MemoryWriterService::new(), config());
    let env = environment();
    h.recorder.start(&env).unwrap();
    h.recorder.end(&env).unwrap();
    h.recorder
        .add_custom_data("sample", &Value::from("Si"), &CustomDataOptions::default())
        .unwrap();

    // The next run requests the key and carries the value in its entry payloads.
    h.recorder.start(&env).unwrap();
    assert_eq!(h.configuration.transient_created(), 2);
    let open_entries: Vec<_> = h
        .writer
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            WriterCall::OpenEntry(payload) => Some(payload),
            _ => None,
        })
        .collect();
    assert_eq!(open_entries[1]["data"]["sample"], json!("Si"));
}

#[test]
fn test_automatic_components_and_extra_data_sources_are_persisted() {
    let config = RecorderConfig {
        automatic_components: vec!["slits".into()],
        ..config()
    };
    let env = EnvironmentBuilder::new(5, start())
        .descriptor(Descriptor::new("mot1", "float64"))
        .override_setting("data_sources", json!(["s1gap", "extra"]))
        .build();
    let mut h = harness(catalog(), MemoryWriterService::new(), config);
    h.recorder.start(&env).unwrap();

    assert_eq!(
        h.configuration.schema_requests(),
        vec![vec![
            "__dynamic_component_1__".to_string(),
            "base".to_string(),
            "slits".to_string(),
        ]]
    );
    match &h.writer.calls()[0] {
        WriterCall::OpenFile { schema, .. } => {
            assert!(schema.contains("<datasource name=\"s1gap\"/>"));
            assert!(schema.contains("<datasource name=\"extra\"/>"));
        }
        other => panic!("unexpected first call {other:?}"),
    }
}

#[test]
fn test_data_record_is_merged_into_every_payload() {
    let configuration = catalog().with_setting("data_record", json!("{\"energy\": 8.0}"));
    let mut h = harness(configuration, MemoryWriterService::new(), config());
    let env = environment();
    h.recorder.start(&env).unwrap();
    for record in points() {
        h.recorder.write_record(&record).unwrap();
    }
    h.recorder.end(&env).unwrap();

    let calls = h.writer.calls();
    let energies: Vec<_> = calls
        .iter()
        .filter_map(|call| match call {
            WriterCall::OpenEntry(p) | WriterCall::Record(p) | WriterCall::CloseEntry(p) => {
                Some(p["data"]["energy"].clone())
            }
            _ => None,
        })
        .collect();
    assert_eq!(energies, vec![json!(8.0); 4]);
    assert_eq!(h.writer.records()[1]["data"]["det1"], json!(11.2));
}

#[test]
fn test_config_variables_apply_only_while_schema_is_built() {
    let env = EnvironmentBuilder::new(5, start())
        .title("ascan mot1 0 1 1 0.1")
        .descriptor(Descriptor::new("mot1", "float64"))
        .override_setting("config_variables", json!({ "beamtime": "42" }))
        .build();
    let mut h = harness(catalog(), MemoryWriterService::new(), config());
    h.recorder.start(&env).unwrap();

    assert_eq!(
        h.configuration.config_variable_history(),
        vec![
            json!({ "serialno": 5, "scan_title": "ascan mot1 0 1 1 0.1", "beamtime": "42" }),
            json!({ "beamtime": "42" }),
        ]
    );
}

#[test]
fn test_config_variables_restored_when_schema_fails() {
    let mut h = harness(
        catalog().rejecting_schema(),
        MemoryWriterService::new(),
        RecorderConfig {
            append_entry: false,
            ..config()
        },
    );
    assert!(h.recorder.start(&environment()).is_err());

    let history = h.configuration.config_variable_history();
    assert_eq!(history[0], json!({ "scan_title": "ascan mot1 0 1 1 0.1" }));
    assert_eq!(h.configuration.config_variables(), Some(json!({})));
}

#[test]
fn test_removed_custom_data_is_not_requested_again() {
    let mut h = harness(catalog(), MemoryWriterService::new(), config());
    let env = EnvironmentBuilder::new(5, start())
        .descriptor(Descriptor::new("mot1", "float64"))
        .build();
    h.recorder.start(&env).unwrap();
    h.recorder.end(&env).unwrap();
    h.recorder
        .add_custom_data("sample", &Value::from("Si"), &CustomDataOptions::default())
        .unwrap();
    h.recorder
        .add_custom_data(
            "sample",
            &Value::Null,
            &CustomDataOptions {
                remove: true,
                ..CustomDataOptions::default()
            },
        )
        .unwrap();

    // mot1 is supplied by `base` and no record key is pending, so no dynamic component.
    h.recorder.start(&env).unwrap();
    assert_eq!(h.configuration.transient_created(), 0);
    let last_entry = h
        .writer
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            WriterCall::OpenEntry(payload) => Some(payload),
            _ => None,
        })
        .last()
        .unwrap();
    assert!(last_entry["data"].get("sample").is_none());
}

#[test]
fn test_missing_services_are_a_configuration_error() {
    let mut recorder = Recorder::new("scan.nxs", RecorderContext::default());
    let err = recorder.start(&environment()).unwrap_err();
    assert!(matches!(err, RecorderError::Configuration(_)));
}
