//! Recorder configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/recorder.toml` by default)
//! 2. Environment variables (prefixed with `SCAN_RECORDER_`)
//!
//! Every field has a default, so an absent file yields a usable configuration. The
//! values here are the last link of the settings chain (see [`crate::settings`]): a
//! per-run override or a setting published by the configuration service wins over them.
//!
//! # Example
//! ```no_run
//! use scan_recorder::config::RecorderConfig;
//!
//! let config = RecorderConfig::load_from("recorder.toml")?;
//! config.validate()?;
//! println!("compression level: {}", config.compression_level);
//! # Ok::<(), scan_recorder::error::RecorderError>(())
//! ```

use crate::error::{RecorderError, RecorderResult};
use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Recorder settings with their local defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: OutputFormat,
    /// Written as `program_name` in container entries.
    #[serde(default = "default_program_name")]
    pub program_name: String,
    /// Datasets whose per-point rank exceeds this are compressed; negative disables.
    #[serde(default = "default_compression_rank")]
    pub compression_rank: i32,
    /// Deflate level (0-9)
    #[serde(default = "default_compression_level")]
    pub compression_level: u8,
    /// Append entries to one file instead of numbering a file per run.
    #[serde(default = "default_true")]
    pub append_entry: bool,
    /// Create a dynamic component for channels no component supplies.
    #[serde(default = "default_true")]
    pub dynamic_components: bool,
    /// Count a channel as supplied only by user or mandatory components.
    #[serde(default = "default_true")]
    pub restrict_to_user_components: bool,
    /// Components selected by the operator.
    #[serde(default)]
    pub user_components: Vec<String>,
    /// Optional components allowed to supply channels; empty means all available.
    #[serde(default)]
    pub optional_components: Vec<String>,
    /// Components added by the control system itself, persisted like user components.
    #[serde(default)]
    pub automatic_components: Vec<String>,
    /// Data sources to store on top of the measured channels.
    #[serde(default)]
    pub data_sources: Vec<String>,
    /// Values merged into every payload sent to the container writer.
    #[serde(default)]
    pub data_record: serde_json::Map<String, serde_json::Value>,
    /// Variables substituted into component markup while the schema is built.
    #[serde(default)]
    pub config_variables: serde_json::Map<String, serde_json::Value>,
    /// Dump positioner positions into the `.fio` parameter section.
    #[serde(default)]
    pub write_positioner_positions: bool,
    /// Recreate existing container files instead of opening them read-write.
    #[serde(default)]
    pub overwrite: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_program_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_compression_rank() -> i32 {
    -1
}

fn default_compression_level() -> u8 {
    6
}

fn default_true() -> bool {
    true
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
            program_name: default_program_name(),
            compression_rank: default_compression_rank(),
            compression_level: default_compression_level(),
            append_entry: true,
            dynamic_components: true,
            restrict_to_user_components: true,
            user_components: Vec::new(),
            optional_components: Vec::new(),
            automatic_components: Vec::new(),
            data_sources: Vec::new(),
            data_record: serde_json::Map::new(),
            config_variables: serde_json::Map::new(),
            write_positioner_positions: false,
            overwrite: false,
        }
    }
}

impl RecorderConfig {
    /// Load configuration from `config/recorder.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `SCAN_RECORDER_`.
    /// Example: `SCAN_RECORDER_COMPRESSION_LEVEL=4`
    pub fn load() -> RecorderResult<Self> {
        Self::load_from("config/recorder.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> RecorderResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SCAN_RECORDER_"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> RecorderResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(RecorderError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.compression_level > 9 {
            return Err(RecorderError::Configuration(format!(
                "Invalid compression_level {}. Must be 0-9",
                self.compression_level
            )));
        }

        if self.program_name.trim().is_empty() {
            return Err(RecorderError::Configuration(
                "program_name must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Configuration as a JSON object keyed by field name.
    pub fn as_settings(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
