//! CLI entry point for scan-recorder
//!
//! Replays a recorded run through a [`Recorder`]:
//!
//! ```bash
//! scan-recorder record --run run.json --output /data/scan.spec
//! scan-recorder record --run run.json --output /data/scan.fio --config recorder.toml
//! scan-recorder formats
//! ```
//!
//! The run file is JSON with the run environment, the records in acquisition order and
//! optional custom data:
//!
//! ```json
//! { "environment": { "serial_no": 1, ... }, "records": [ { "point_nb": 0, "data": {} } ] }
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scan_recorder::recorder::DataFormat;
use scan_recorder::{
    logging, CustomDataOptions, Environment, Record, Recorder, RecorderConfig, RecorderContext,
    Value,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "scan-recorder")]
#[command(about = "Persist scan records as flat tables, sectioned ASCII or containers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a recorded run to an output file
    Record {
        /// JSON run file
        #[arg(long)]
        run: PathBuf,

        /// Output path; the extension selects the format
        #[arg(long)]
        output: PathBuf,

        /// Recorder configuration file
        #[arg(long, default_value = "config/recorder.toml")]
        config: PathBuf,
    },

    /// List the supported formats and their extensions
    Formats,
}

#[derive(Deserialize)]
struct RunFile {
    environment: Environment,
    #[serde(default)]
    records: Vec<Record>,
    #[serde(default)]
    custom_data: BTreeMap<String, Value>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Record {
            run,
            output,
            config,
        } => record(run, output, config),
        Commands::Formats => {
            for format in DataFormat::ALL {
                println!(
                    "{:<6} .{:<10} {}",
                    format.to_string(),
                    format.extensions().join(", ."),
                    format.description()
                );
            }
            Ok(())
        }
    }
}

fn record(run: PathBuf, output: PathBuf, config: PathBuf) -> Result<()> {
    let config = RecorderConfig::load_from(&config)
        .with_context(|| format!("loading configuration from {}", config.display()))?;
    config.validate()?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let text = std::fs::read_to_string(&run)
        .with_context(|| format!("reading run file {}", run.display()))?;
    let run_file: RunFile = serde_json::from_str(&text)
        .with_context(|| format!("parsing run file {}", run.display()))?;
    let mut environment = run_file.environment;

    let mut recorder = Recorder::new(&output, RecorderContext::new(config));
    info!(output = %output.display(), format = %recorder.format(), "replaying run");

    recorder.start(&environment)?;
    for (name, value) in &run_file.custom_data {
        recorder.add_custom_data(name, value, &CustomDataOptions::default())?;
    }
    for record in &run_file.records {
        recorder.write_record(record)?;
    }
    if environment.end_time.is_none() {
        environment.end_time = Some(chrono::Local::now().fixed_offset());
    }
    recorder.end(&environment)?;

    let written = recorder.output_path().unwrap_or(&output);
    println!(
        "Wrote {} records of scan {} to {}",
        run_file.records.len(),
        environment.serial_no,
        written.display()
    );
    Ok(())
}
