//! Sectioned ASCII (`.fio`) with per-point sidecar files.
//!
//! Each run gets its own numbered file, `<stem>_<serial:05>.fio`, made of a comment,
//! a parameter and a data section. Scalar channels are columns of the data section;
//! the record timestamp is always the last column. One-dimensional channels (MCA
//! traces) do not fit a column, so every point writes them to a sidecar file
//! `<stem>_<serial:05>_mca_s<point+1>.fio` in the directory `<stem>_<serial:05>/`.

use super::{end_time, ensure_directory, Backend, RecorderContext};
use crate::alias::AliasResolver;
use crate::descriptor::ElementType;
use crate::environment::Environment;
use crate::error::RecorderResult;
use crate::format::{c_general, ctime, python_float};
use crate::naming::output_path;
use crate::record::Record;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const POINT_NB: &str = "point_nb";
const TIMESTAMP: &str = "timestamp";

#[derive(Debug, Clone)]
struct Trace {
    name: String,
    alias: String,
}

/// Sectioned-ASCII writer.
#[derive(Debug)]
pub struct FioBackend {
    base: PathBuf,
    path: Option<PathBuf>,
    sidecar_dir: Option<PathBuf>,
    file: Option<BufWriter<File>>,
    serial: u64,
    columns: Vec<String>,
    traces: Vec<Trace>,
    position_channel: Option<String>,
    sample_time: Option<f64>,
}

impl FioBackend {
    pub fn new(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            path: None,
            sidecar_dir: None,
            file: None,
            serial: 0,
            columns: Vec::new(),
            traces: Vec::new(),
            position_channel: None,
            sample_time: None,
        }
    }

    fn write(&mut self, text: &str) -> RecorderResult<()> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(text.as_bytes())?;
            file.flush()?;
        }
        Ok(())
    }

    /// Stem of the configured base name, used to name sidecar files.
    fn base_stem(&self) -> String {
        self.base
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .and_then(|n| n.split('.').next().map(str::to_string))
            .unwrap_or_default()
    }

    fn write_sidecar(&self, record: &Record) -> RecorderResult<()> {
        let Some(dir) = self.sidecar_dir.as_deref() else {
            return Ok(());
        };
        ensure_directory(dir)?;
        let name = format!(
            "{}_{:05}_mca_s{}.fio",
            self.base_stem(),
            self.serial,
            record.point_nb + 1
        );

        let position = self
            .position_channel
            .as_deref()
            .and_then(|channel| record.reading(channel))
            .and_then(|v| v.as_f64())
            .unwrap_or(f64::NAN);
        let mut text = format!(
            "!\n! Comments\n!\n%c\n Position {}, Index {} \n",
            c_general(position),
            record.point_nb
        );
        text.push_str(&format!(
            "!\n! Parameter \n%p\n Sample_time = {} \n",
            c_general(self.sample_time.unwrap_or(f64::NAN))
        ));
        text.push_str("!\n! Data \n%d \n");
        for (i, trace) in self.traces.iter().enumerate() {
            text.push_str(&format!(" Col {} {} FLOAT \n", i + 1, trace.alias));
        }

        let first_present = self
            .traces
            .first()
            .is_some_and(|t| record.reading(&t.name).is_some());
        if first_present {
            let values: Vec<Vec<f64>> = self
                .traces
                .iter()
                .map(|t| record.reading(&t.name).map(|v| v.elements()).unwrap_or_default())
                .collect();
            let longest = values.iter().map(Vec::len).max().unwrap_or(0);
            for i in 0..longest {
                let row: String = values
                    .iter()
                    .map(|trace| match trace.get(i) {
                        Some(v) => format!(" {}", python_float(*v)),
                        None => " 0".to_string(),
                    })
                    .collect();
                text.push_str(&row);
                text.push('\n');
            }
        }

        let mut sidecar = BufWriter::new(File::create(dir.join(name))?);
        sidecar.write_all(text.as_bytes())?;
        sidecar.flush()?;
        Ok(())
    }
}

impl Backend for FioBackend {
    fn start(&mut self, ctx: &RecorderContext, environment: &Environment) -> RecorderResult<()> {
        let path = output_path(&self.base, environment.serial_no, true);
        self.sidecar_dir = Some(path.with_extension(""));
        self.serial = environment.serial_no;
        self.sample_time = environment.sample_time();
        self.position_channel = environment.moveables.first().cloned();

        let aliases = AliasResolver::new(ctx.naming.clone());
        self.columns.clear();
        self.traces.clear();
        let mut column_lines = String::new();
        for descriptor in &environment.descriptors {
            if !descriptor.dtype.is_supported() {
                info!(
                    channel = %descriptor.name,
                    dtype = %descriptor.dtype,
                    "channel will not be stored: type not supported"
                );
                continue;
            }
            if descriptor.rank() == 1 && !descriptor.is_scalar() {
                self.traces.push(Trace {
                    name: descriptor.name.clone(),
                    alias: aliases.display_name(&descriptor.name),
                });
                continue;
            }
            if !descriptor.is_scalar() {
                info!(channel = %descriptor.name, "channel will not be stored: rank not supported");
                continue;
            }
            if descriptor.name == POINT_NB || descriptor.name == TIMESTAMP {
                continue;
            }
            let kind = if descriptor.dtype == ElementType::Float64 {
                "DOUBLE"
            } else {
                "FLOAT"
            };
            self.columns.push(descriptor.name.clone());
            column_lines.push_str(&format!(
                " Col {} {} {}\n",
                self.columns.len(),
                descriptor.display_label(),
                kind
            ));
        }
        column_lines.push_str(&format!(" Col {} {} DOUBLE\n", self.columns.len() + 1, TIMESTAMP));

        let mut text = format!(
            "!\n! Comments\n!\n%c\n {}\nuser {} Acquisition started at {}\n",
            environment.title,
            environment.user,
            ctime(&environment.start_time)
        );
        text.push_str("!\n! Parameter\n!\n%p\n");
        if ctx
            .settings(environment)
            .get_or("write_positioner_positions", false)
        {
            let mut positioners = environment.positioners.clone();
            positioners.sort_by(|a, b| a.name.cmp(&b.name));
            for positioner in positioners {
                let value = positioner
                    .position
                    .map(c_general)
                    .unwrap_or_else(|| "nan".to_string());
                text.push_str(&format!("{} = {}\n", positioner.name, value));
            }
        }
        text.push_str("!\n! Data\n!\n%d\n");
        text.push_str(&column_lines);

        self.file = Some(BufWriter::new(File::create(&path)?));
        debug!(path = %path.display(), columns = self.columns.len(), traces = self.traces.len(), "fio file opened");
        self.path = Some(path);
        self.write(&text)
    }

    fn write_record(&mut self, _ctx: &RecorderContext, record: &Record) -> RecorderResult<()> {
        let mut line: String = self
            .columns
            .iter()
            .map(|name| format!(" {}", record.text(name)))
            .collect();
        line.push_str(&format!(" {}\n", record.text(TIMESTAMP)));
        self.write(&line)?;

        if !self.traces.is_empty() {
            self.write_sidecar(record)?;
        }
        Ok(())
    }

    fn end(&mut self, _ctx: &RecorderContext, environment: &Environment) -> RecorderResult<()> {
        let trailer = format!("! Acquisition ended at {}\n", ctime(&end_time(environment)));
        self.write(&trailer)?;
        self.file = None;
        Ok(())
    }

    fn abort(&mut self, _ctx: &RecorderContext) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
    }

    fn output_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_stem_stops_at_first_dot() {
        let backend = FioBackend::new(Path::new("/data/scan.v2.fio"));
        assert_eq!(backend.base_stem(), "scan");
    }
}
