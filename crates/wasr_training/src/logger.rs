//! Per-run log directories and JSONL metric streams.
//!
//! Each run gets `<output-dir>/logs/<model-name>/version_K/` with a
//! hyperparameter record, an append-only metrics stream, and a checkpoints
//! subdirectory. Version numbering continues from whatever already exists.

use crate::checkpoint::SubstrateError;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct RunLogger {
    run_dir: PathBuf,
    metrics_path: PathBuf,
}

impl RunLogger {
    pub fn create(output_dir: &Path, model_name: &str) -> Result<Self, SubstrateError> {
        let base = output_dir.join("logs").join(model_name);
        fs::create_dir_all(&base).map_err(|source| SubstrateError::Io {
            path: base.clone(),
            source,
        })?;
        let version = next_version(&base).map_err(|source| SubstrateError::Io {
            path: base.clone(),
            source,
        })?;
        let run_dir = base.join(format!("version_{version}"));
        fs::create_dir_all(run_dir.join("checkpoints")).map_err(|source| SubstrateError::Io {
            path: run_dir.clone(),
            source,
        })?;
        println!("[logger] run directory {}", run_dir.display());
        let metrics_path = run_dir.join("metrics.jsonl");
        Ok(Self {
            run_dir,
            metrics_path,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.run_dir.join("checkpoints")
    }

    pub fn log_hparams<T: Serialize>(&self, hparams: &T) -> Result<(), SubstrateError> {
        let path = self.run_dir.join("hparams.json");
        let raw = serde_json::to_vec_pretty(hparams).map_err(|source| SubstrateError::State {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, raw).map_err(|source| SubstrateError::Io { path, source })?;
        Ok(())
    }

    /// Append one scalar to the metrics stream. Logging is best-effort; a
    /// failed write warns instead of aborting the run.
    pub fn log_scalar(&self, step: usize, epoch: usize, name: &str, value: f64) {
        let line = json!({
            "step": step,
            "epoch": epoch,
            "name": name,
            "value": value,
        });
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.metrics_path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(e) = result {
            eprintln!("[logger] cannot append to {}: {e}", self.metrics_path.display());
        }
    }

    pub fn log_metrics(&self, step: usize, epoch: usize, metrics: &BTreeMap<String, f64>) {
        for (name, value) in metrics {
            self.log_scalar(step, epoch, name, *value);
        }
    }
}

fn next_version(base: &Path) -> std::io::Result<usize> {
    let mut next = 0;
    for entry in fs::read_dir(base)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(rest) = name.to_string_lossy().strip_prefix("version_").map(String::from) else {
            continue;
        };
        if let Ok(index) = rest.parse::<usize>() {
            next = next.max(index + 1);
        }
    }
    Ok(next)
}
