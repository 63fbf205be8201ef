//! Full training state persistence: model record, optimizer record, and a
//! JSON trainer-state sidecar, in one directory per checkpoint.

use crate::config::Precision;
use crate::AdBackend;
use burn::module::{AutodiffModule, Module};
use burn::optim::Optimizer;
use burn::record::{
    BinFileRecorder, FullPrecisionSettings, HalfPrecisionSettings, PrecisionSettings, Recorder,
};
use mastr_dataset::DataError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubstrateError {
    #[error("recorder failure at {path}: {source}")]
    Recorder {
        path: PathBuf,
        #[source]
        source: burn::record::RecorderError,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("trainer state error at {path}: {source}")]
    State {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("{0}")]
    Other(String),
}

/// Loop bookkeeping persisted alongside the model and optimizer records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerState {
    /// Next epoch to run.
    pub epoch: usize,
    pub global_step: usize,
    pub seed: u64,
    pub monitor: String,
    pub best_metric: Option<f64>,
    pub early_stop_best: Option<f64>,
    pub early_stop_stale: usize,
}

impl TrainerState {
    pub fn new(seed: u64, monitor: String) -> Self {
        Self {
            epoch: 0,
            global_step: 0,
            seed,
            monitor,
            best_metric: None,
            early_stop_best: None,
            early_stop_stale: 0,
        }
    }
}

pub fn save_checkpoint<M, O>(
    dir: &Path,
    model: &M,
    optim: &O,
    state: &TrainerState,
    precision: Precision,
) -> Result<(), SubstrateError>
where
    M: AutodiffModule<AdBackend>,
    O: Optimizer<M, AdBackend>,
{
    match precision {
        Precision::Full => save_with::<FullPrecisionSettings, M, O>(dir, model, optim, state),
        Precision::Half => save_with::<HalfPrecisionSettings, M, O>(dir, model, optim, state),
    }
}

fn save_with<S, M, O>(
    dir: &Path,
    model: &M,
    optim: &O,
    state: &TrainerState,
) -> Result<(), SubstrateError>
where
    S: PrecisionSettings,
    M: AutodiffModule<AdBackend>,
    O: Optimizer<M, AdBackend>,
{
    fs::create_dir_all(dir).map_err(|source| SubstrateError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let recorder = BinFileRecorder::<S>::new();
    let model_path = dir.join("model");
    recorder
        .record(model.clone().into_record(), model_path.clone())
        .map_err(|source| SubstrateError::Recorder {
            path: model_path,
            source,
        })?;
    let optim_path = dir.join("optim");
    recorder
        .record(optim.to_record(), optim_path.clone())
        .map_err(|source| SubstrateError::Recorder {
            path: optim_path,
            source,
        })?;
    let state_path = dir.join("state.json");
    let raw = serde_json::to_vec_pretty(state).map_err(|source| SubstrateError::State {
        path: state_path.clone(),
        source,
    })?;
    fs::write(&state_path, raw).map_err(|source| SubstrateError::Io {
        path: state_path,
        source,
    })?;
    Ok(())
}

pub fn load_checkpoint<M, O>(
    dir: &Path,
    model: M,
    optim: O,
    precision: Precision,
    device: &<AdBackend as burn::tensor::backend::Backend>::Device,
) -> Result<(M, O, TrainerState), SubstrateError>
where
    M: AutodiffModule<AdBackend>,
    O: Optimizer<M, AdBackend>,
{
    match precision {
        Precision::Full => load_with::<FullPrecisionSettings, M, O>(dir, model, optim, device),
        Precision::Half => load_with::<HalfPrecisionSettings, M, O>(dir, model, optim, device),
    }
}

fn load_with<S, M, O>(
    dir: &Path,
    model: M,
    optim: O,
    device: &<AdBackend as burn::tensor::backend::Backend>::Device,
) -> Result<(M, O, TrainerState), SubstrateError>
where
    S: PrecisionSettings,
    M: AutodiffModule<AdBackend>,
    O: Optimizer<M, AdBackend>,
{
    let recorder = BinFileRecorder::<S>::new();
    let model_path = dir.join("model");
    let model = model
        .load_file(model_path.clone(), &recorder, device)
        .map_err(|source| SubstrateError::Recorder {
            path: model_path,
            source,
        })?;
    let optim_path = dir.join("optim");
    let record: O::Record =
        recorder
            .load(optim_path.clone(), device)
            .map_err(|source| SubstrateError::Recorder {
                path: optim_path,
                source,
            })?;
    let optim = optim.load_record(record);
    let state_path = dir.join("state.json");
    let raw = fs::read(&state_path).map_err(|source| SubstrateError::Io {
        path: state_path.clone(),
        source,
    })?;
    let state: TrainerState =
        serde_json::from_slice(&raw).map_err(|source| SubstrateError::State {
            path: state_path,
            source,
        })?;
    Ok((model, optim, state))
}
