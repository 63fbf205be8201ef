//! Portable weight blobs and the flat parameter map models restore from.
//!
//! Blobs are JSON, either a bare parameter map or a full training checkpoint
//! wrapper holding the map under a `model` key. Restores are all-or-nothing so
//! a blob from the wrong architecture is rejected rather than half-applied.

use burn::module::Param;
use burn::nn::conv::Conv2d;
use burn::nn::BatchNorm;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type ParamMap = BTreeMap<String, TensorEntry>;

#[derive(Debug, Error)]
pub enum WeightLoadError {
    #[error("cannot read weights at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse weights at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("weight blob is missing parameter {name}")]
    Missing { name: String },
    #[error("parameter {name} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("weight blob has entries the model does not use: {names:?}")]
    Unexpected { names: Vec<String> },
}

/// One stored parameter: shape plus row-major f32 values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorEntry {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// The two on-disk shapes a weight file can take. Checkpoint wrappers are
/// tried first so a `model` key is never mistaken for a parameter name.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeightBlob {
    Checkpoint { model: ParamMap },
    Bare(ParamMap),
}

impl WeightBlob {
    pub fn load(path: &Path) -> Result<ParamMap, WeightLoadError> {
        let raw = std::fs::read(path).map_err(|source| WeightLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let blob: WeightBlob =
            serde_json::from_slice(&raw).map_err(|source| WeightLoadError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(blob.into_params())
    }

    pub fn into_params(self) -> ParamMap {
        match self {
            WeightBlob::Checkpoint { model } => model,
            WeightBlob::Bare(map) => map,
        }
    }
}

/// Consumes entries from a parameter map, tracking which names were used so
/// `finish` can reject leftovers.
pub struct ParamReader<'a> {
    map: &'a ParamMap,
    taken: BTreeSet<String>,
}

impl<'a> ParamReader<'a> {
    pub fn new(map: &'a ParamMap) -> Self {
        Self {
            map,
            taken: BTreeSet::new(),
        }
    }

    pub fn tensor<B: Backend, const D: usize>(
        &mut self,
        name: &str,
        expected: [usize; D],
        device: &B::Device,
    ) -> Result<Tensor<B, D>, WeightLoadError> {
        let entry = self.map.get(name).ok_or_else(|| WeightLoadError::Missing {
            name: name.to_string(),
        })?;
        if entry.shape != expected {
            return Err(WeightLoadError::ShapeMismatch {
                name: name.to_string(),
                expected: expected.to_vec(),
                found: entry.shape.clone(),
            });
        }
        self.taken.insert(name.to_string());
        Ok(Tensor::from_data(
            TensorData::new(entry.data.clone(), expected),
            device,
        ))
    }

    /// Replace a convolution's weight (and bias, when present).
    pub fn conv<B: Backend>(
        &mut self,
        prefix: &str,
        mut conv: Conv2d<B>,
        device: &B::Device,
    ) -> Result<Conv2d<B>, WeightLoadError> {
        let dims = conv.weight.val().dims();
        let weight = self.tensor::<B, 4>(&format!("{prefix}.weight"), dims, device)?;
        conv.weight = Param::from_tensor(weight);
        if let Some(bias) = conv.bias.take() {
            let dims = bias.val().dims();
            let bias = self.tensor::<B, 1>(&format!("{prefix}.bias"), dims, device)?;
            conv.bias = Some(Param::from_tensor(bias));
        }
        Ok(conv)
    }

    /// Replace a batch norm's affine parameters.
    pub fn norm<B: Backend>(
        &mut self,
        prefix: &str,
        mut norm: BatchNorm<B, 2>,
        device: &B::Device,
    ) -> Result<BatchNorm<B, 2>, WeightLoadError> {
        let dims = norm.gamma.val().dims();
        let gamma = self.tensor::<B, 1>(&format!("{prefix}.gamma"), dims, device)?;
        norm.gamma = Param::from_tensor(gamma);
        let dims = norm.beta.val().dims();
        let beta = self.tensor::<B, 1>(&format!("{prefix}.beta"), dims, device)?;
        norm.beta = Param::from_tensor(beta);
        Ok(norm)
    }

    pub fn finish(self) -> Result<(), WeightLoadError> {
        let leftover: Vec<String> = self
            .map
            .keys()
            .filter(|name| !self.taken.contains(*name))
            .cloned()
            .collect();
        if leftover.is_empty() {
            Ok(())
        } else {
            Err(WeightLoadError::Unexpected { names: leftover })
        }
    }
}

/// Builds a parameter map, mirror of [`ParamReader`].
#[derive(Default)]
pub struct ParamWriter {
    map: ParamMap,
}

impl ParamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tensor<B: Backend, const D: usize>(&mut self, name: &str, tensor: &Tensor<B, D>) {
        let shape = tensor.dims().to_vec();
        let data = tensor.to_data().to_vec::<f32>().unwrap_or_default();
        self.map.insert(name.to_string(), TensorEntry { shape, data });
    }

    pub fn conv<B: Backend>(&mut self, prefix: &str, conv: &Conv2d<B>) {
        self.tensor(&format!("{prefix}.weight"), &conv.weight.val());
        if let Some(bias) = &conv.bias {
            self.tensor(&format!("{prefix}.bias"), &bias.val());
        }
    }

    pub fn norm<B: Backend>(&mut self, prefix: &str, norm: &BatchNorm<B, 2>) {
        self.tensor(&format!("{prefix}.gamma"), &norm.gamma.val());
        self.tensor(&format!("{prefix}.beta"), &norm.beta.val());
    }

    pub fn finish(self) -> ParamMap {
        self.map
    }
}
