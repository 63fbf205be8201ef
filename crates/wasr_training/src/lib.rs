#![recursion_limit = "256"]

//! Training orchestration for maritime obstacle segmentation.
//!
//! The pipeline wires the dataset crate and the model crate into a manual
//! epoch loop: config resolution, data loaders, an SGD-with-poly-decay
//! optimized module, validation metrics, run logging, checkpointing, and
//! early stopping.

pub mod callbacks;
pub mod checkpoint;
pub mod config;
pub mod logger;
pub mod metrics;
pub mod pipeline;
pub mod run;
pub mod trainer;
pub mod wrapper;

pub use callbacks::{Checkpointer, EarlyStopping};
pub use checkpoint::{load_checkpoint, save_checkpoint, SubstrateError, TrainerState};
pub use config::{
    ConfigError, DeviceSpec, MonitorMode, Precision, RunConfig, TrainArgs,
};
pub use logger::RunLogger;
pub use metrics::MetricAccumulator;
pub use pipeline::{build_data_pipeline, DataPipeline};
pub use run::run_train;
pub use trainer::{assemble_trainer, FitOutcome, Trainer, TrainerSpec};
pub use wrapper::SegTrainModule;

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn::backend::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn::backend::NdArray<f32>;

pub type AdBackend = burn::backend::Autodiff<TrainBackend>;

pub type TrainDevice = <TrainBackend as burn::tensor::backend::Backend>::Device;

/// Map the resolved device selection onto concrete backend devices.
#[cfg(feature = "backend-wgpu")]
pub fn resolve_devices(spec: &DeviceSpec) -> Vec<TrainDevice> {
    use burn::backend::wgpu::WgpuDevice;
    match spec {
        DeviceSpec::All => vec![WgpuDevice::default()],
        DeviceSpec::Count(n) => (0..(*n).max(1)).map(WgpuDevice::DiscreteGpu).collect(),
        DeviceSpec::Ids(ids) => ids
            .iter()
            .map(|&id| WgpuDevice::DiscreteGpu(id))
            .collect(),
    }
}

/// Map the resolved device selection onto concrete backend devices.
///
/// The CPU backend has one physical device; explicit counts or id lists still
/// produce that many logical slots so the fan-out paths stay exercisable.
#[cfg(not(feature = "backend-wgpu"))]
pub fn resolve_devices(spec: &DeviceSpec) -> Vec<TrainDevice> {
    let count = match spec {
        DeviceSpec::All => 1,
        DeviceSpec::Count(n) => (*n).max(1),
        DeviceSpec::Ids(ids) => ids.len().max(1),
    };
    vec![TrainDevice::default(); count]
}
