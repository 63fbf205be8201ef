//! Burn ML models for maritime obstacle segmentation.
//!
//! This crate defines the segmentation architectures used for training:
//! - `WasrNet`: encoder-decoder network with optional IMU horizon fusion,
//!   in a deeper (resnet101-style) and a lighter (resnet50-style) layout.
//! - `DeepLabNet`: dilated-convolution baseline without IMU awareness.
//!
//! These are pure Burn Modules with no awareness of the training loop. The
//! training crate wraps them into an optimized module for fitting. All models
//! expose their parameters as a flat name-to-tensor map so warm starts can be
//! loaded from portable JSON weight blobs.

use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub mod deeplab;
pub mod wasr;
pub mod weights;

pub use deeplab::{DeepLabConfig, DeepLabNet};
pub use wasr::{WasrConfig, WasrNet};
pub use weights::{ParamMap, ParamReader, ParamWriter, TensorEntry, WeightBlob, WeightLoadError};

/// The selectable architecture family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ModelVariant {
    #[value(name = "wasr_resnet101")]
    #[serde(rename = "wasr_resnet101")]
    WasrResnet101,
    #[value(name = "wasr_resnet50")]
    #[serde(rename = "wasr_resnet50")]
    WasrResnet50,
    #[value(name = "deeplab")]
    #[serde(rename = "deeplab")]
    DeepLab,
}

impl ModelVariant {
    /// Whether the architecture has an IMU fusion stage.
    pub fn supports_imu(&self) -> bool {
        !matches!(self, ModelVariant::DeepLab)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::WasrResnet101 => "wasr_resnet101",
            ModelVariant::WasrResnet50 => "wasr_resnet50",
            ModelVariant::DeepLab => "deeplab",
        }
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common surface the training loop drives.
///
/// `forward` always returns per-class logits at the input resolution. Models
/// without IMU fusion ignore the `imu` argument.
pub trait SegmentationModel<B: Backend>: Module<B> + Sized {
    fn forward(&self, images: Tensor<B, 4>, imu: Option<Tensor<B, 4>>) -> Tensor<B, 4>;

    /// Export all learnable parameters as a flat name-to-tensor map.
    fn export(&self) -> ParamMap;

    /// Replace all learnable parameters from a flat map. All-or-nothing:
    /// missing, misshapen, or leftover entries fail the whole restore.
    fn restore(self, params: &ParamMap, device: &B::Device) -> Result<Self, WeightLoadError>;
}
