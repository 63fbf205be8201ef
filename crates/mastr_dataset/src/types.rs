//! Core types and error definitions for mastr_dataset.

use std::path::PathBuf;
use thiserror::Error;

pub type DataResult<T> = Result<T, DataError>;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("manifest not found at {path}")]
    ManifestMissing { path: PathBuf },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("manifest parse error at {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("manifest {path} lists no samples")]
    EmptyManifest { path: PathBuf },
    #[error("validation requested but no validation manifest was supplied")]
    MissingValManifest,
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("mask {mask} is {mask_w}x{mask_h} but image {image} is {image_w}x{image_h}")]
    MaskShape {
        image: PathBuf,
        mask: PathBuf,
        image_w: u32,
        image_h: u32,
        mask_w: u32,
        mask_h: u32,
    },
    #[error("IMU loading requested but sample {image} has no IMU entry in the manifest")]
    MissingImu { image: PathBuf },
    #[error("{0}")]
    Other(String),
}

/// Class ids used by MaSTr-style annotation masks. Pixels with values at or
/// above the configured class count are treated as ignore pixels.
pub const CLASS_NAMES: [&str; 3] = ["obstacle", "water", "sky"];

/// Human-readable label for a class index, falling back to `classN`.
pub fn class_name(index: usize) -> String {
    CLASS_NAMES
        .get(index)
        .map(|s| (*s).to_string())
        .unwrap_or_else(|| format!("class{index}"))
}

/// One fully decoded sample ready for batching.
#[derive(Debug, Clone)]
pub struct SegSample {
    /// Image in CHW layout, normalized by the dataset's normalization policy.
    pub image_chw: Vec<f32>,
    /// Per-pixel class ids, row-major.
    pub mask: Vec<u8>,
    /// Optional IMU horizon mask as a single channel of 0.0/1.0 values.
    pub imu: Option<Vec<f32>>,
    /// Original frame before normalization, retained for qualitative output.
    pub original: Option<image::RgbImage>,
    pub width: u32,
    pub height: u32,
}
