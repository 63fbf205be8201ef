//! Maritime segmentation dataset loading and Burn-compatible batching.
//!
//! This crate provides:
//! - Manifest parsing for MaSTr-style dataset splits
//! - A fixed normalization policy shared by train and validation data
//! - An on-the-fly augmentation pipeline for training samples
//! - Batched, optionally shuffled loaders with worker-pool prefetching

pub mod dataset;
pub mod loader;
pub mod manifest;
pub mod transforms;
pub mod types;

pub use dataset::{DatasetOptions, SegDataset};
pub use loader::{LoaderOptions, SegBatch, SegLoader};
pub use manifest::{Manifest, ManifestEntry};
pub use transforms::{Augmentation, Normalizer};
pub use types::{class_name, DataError, DataResult, SegSample, CLASS_NAMES};
