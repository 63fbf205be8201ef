//! Dataset split manifests.
//!
//! A manifest is a JSON file describing one dataset split: directories for
//! images, annotation masks, and (optionally) IMU horizon masks, plus the
//! sample entries themselves. All paths resolve relative to the manifest
//! file's parent directory so splits can be moved around as a unit.

use crate::types::{DataError, DataResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub image_dir: String,
    pub mask_dir: String,
    #[serde(default)]
    pub imu_dir: Option<String>,
    pub samples: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub image: String,
    pub mask: String,
    #[serde(default)]
    pub imu: Option<String>,
}

/// Absolute paths for one sample after manifest resolution.
#[derive(Debug, Clone)]
pub struct SamplePaths {
    pub image: PathBuf,
    pub mask: PathBuf,
    pub imu: Option<PathBuf>,
}

impl Manifest {
    pub fn load(path: &Path) -> DataResult<Self> {
        if !path.exists() {
            return Err(DataError::ManifestMissing {
                path: path.to_path_buf(),
            });
        }
        let raw = fs::read(path).map_err(|source| DataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: Manifest =
            serde_json::from_slice(&raw).map_err(|source| DataError::Manifest {
                path: path.to_path_buf(),
                source,
            })?;
        if manifest.samples.is_empty() {
            return Err(DataError::EmptyManifest {
                path: path.to_path_buf(),
            });
        }
        Ok(manifest)
    }

    /// Resolve entry paths against the manifest's parent directory.
    pub fn resolve(&self, manifest_path: &Path) -> Vec<SamplePaths> {
        let root = manifest_path.parent().unwrap_or_else(|| Path::new("."));
        self.samples
            .iter()
            .map(|entry| SamplePaths {
                image: root.join(&self.image_dir).join(&entry.image),
                mask: root.join(&self.mask_dir).join(&entry.mask),
                imu: match (&self.imu_dir, &entry.imu) {
                    (Some(dir), Some(file)) => Some(root.join(dir).join(file)),
                    _ => None,
                },
            })
            .collect()
    }
}
