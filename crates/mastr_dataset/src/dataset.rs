//! Sample decoding: manifest entries to normalized tensor-ready samples.

use crate::manifest::{Manifest, SamplePaths};
use crate::transforms::{Augmentation, Normalizer};
use crate::types::{DataError, DataResult, SegSample};
use std::path::Path;

/// Per-split decoding options.
#[derive(Debug, Clone)]
pub struct DatasetOptions {
    pub normalize: Normalizer,
    /// Augmentation pipeline, training splits only.
    pub augmentation: Option<Augmentation>,
    /// Keep the pre-normalization frame on each sample.
    pub include_original: bool,
    /// Require and decode IMU horizon masks.
    pub load_imu: bool,
}

impl DatasetOptions {
    pub fn eval(normalize: Normalizer) -> Self {
        Self {
            normalize,
            augmentation: None,
            include_original: false,
            load_imu: false,
        }
    }
}

/// A resolved dataset split. Decoding is deferred to [`SegDataset::load`] so
/// loaders can fan samples out across a worker pool.
pub struct SegDataset {
    samples: Vec<SamplePaths>,
    options: DatasetOptions,
}

impl SegDataset {
    pub fn from_manifest(manifest_path: &Path, options: DatasetOptions) -> DataResult<Self> {
        let manifest = Manifest::load(manifest_path)?;
        let samples = manifest.resolve(manifest_path);
        Ok(Self { samples, options })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn options(&self) -> &DatasetOptions {
        &self.options
    }

    /// Decode, augment, and normalize one sample. The epoch feeds the
    /// augmentation seed so transforms are redrawn each pass.
    pub fn load(&self, index: usize, epoch: usize) -> DataResult<SegSample> {
        let paths = &self.samples[index];

        let mut img = image::open(&paths.image)
            .map_err(|source| DataError::Image {
                path: paths.image.clone(),
                source,
            })?
            .into_rgb8();
        let mut mask = image::open(&paths.mask)
            .map_err(|source| DataError::Image {
                path: paths.mask.clone(),
                source,
            })?
            .into_luma8();

        let (img_w, img_h) = img.dimensions();
        let (mask_w, mask_h) = mask.dimensions();
        if (img_w, img_h) != (mask_w, mask_h) {
            return Err(DataError::MaskShape {
                image: paths.image.clone(),
                mask: paths.mask.clone(),
                image_w: img_w,
                image_h: img_h,
                mask_w,
                mask_h,
            });
        }

        let mut imu = if self.options.load_imu {
            let imu_path = paths.imu.as_ref().ok_or_else(|| DataError::MissingImu {
                image: paths.image.clone(),
            })?;
            let imu = image::open(imu_path)
                .map_err(|source| DataError::Image {
                    path: imu_path.clone(),
                    source,
                })?
                .into_luma8();
            let (imu_w, imu_h) = imu.dimensions();
            if (imu_w, imu_h) != (img_w, img_h) {
                return Err(DataError::MaskShape {
                    image: paths.image.clone(),
                    mask: imu_path.clone(),
                    image_w: img_w,
                    image_h: img_h,
                    mask_w: imu_w,
                    mask_h: imu_h,
                });
            }
            Some(imu)
        } else {
            None
        };

        if let Some(aug) = &self.options.augmentation {
            aug.apply(index, epoch, &mut img, &mut mask, imu.as_mut());
        }

        let original = self.options.include_original.then(|| img.clone());
        let image_chw = self.options.normalize.apply(&img);
        let mask_ids: Vec<u8> = mask.into_raw();
        let imu_plane = imu.map(|imu| {
            imu.into_raw()
                .into_iter()
                .map(|v| if v as f32 / 255.0 > 0.5 { 1.0 } else { 0.0 })
                .collect()
        });

        Ok(SegSample {
            image_chw,
            mask: mask_ids,
            imu: imu_plane,
            original,
            width: img_w,
            height: img_h,
        })
    }
}

#[cfg(test)]
mod dataset_tests {
    use super::{DatasetOptions, SegDataset};
    use crate::transforms::Normalizer;
    use crate::types::DataError;
    use std::fs;

    fn write_split(dir: &std::path::Path, w: u32, h: u32, mask_w: u32) -> std::path::PathBuf {
        fs::create_dir_all(dir.join("images")).unwrap();
        fs::create_dir_all(dir.join("masks")).unwrap();
        image::RgbImage::from_pixel(w, h, image::Rgb([120, 130, 140]))
            .save(dir.join("images/f0.png"))
            .unwrap();
        image::GrayImage::from_pixel(mask_w, h, image::Luma([1]))
            .save(dir.join("masks/f0.png"))
            .unwrap();
        let manifest = dir.join("split.json");
        fs::write(
            &manifest,
            r#"{"image_dir":"images","mask_dir":"masks","samples":[{"image":"f0.png","mask":"f0.png"}]}"#,
        )
        .unwrap();
        manifest
    }

    #[test]
    fn decodes_matching_sample() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_split(dir.path(), 4, 3, 4);
        let ds = SegDataset::from_manifest(&manifest, DatasetOptions::eval(Normalizer::pytorch_hub()))
            .unwrap();
        let sample = ds.load(0, 0).unwrap();
        assert_eq!(sample.image_chw.len(), 3 * 4 * 3);
        assert_eq!(sample.mask.len(), 4 * 3);
        assert!(sample.imu.is_none());
    }

    #[test]
    fn rejects_mask_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_split(dir.path(), 4, 3, 5);
        let ds = SegDataset::from_manifest(&manifest, DatasetOptions::eval(Normalizer::pytorch_hub()))
            .unwrap();
        let err = ds.load(0, 0).unwrap_err();
        assert!(matches!(err, DataError::MaskShape { .. }));
    }

    #[test]
    fn missing_imu_entry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_split(dir.path(), 4, 3, 4);
        let mut options = DatasetOptions::eval(Normalizer::pytorch_hub());
        options.load_imu = true;
        let ds = SegDataset::from_manifest(&manifest, options).unwrap();
        let err = ds.load(0, 0).unwrap_err();
        assert!(matches!(err, DataError::MissingImu { .. }));
    }
}
