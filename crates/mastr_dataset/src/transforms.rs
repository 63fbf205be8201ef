//! Normalization policy and the training-time augmentation pipeline.

use image::{GrayImage, RgbImage};
use rand::{Rng, SeedableRng};

/// Fixed pixel normalization mapping raw RGB into the domain the segmentation
/// backbones expect. Train and validation must share one instance so a model
/// trained under this policy is evaluated under the same one.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalizer {
    /// The torchvision/PyTorch-Hub ImageNet statistics the backbones were
    /// trained against.
    pub fn pytorch_hub() -> Self {
        Self {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }

    /// Normalize an RGB frame into CHW float layout.
    pub fn apply(&self, img: &RgbImage) -> Vec<f32> {
        let (width, height) = img.dimensions();
        let plane = (width * height) as usize;
        let mut chw = vec![0.0f32; plane * 3];
        for (x, y, pixel) in img.enumerate_pixels() {
            let base = (y * width + x) as usize;
            for c in 0..3 {
                let v = pixel[c] as f32 / 255.0;
                chw[c * plane + base] = (v - self.mean[c]) / self.std[c];
            }
        }
        chw
    }
}

/// On-the-fly augmentation applied to training samples only.
///
/// Augmentation randomness is seeded per (epoch, sample) from the run seed:
/// each sample is redrawn every epoch, and a run is reproducible from its
/// logged configuration.
#[derive(Debug, Clone, Copy)]
pub struct Augmentation {
    pub flip_horizontal_prob: f32,
    pub color_jitter_prob: f32,
    pub color_jitter_strength: f32,
    pub seed: u64,
}

impl Augmentation {
    pub fn default_train(seed: u64) -> Self {
        Self {
            flip_horizontal_prob: 0.5,
            color_jitter_prob: 0.5,
            color_jitter_strength: 0.1,
            seed,
        }
    }

    /// Apply the pipeline in place. Geometric transforms touch the image, the
    /// annotation mask, and the IMU mask together; photometric transforms
    /// touch the image only.
    pub(crate) fn apply(
        &self,
        index: usize,
        epoch: usize,
        img: &mut RgbImage,
        mask: &mut GrayImage,
        imu: Option<&mut GrayImage>,
    ) {
        let mixed = self.seed
            ^ (index as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
            ^ (epoch as u64).wrapping_mul(0xc2b2_ae3d_27d4_eb4f);
        let mut rng = rand::rngs::StdRng::seed_from_u64(mixed);

        if self.flip_horizontal_prob > 0.0
            && rng.random_range(0.0..1.0f32) < self.flip_horizontal_prob
        {
            image::imageops::flip_horizontal_in_place(img);
            image::imageops::flip_horizontal_in_place(mask);
            if let Some(imu) = imu {
                image::imageops::flip_horizontal_in_place(imu);
            }
        }

        maybe_jitter(
            img,
            self.color_jitter_prob,
            self.color_jitter_strength,
            &mut rng,
        );
    }
}

fn maybe_jitter(img: &mut RgbImage, prob: f32, strength: f32, rng: &mut dyn rand::RngCore) {
    if prob <= 0.0 || strength <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0f32) >= prob {
        return;
    }
    let bright = 1.0 + rng.random_range(-strength..strength);
    let contrast = 1.0 + rng.random_range(-strength..strength);
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            let mut v = (v - 0.5) * contrast + 0.5;
            v *= bright;
            pixel[c] = (v.clamp(0.0, 1.0) * 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod transform_tests {
    use super::{Augmentation, Normalizer};

    #[test]
    fn normalizer_maps_mean_pixel_to_zero() {
        let norm = Normalizer::pytorch_hub();
        let v = (norm.mean[0] * 255.0).round() as u8;
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([v, v, v]));
        let chw = norm.apply(&img);
        assert!(chw[0].abs() < 0.02);
    }

    #[test]
    fn flip_moves_mask_with_image() {
        let mut img = image::RgbImage::new(2, 1);
        img.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        let mut mask = image::GrayImage::new(2, 1);
        mask.put_pixel(0, 0, image::Luma([2]));
        let aug = Augmentation {
            flip_horizontal_prob: 1.0,
            color_jitter_prob: 0.0,
            color_jitter_strength: 0.0,
            seed: 7,
        };
        aug.apply(0, 0, &mut img, &mut mask, None);
        assert_eq!(img.get_pixel(1, 0)[0], 255);
        assert_eq!(mask.get_pixel(1, 0)[0], 2);
    }
}
