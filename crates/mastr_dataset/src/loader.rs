//! Batched iteration over a [`SegDataset`].
//!
//! The loader owns a shuffled index order, re-derived per epoch from the run
//! seed, and materializes batches as Burn tensors on a caller-chosen device.
//! Sample decoding fans out over a rayon pool when workers > 0.

use crate::dataset::SegDataset;
use crate::types::{DataError, DataResult, SegSample};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

#[derive(Debug, Clone, Copy)]
pub struct LoaderOptions {
    pub batch_size: usize,
    pub shuffle: bool,
    /// Drop a trailing batch smaller than `batch_size`.
    pub drop_last: bool,
    /// Decode worker threads. Zero decodes on the calling thread.
    pub workers: usize,
    pub seed: u64,
}

/// One materialized minibatch.
pub struct SegBatch<B: Backend> {
    /// `[n, 3, h, w]` normalized images.
    pub images: Tensor<B, 4>,
    /// `[n, h, w]` per-pixel class ids.
    pub masks: Tensor<B, 3, Int>,
    /// `[n, 1, h, w]` IMU horizon masks, when the split carries them.
    pub imu: Option<Tensor<B, 4>>,
    /// Pre-normalization frames, when requested.
    pub originals: Option<Vec<image::RgbImage>>,
}

impl<B: Backend> SegBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            images: self.images.to_device(device),
            masks: self.masks.to_device(device),
            imu: self.imu.map(|t| t.to_device(device)),
            originals: self.originals,
        }
    }

    /// Split along the batch dimension for device fan-out. Original frames do
    /// not travel with the chunks.
    pub fn split(self, parts: usize) -> Vec<Self> {
        let images = self.images.chunk(parts, 0);
        let masks = self.masks.chunk(parts, 0);
        let imu = match self.imu {
            Some(t) => t.chunk(parts, 0).into_iter().map(Some).collect(),
            None => vec![None; images.len()],
        };
        images
            .into_iter()
            .zip(masks)
            .zip(imu)
            .map(|((images, masks), imu)| Self {
                images,
                masks,
                imu,
                originals: None,
            })
            .collect()
    }
}

pub struct SegLoader {
    dataset: SegDataset,
    options: LoaderOptions,
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
    pool: Option<rayon::ThreadPool>,
}

impl SegLoader {
    pub fn new(dataset: SegDataset, options: LoaderOptions) -> DataResult<Self> {
        let pool = if options.workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.workers)
                .build()
                .map_err(|e| DataError::Other(format!("worker pool: {e}")))?;
            Some(pool)
        } else {
            None
        };
        let order: Vec<usize> = (0..dataset.len()).collect();
        Ok(Self {
            dataset,
            options,
            order,
            cursor: 0,
            epoch: 0,
            pool,
        })
    }

    pub fn dataset(&self) -> &SegDataset {
        &self.dataset
    }

    /// Index order for the current epoch.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Rewind and, if shuffling, re-derive the order for the given epoch.
    /// The epoch also feeds per-sample augmentation so transforms are redrawn
    /// every pass over the data.
    pub fn reset(&mut self, epoch: usize) {
        self.cursor = 0;
        self.epoch = epoch;
        self.order = (0..self.dataset.len()).collect();
        if self.options.shuffle {
            let mixed = self.options.seed ^ (epoch as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
            let mut rng = rand::rngs::StdRng::seed_from_u64(mixed);
            self.order.shuffle(&mut rng);
        }
    }

    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        let bs = self.options.batch_size;
        if self.options.drop_last {
            n / bs
        } else {
            n.div_ceil(bs)
        }
    }

    /// Produce the next batch, or `None` at end of epoch.
    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DataResult<Option<SegBatch<B>>> {
        let usable = if self.options.drop_last {
            self.dataset.len() - self.dataset.len() % self.options.batch_size
        } else {
            self.dataset.len()
        };
        if self.cursor >= usable {
            return Ok(None);
        }
        let end = (self.cursor + self.options.batch_size).min(usable);
        let indices = &self.order[self.cursor..end];
        self.cursor = end;

        let epoch = self.epoch;
        let samples: Vec<DataResult<SegSample>> = match &self.pool {
            Some(pool) => pool.install(|| {
                indices
                    .par_iter()
                    .map(|&i| self.dataset.load(i, epoch))
                    .collect()
            }),
            None => indices
                .iter()
                .map(|&i| self.dataset.load(i, epoch))
                .collect(),
        };
        let samples: Vec<SegSample> = samples.into_iter().collect::<DataResult<_>>()?;

        Ok(Some(assemble_batch(samples, device)?))
    }
}

fn assemble_batch<B: Backend>(
    samples: Vec<SegSample>,
    device: &B::Device,
) -> DataResult<SegBatch<B>> {
    let n = samples.len();
    let (w, h) = (samples[0].width as usize, samples[0].height as usize);
    for s in &samples {
        if (s.width as usize, s.height as usize) != (w, h) {
            return Err(DataError::Other(format!(
                "mixed sample dimensions in batch: {}x{} vs {}x{}",
                s.width, s.height, w, h
            )));
        }
    }

    let mut image_data = Vec::with_capacity(n * 3 * h * w);
    let mut mask_data = Vec::with_capacity(n * h * w);
    let mut imu_data: Option<Vec<f32>> = samples[0].imu.is_some().then(Vec::new);
    let mut originals: Option<Vec<image::RgbImage>> =
        samples[0].original.is_some().then(Vec::new);

    for sample in samples {
        image_data.extend_from_slice(&sample.image_chw);
        mask_data.extend(sample.mask.iter().map(|&v| v as i64));
        if let (Some(acc), Some(plane)) = (imu_data.as_mut(), sample.imu.as_ref()) {
            acc.extend_from_slice(plane);
        }
        if let (Some(acc), Some(frame)) = (originals.as_mut(), sample.original) {
            acc.push(frame);
        }
    }

    let images = Tensor::<B, 1>::from_floats(image_data.as_slice(), device)
        .reshape([n, 3, h, w]);
    let masks = Tensor::<B, 3, Int>::from_data(
        TensorData::new(mask_data, [n, h, w]),
        device,
    );
    let imu = imu_data.map(|data| {
        Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([n, 1, h, w])
    });

    Ok(SegBatch {
        images,
        masks,
        imu,
        originals,
    })
}
