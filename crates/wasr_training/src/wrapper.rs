//! The optimized module: model plus loss, optimizer settings, and the
//! polynomial learning rate schedule.

use crate::config::RunConfig;
use crate::metrics::MetricAccumulator;
use crate::{AdBackend, TrainBackend, TrainDevice};
use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use mastr_dataset::SegBatch;
use wasr_models::SegmentationModel;

/// Cross entropy over per-pixel logits, skipping target ids at or above the
/// class count. An all-ignore batch contributes zero loss.
pub fn masked_cross_entropy<B: Backend>(
    logits: Tensor<B, 4>,
    targets: Tensor<B, 3, Int>,
    num_classes: usize,
) -> Tensor<B, 1> {
    let [n, c, h, w] = logits.dims();
    let log_probs = log_softmax(logits, 1)
        .permute([0, 2, 3, 1])
        .reshape([n * h * w, c]);
    let targets = targets.reshape([n * h * w]);
    let valid = targets.clone().lower_elem(num_classes as i64).float();
    let clamped = targets.clamp(0, num_classes as i64 - 1);
    let picked = log_probs
        .gather(1, clamped.unsqueeze_dim::<2>(1))
        .squeeze::<1>(1);
    let count = valid.clone().sum().clamp_min(1.0);
    (picked * valid).sum().neg() / count
}

/// Owns the model during fitting and carries everything epoch-dependent:
/// loss, schedule, and the optimizer configuration.
pub struct SegTrainModule<M> {
    model: M,
    num_classes: usize,
    epochs: usize,
    learning_rate: f64,
    momentum: f64,
    weight_decay: f64,
    lr_decay_pow: f64,
}

impl<M> SegTrainModule<M>
where
    M: SegmentationModel<AdBackend> + AutodiffModule<AdBackend>,
    M::InnerModule: SegmentationModel<TrainBackend>,
{
    pub fn new(model: M, config: &RunConfig) -> Self {
        Self {
            model,
            num_classes: config.num_classes,
            epochs: config.epochs,
            learning_rate: config.learning_rate,
            momentum: config.momentum,
            weight_decay: config.weight_decay,
            lr_decay_pow: config.lr_decay_pow,
        }
    }

    pub fn optimizer(&self) -> SgdConfig {
        SgdConfig::new()
            .with_momentum(Some(
                MomentumConfig::new()
                    .with_momentum(self.momentum)
                    .with_dampening(0.0),
            ))
            .with_weight_decay(Some(WeightDecayConfig::new(self.weight_decay as f32)))
    }

    /// Polynomial decay: `lr * (1 - epoch/epochs)^pow`.
    pub fn learning_rate(&self, epoch: usize) -> f64 {
        let progress = (epoch as f64 / self.epochs as f64).min(1.0);
        self.learning_rate * (1.0 - progress).powf(self.lr_decay_pow)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn set_model(&mut self, model: M) {
        self.model = model;
    }

    /// The inference-mode copy for validation.
    pub fn valid_model(&self) -> M::InnerModule {
        self.model.valid()
    }

    /// A copy of the model on another device. Parameter ids are preserved so
    /// replica gradients accumulate against the primary.
    pub fn replicate(&self, device: &TrainDevice) -> M {
        self.model.clone().fork(device)
    }

    pub fn forward_loss(&self, model: &M, batch: &SegBatch<AdBackend>) -> Tensor<AdBackend, 1> {
        let logits = model.forward(batch.images.clone(), batch.imu.clone());
        masked_cross_entropy(logits, batch.masks.clone(), self.num_classes)
    }

    pub fn apply_step<O>(&mut self, optim: &mut O, lr: f64, grads: GradientsParams)
    where
        O: Optimizer<M, AdBackend>,
    {
        self.model = optim.step(lr, self.model.clone(), grads);
    }

    pub fn validation_step(
        &self,
        model: &M::InnerModule,
        batch: &SegBatch<TrainBackend>,
        acc: &mut MetricAccumulator,
    ) {
        let logits = model.forward(batch.images.clone(), batch.imu.clone());
        let loss = masked_cross_entropy(logits.clone(), batch.masks.clone(), self.num_classes);
        let loss_val = loss
            .into_data()
            .to_vec::<f32>()
            .unwrap_or_default()
            .first()
            .copied()
            .unwrap_or(0.0);
        acc.record_loss(loss_val as f64);

        let preds = logits.argmax(1).squeeze::<3>(1);
        let preds = preds.into_data().to_vec::<i64>().unwrap_or_default();
        let targets = batch
            .masks
            .clone()
            .into_data()
            .to_vec::<i64>()
            .unwrap_or_default();
        acc.record_predictions(&preds, &targets);
    }
}

#[cfg(test)]
mod wrapper_tests {
    use super::masked_cross_entropy;
    use burn::tensor::{Int, Tensor, TensorData};

    type B = burn::backend::NdArray<f32>;

    #[test]
    fn ignore_pixels_do_not_move_the_loss() {
        let device = Default::default();
        // Two pixels; identical logits. Second target is an ignore pixel in
        // one tensor and a duplicate of the first in the other.
        let logits = Tensor::<B, 1>::from_floats([2.0, 2.0, -1.0, -1.0, 0.5, 0.5], &device)
            .reshape([1, 3, 1, 2]);
        let with_ignore = Tensor::<B, 3, Int>::from_data(
            TensorData::new(vec![0i64, 7], [1, 1, 2]),
            &device,
        );
        let without_ignore = Tensor::<B, 3, Int>::from_data(
            TensorData::new(vec![0i64, 0], [1, 1, 2]),
            &device,
        );
        let a = masked_cross_entropy(logits.clone(), with_ignore, 3)
            .into_data()
            .to_vec::<f32>()
            .unwrap()[0];
        let b = masked_cross_entropy(logits, without_ignore, 3)
            .into_data()
            .to_vec::<f32>()
            .unwrap()[0];
        assert!((a - b).abs() < 1e-5);
    }

    #[test]
    fn all_ignore_batch_yields_zero_loss() {
        let device = Default::default();
        let logits = Tensor::<B, 1>::from_floats([1.0, 0.0, -1.0], &device).reshape([1, 3, 1, 1]);
        let targets =
            Tensor::<B, 3, Int>::from_data(TensorData::new(vec![9i64], [1, 1, 1]), &device);
        let loss = masked_cross_entropy(logits, targets, 3)
            .into_data()
            .to_vec::<f32>()
            .unwrap()[0];
        assert_eq!(loss, 0.0);
    }
}
