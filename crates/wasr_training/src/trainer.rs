//! The manual fit loop: epoch iteration, device fan-out, validation,
//! checkpointing, and early stopping.

use crate::callbacks::{Checkpointer, EarlyStopping};
use crate::checkpoint::{load_checkpoint, save_checkpoint, SubstrateError, TrainerState};
use crate::config::{Precision, RunConfig};
use crate::logger::RunLogger;
use crate::metrics::MetricAccumulator;
use crate::pipeline::DataPipeline;
use crate::wrapper::SegTrainModule;
use crate::{resolve_devices, AdBackend, TrainBackend, TrainDevice};
use burn::module::AutodiffModule;
use burn::optim::{GradientsAccumulator, GradientsParams, Optimizer};
use mastr_dataset::{SegBatch, SegLoader};
use std::collections::BTreeMap;
use std::path::PathBuf;
use wasr_models::SegmentationModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitOutcome {
    Completed { epochs: usize },
    EarlyStopped { epoch: usize },
}

#[derive(Debug, Clone)]
pub struct TrainerSpec {
    pub devices: Vec<TrainDevice>,
    pub precision: Precision,
    pub max_epochs: usize,
    /// Synchronized batch norm: the full minibatch runs on the primary
    /// device so normalization statistics cover every sample. When off with
    /// multiple devices, per-device chunks run on forked replicas and
    /// gradients merge at the step boundary.
    pub sync_batch_norm: bool,
    pub log_steps: usize,
    pub resume_from: Option<PathBuf>,
    pub seed: u64,
    pub monitor: String,
}

pub struct Trainer {
    spec: TrainerSpec,
    logger: RunLogger,
    early_stop: Option<EarlyStopping>,
    checkpointer: Option<Checkpointer>,
}

/// Wire callbacks from the run configuration. Validation gates checkpoint
/// selection and early stopping; multi-device selections force batch norm
/// synchronization on.
pub fn assemble_trainer(config: &RunConfig, logger: RunLogger) -> Trainer {
    let devices = resolve_devices(&config.devices);
    let mut sync = config.sync_batch_norm;
    if devices.len() > 1 && !sync {
        println!("[trainer] multiple devices selected; forcing batch norm synchronization on");
        sync = true;
    }
    let spec = TrainerSpec {
        devices,
        precision: config.precision,
        max_epochs: config.epochs,
        sync_batch_norm: sync,
        log_steps: config.log_steps,
        resume_from: config.resume_from.clone(),
        seed: config.seed,
        monitor: config.monitor_metric.clone(),
    };
    let (early_stop, checkpointer) = if config.validation {
        let checkpointer = Checkpointer::new(
            logger.checkpoints_dir(),
            config.monitor_metric.clone(),
            config.monitor_mode,
            config.precision,
        );
        let early_stop = config.patience.map(|patience| {
            EarlyStopping::new(config.monitor_metric.clone(), config.monitor_mode, patience)
        });
        (early_stop, Some(checkpointer))
    } else {
        (None, None)
    };
    Trainer::new(spec, logger, early_stop, checkpointer)
}

impl Trainer {
    pub fn new(
        spec: TrainerSpec,
        logger: RunLogger,
        early_stop: Option<EarlyStopping>,
        checkpointer: Option<Checkpointer>,
    ) -> Self {
        Self {
            spec,
            logger,
            early_stop,
            checkpointer,
        }
    }

    pub fn logger(&self) -> &RunLogger {
        &self.logger
    }

    pub fn fit<M>(
        &mut self,
        mut wrapper: SegTrainModule<M>,
        data: &mut DataPipeline,
    ) -> Result<FitOutcome, SubstrateError>
    where
        M: SegmentationModel<AdBackend> + AutodiffModule<AdBackend>,
        M::InnerModule: SegmentationModel<TrainBackend>,
    {
        let device = self.spec.devices[0].clone();
        let mut optim = wrapper.optimizer().init();
        let mut state = TrainerState::new(self.spec.seed, self.spec.monitor.clone());

        if let Some(dir) = self.spec.resume_from.clone() {
            let (model, restored_optim, restored_state) = load_checkpoint(
                &dir,
                wrapper.model().clone(),
                optim,
                self.spec.precision,
                &device,
            )?;
            wrapper.set_model(model);
            optim = restored_optim;
            state = restored_state;
            if let Some(es) = self.early_stop.as_mut() {
                es.restore(state.early_stop_best, state.early_stop_stale);
            }
            if let Some(cp) = self.checkpointer.as_mut() {
                cp.restore(state.best_metric);
            }
            println!(
                "[trainer] resumed from {} at epoch {}",
                dir.display(),
                state.epoch
            );
        }

        let mut outcome = FitOutcome::Completed {
            epochs: self.spec.max_epochs,
        };
        let start_epoch = state.epoch;
        'epochs: for epoch in start_epoch..self.spec.max_epochs {
            data.train.reset(epoch);
            let lr = wrapper.learning_rate(epoch);
            let mut losses = Vec::new();
            while let Some(batch) = data.train.next_batch::<AdBackend>(&device)? {
                let loss_val = self.train_step(&mut wrapper, &mut optim, lr, batch);
                losses.push(loss_val);
                state.global_step += 1;
                if state.global_step % self.spec.log_steps == 0 {
                    self.logger
                        .log_scalar(state.global_step, epoch, "train/loss", loss_val as f64);
                    self.logger.log_scalar(state.global_step, epoch, "train/lr", lr);
                }
            }
            let avg_loss: f32 = if losses.is_empty() {
                0.0
            } else {
                losses.iter().sum::<f32>() / losses.len() as f32
            };
            println!("[trainer] epoch {epoch}: avg train loss {avg_loss:.4}");
            state.epoch = epoch + 1;

            if let Some(val) = data.val.as_mut() {
                let metrics = validate(&wrapper, val, &device)?;
                self.logger.log_metrics(state.global_step, epoch, &metrics);
                let stop = match self.early_stop.as_mut() {
                    Some(es) => {
                        let stop = es.observe(&metrics);
                        state.early_stop_best = es.best();
                        state.early_stop_stale = es.stale();
                        stop
                    }
                    None => false,
                };
                if let Some(cp) = self.checkpointer.as_mut() {
                    cp.observe(&metrics, wrapper.model(), &optim, &mut state)?;
                }
                if stop {
                    println!(
                        "[trainer] early stopping at epoch {epoch}: {} stopped improving",
                        self.spec.monitor
                    );
                    outcome = FitOutcome::EarlyStopped { epoch };
                    break 'epochs;
                }
            }
        }

        // Always leave a resumable checkpoint behind, validation or not.
        save_checkpoint(
            &self.logger.checkpoints_dir().join("last"),
            wrapper.model(),
            &optim,
            &state,
            self.spec.precision,
        )?;
        Ok(outcome)
    }

    fn train_step<M, O>(
        &self,
        wrapper: &mut SegTrainModule<M>,
        optim: &mut O,
        lr: f64,
        batch: SegBatch<AdBackend>,
    ) -> f32
    where
        M: SegmentationModel<AdBackend> + AutodiffModule<AdBackend>,
        M::InnerModule: SegmentationModel<TrainBackend>,
        O: Optimizer<M, AdBackend>,
    {
        let fused = self.spec.devices.len() == 1 || self.spec.sync_batch_norm;
        if fused {
            let loss = wrapper.forward_loss(wrapper.model(), &batch);
            let loss_detached = loss.clone().detach();
            let grads = GradientsParams::from_grads(loss.backward(), wrapper.model());
            wrapper.apply_step(optim, lr, grads);
            scalar(loss_detached)
        } else {
            let total = batch.len() as f64;
            let chunks = batch.split(self.spec.devices.len());
            let mut accumulator = GradientsAccumulator::new();
            let mut loss_sum = 0.0f32;
            for (chunk, device) in chunks.into_iter().zip(self.spec.devices.iter()) {
                let replica = wrapper.replicate(device);
                let chunk = chunk.to_device(device);
                // Scale so the merged gradient matches a single full-batch step.
                let scale = chunk.len() as f64 / total;
                let loss = wrapper.forward_loss(&replica, &chunk).mul_scalar(scale);
                let loss_detached = loss.clone().detach();
                let grads = GradientsParams::from_grads(loss.backward(), &replica);
                accumulator.accumulate(&replica, grads);
                loss_sum += scalar(loss_detached);
            }
            let grads = accumulator.grads();
            wrapper.apply_step(optim, lr, grads);
            loss_sum
        }
    }
}

fn validate<M>(
    wrapper: &SegTrainModule<M>,
    loader: &mut SegLoader,
    device: &TrainDevice,
) -> Result<BTreeMap<String, f64>, SubstrateError>
where
    M: SegmentationModel<AdBackend> + AutodiffModule<AdBackend>,
    M::InnerModule: SegmentationModel<TrainBackend>,
{
    let model = wrapper.valid_model();
    let mut acc = MetricAccumulator::new(wrapper.num_classes());
    loader.reset(0);
    while let Some(batch) = loader.next_batch::<TrainBackend>(device)? {
        wrapper.validation_step(&model, &batch, &mut acc);
    }
    Ok(acc.finalize())
}

fn scalar(loss: burn::tensor::Tensor<AdBackend, 1>) -> f32 {
    loss.into_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .into_iter()
        .next()
        .unwrap_or(0.0)
}
