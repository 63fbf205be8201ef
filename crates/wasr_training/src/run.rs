//! Top-level entry: resolve arguments, build the pipeline, dispatch on the
//! architecture, and fit.

use crate::config::{RunConfig, TrainArgs};
use crate::logger::RunLogger;
use crate::pipeline::{build_data_pipeline, DataPipeline};
use crate::trainer::{assemble_trainer, FitOutcome};
use crate::wrapper::SegTrainModule;
use crate::{resolve_devices, AdBackend, TrainBackend, TrainDevice};
use burn::module::AutodiffModule;
use wasr_models::{
    DeepLabConfig, DeepLabNet, ModelVariant, SegmentationModel, WasrConfig, WasrNet, WeightBlob,
};

pub fn run_train(args: TrainArgs) -> anyhow::Result<FitOutcome> {
    let config = RunConfig::resolve(args)?;
    let mut data = build_data_pipeline(&config)?;
    let logger = RunLogger::create(&config.output_dir, &config.model_name)?;
    logger.log_hparams(&config)?;
    let devices = resolve_devices(&config.devices);
    let device = devices[0].clone();

    if config.imu && !config.model.supports_imu() {
        eprintln!(
            "[train] {} has no IMU fusion stage; IMU masks will be ignored",
            config.model
        );
    }

    match config.model {
        ModelVariant::WasrResnet101 => {
            let model = WasrNet::<AdBackend>::new(
                WasrConfig::resnet101(config.num_classes, config.imu, config.pretrained),
                &device,
            );
            fit_model(model, &config, &mut data, logger, &device)
        }
        ModelVariant::WasrResnet50 => {
            let model = WasrNet::<AdBackend>::new(
                WasrConfig::resnet50(config.num_classes, config.imu, config.pretrained),
                &device,
            );
            fit_model(model, &config, &mut data, logger, &device)
        }
        ModelVariant::DeepLab => {
            let model = DeepLabNet::<AdBackend>::new(
                DeepLabConfig::new(config.num_classes, config.pretrained),
                &device,
            );
            fit_model(model, &config, &mut data, logger, &device)
        }
    }
}

fn fit_model<M>(
    model: M,
    config: &RunConfig,
    data: &mut DataPipeline,
    logger: RunLogger,
    device: &TrainDevice,
) -> anyhow::Result<FitOutcome>
where
    M: SegmentationModel<AdBackend> + AutodiffModule<AdBackend>,
    M::InnerModule: SegmentationModel<TrainBackend>,
{
    let model = match &config.pretrained_weights {
        Some(path) => {
            println!("[train] warm starting from {}", path.display());
            let params = WeightBlob::load(path)?;
            model.restore(&params, device)?
        }
        None => model,
    };
    let wrapper = SegTrainModule::new(model, config);
    let mut trainer = assemble_trainer(config, logger);
    Ok(trainer.fit(wrapper, data)?)
}
