//! Loader construction from a resolved run configuration.

use crate::config::RunConfig;
use mastr_dataset::{
    Augmentation, DataError, DataResult, DatasetOptions, LoaderOptions, Normalizer, SegDataset,
    SegLoader,
};

pub struct DataPipeline {
    pub train: SegLoader,
    pub val: Option<SegLoader>,
}

/// Build the training loader and, when validation is enabled, the validation
/// loader. Both share the normalization policy; only training shuffles,
/// augments, and drops trailing batches.
pub fn build_data_pipeline(config: &RunConfig) -> DataResult<DataPipeline> {
    let normalize = Normalizer::pytorch_hub();
    let load_imu = config.imu && config.model.supports_imu();

    let train_options = DatasetOptions {
        normalize,
        augmentation: config
            .augment
            .then(|| Augmentation::default_train(config.seed)),
        include_original: false,
        load_imu,
    };
    let train_dataset = SegDataset::from_manifest(&config.train_file, train_options)?;
    let train = SegLoader::new(
        train_dataset,
        LoaderOptions {
            batch_size: config.batch_size,
            shuffle: true,
            drop_last: true,
            workers: config.workers,
            seed: config.seed,
        },
    )?;

    let val = if config.validation {
        let val_file = config.val_file.as_ref().ok_or(DataError::MissingValManifest)?;
        let val_options = DatasetOptions {
            normalize,
            augmentation: None,
            include_original: true,
            load_imu,
        };
        let val_dataset = SegDataset::from_manifest(val_file, val_options)?;
        Some(SegLoader::new(
            val_dataset,
            LoaderOptions {
                batch_size: config.batch_size,
                shuffle: false,
                drop_last: false,
                workers: config.workers,
                seed: config.seed,
            },
        )?)
    } else {
        None
    };

    Ok(DataPipeline { train, val })
}
