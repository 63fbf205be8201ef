//! CLI surface and resolved run configuration.
//!
//! `TrainArgs` is the raw clap surface; `RunConfig::resolve` validates it,
//! derives the run seed, creates the output directory, and echoes the full
//! configuration so every run is reproducible from its log.

use clap::{Parser, ValueEnum};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use wasr_models::ModelVariant;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required argument --{field}")]
    Missing { field: &'static str },
    #[error("invalid value for --{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("path given for --{field} does not exist: {path}")]
    MissingPath { field: &'static str, path: PathBuf },
    #[error("cannot create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Numeric precision for persisted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Precision {
    #[value(name = "16")]
    #[serde(rename = "16")]
    Half,
    #[value(name = "32")]
    #[serde(rename = "32")]
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    Min,
    Max,
}

impl MonitorMode {
    /// Strict improvement under this mode.
    pub fn improved(&self, value: f64, best: f64) -> bool {
        match self {
            MonitorMode::Min => value < best,
            MonitorMode::Max => value > best,
        }
    }
}

/// Device selection, parsed from the `--gpus` argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSpec {
    /// `-1`: every available device.
    All,
    /// `N`: the first N devices (0 falls back to a single device).
    Count(usize),
    /// `a,b,...`: explicit device ids.
    Ids(Vec<usize>),
}

impl DeviceSpec {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw == "-1" {
            return Ok(DeviceSpec::All);
        }
        if raw.contains(',') {
            let ids = raw
                .split(',')
                .map(|part| part.trim().parse::<usize>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| format!("expected comma-separated device ids, got {raw:?}"))?;
            if ids.is_empty() {
                return Err("empty device id list".to_string());
            }
            return Ok(DeviceSpec::Ids(ids));
        }
        raw.parse::<usize>()
            .map(DeviceSpec::Count)
            .map_err(|_| format!("expected -1, a count, or comma-separated ids, got {raw:?}"))
    }

    /// How many logical devices this selection asks for.
    pub fn requested(&self) -> Option<usize> {
        match self {
            DeviceSpec::All => None,
            DeviceSpec::Count(n) => Some((*n).max(1)),
            DeviceSpec::Ids(ids) => Some(ids.len()),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "train", about = "Train a maritime obstacle segmentation model")]
pub struct TrainArgs {
    /// Run name; log and checkpoint directories are keyed by it.
    #[arg(long)]
    pub model_name: Option<String>,
    /// Architecture to train.
    #[arg(long, value_enum, default_value_t = ModelVariant::WasrResnet101)]
    pub model: ModelVariant,
    /// Training split manifest (JSON).
    #[arg(long)]
    pub train_file: Option<PathBuf>,
    /// Validation split manifest (JSON); required with --validation.
    #[arg(long)]
    pub val_file: Option<PathBuf>,
    /// Run validation, checkpoint selection, and early stopping each epoch.
    #[arg(long, default_value_t = false)]
    pub validation: bool,
    /// Load and fuse IMU horizon masks (architectures without an IMU stage ignore them).
    #[arg(long, default_value_t = false)]
    pub imu: bool,
    /// Number of segmentation classes.
    #[arg(long, default_value_t = 3)]
    pub num_classes: usize,
    #[arg(long, default_value_t = 3)]
    pub batch_size: usize,
    /// Data loading worker threads (0 loads on the training thread).
    #[arg(long, default_value_t = 1)]
    pub workers: usize,
    #[arg(long, default_value_t = 50)]
    pub epochs: usize,
    #[arg(long, default_value_t = 1e-6)]
    pub learning_rate: f64,
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,
    #[arg(long, default_value_t = 1e-6)]
    pub weight_decay: f64,
    /// Exponent of the polynomial learning rate decay.
    #[arg(long, default_value_t = 0.9)]
    pub lr_decay_pow: f64,
    /// Early stopping patience in epochs; omit to disable early stopping.
    #[arg(long)]
    pub patience: Option<usize>,
    /// Log training scalars every this many optimizer steps.
    #[arg(long, default_value_t = 20)]
    pub log_steps: usize,
    /// Device selection: -1 for all, a count, or comma-separated ids.
    #[arg(long, default_value = "-1", allow_hyphen_values = true)]
    pub gpus: String,
    /// Synchronize batch norm statistics across devices.
    #[arg(long, default_value_t = false)]
    pub sync_batchnorm: bool,
    /// Precision for persisted records (16 or 32).
    #[arg(long, value_enum, default_value_t = Precision::Full)]
    pub precision: Precision,
    /// Initialize backbone weights with the warm-start scheme.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub pretrained: bool,
    /// Warm-start weight blob (bare parameter map or checkpoint wrapper).
    #[arg(long)]
    pub pretrained_weights: Option<PathBuf>,
    /// Resume training from a checkpoint directory.
    #[arg(long)]
    pub resume_from: Option<PathBuf>,
    #[arg(long, default_value = "output")]
    pub output_dir: PathBuf,
    /// Validation metric used for checkpoint selection and early stopping.
    #[arg(long, default_value = "val/iou/obstacle")]
    pub monitor_metric: String,
    #[arg(long = "monitor-metric-mode", value_enum, default_value_t = MonitorMode::Max)]
    pub monitor_mode: MonitorMode,
    /// Disable training-time augmentation.
    #[arg(long, default_value_t = false)]
    pub no_augmentation: bool,
    /// Run seed; derived randomly when omitted.
    #[arg(long = "random-seed")]
    pub seed: Option<u64>,
}

/// A fully validated run configuration. Serialized verbatim as the run's
/// hyperparameter record.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub model_name: String,
    pub model: ModelVariant,
    pub train_file: PathBuf,
    pub val_file: Option<PathBuf>,
    pub validation: bool,
    pub imu: bool,
    pub num_classes: usize,
    pub batch_size: usize,
    pub workers: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub lr_decay_pow: f64,
    pub patience: Option<usize>,
    pub log_steps: usize,
    pub devices: DeviceSpec,
    pub sync_batch_norm: bool,
    pub precision: Precision,
    pub pretrained: bool,
    pub pretrained_weights: Option<PathBuf>,
    pub resume_from: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub monitor_metric: String,
    pub monitor_mode: MonitorMode,
    pub augment: bool,
    pub seed: u64,
}

impl RunConfig {
    pub fn resolve(args: TrainArgs) -> Result<Self, ConfigError> {
        let model_name = args.model_name.ok_or(ConfigError::Missing {
            field: "model-name",
        })?;
        let train_file = args.train_file.ok_or(ConfigError::Missing {
            field: "train-file",
        })?;
        if args.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch-size",
                reason: "must be at least 1".to_string(),
            });
        }
        if args.num_classes == 0 {
            return Err(ConfigError::Invalid {
                field: "num-classes",
                reason: "must be at least 1".to_string(),
            });
        }
        if args.log_steps == 0 {
            return Err(ConfigError::Invalid {
                field: "log-steps",
                reason: "must be at least 1".to_string(),
            });
        }
        if args.patience == Some(0) {
            return Err(ConfigError::Invalid {
                field: "patience",
                reason: "must be at least 1".to_string(),
            });
        }
        if args.epochs == 0 {
            return Err(ConfigError::Invalid {
                field: "epochs",
                reason: "must be at least 1".to_string(),
            });
        }
        if args.learning_rate <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "learning-rate",
                reason: "must be positive".to_string(),
            });
        }
        let devices = DeviceSpec::parse(&args.gpus).map_err(|reason| ConfigError::Invalid {
            field: "gpus",
            reason,
        })?;
        if !train_file.exists() {
            return Err(ConfigError::MissingPath {
                field: "train-file",
                path: train_file,
            });
        }
        let val_file = if args.validation {
            let val_file = args.val_file.ok_or(ConfigError::Missing { field: "val-file" })?;
            if !val_file.exists() {
                return Err(ConfigError::MissingPath {
                    field: "val-file",
                    path: val_file,
                });
            }
            Some(val_file)
        } else {
            args.val_file
        };
        fs::create_dir_all(&args.output_dir).map_err(|source| ConfigError::OutputDir {
            path: args.output_dir.clone(),
            source,
        })?;

        let seed = args.seed.unwrap_or_else(|| rand::rng().random());

        let config = Self {
            model_name,
            model: args.model,
            train_file,
            val_file,
            validation: args.validation,
            imu: args.imu,
            num_classes: args.num_classes,
            batch_size: args.batch_size,
            workers: args.workers,
            epochs: args.epochs,
            learning_rate: args.learning_rate,
            momentum: args.momentum,
            weight_decay: args.weight_decay,
            lr_decay_pow: args.lr_decay_pow,
            patience: args.patience,
            log_steps: args.log_steps,
            devices,
            sync_batch_norm: args.sync_batchnorm,
            precision: args.precision,
            pretrained: args.pretrained,
            pretrained_weights: args.pretrained_weights,
            resume_from: args.resume_from,
            output_dir: args.output_dir,
            monitor_metric: args.monitor_metric,
            monitor_mode: args.monitor_mode,
            augment: !args.no_augmentation,
            seed,
        };
        match serde_json::to_string(&config) {
            Ok(echo) => println!("[config] {echo}"),
            Err(e) => eprintln!("[config] cannot serialize configuration: {e}"),
        }
        Ok(config)
    }
}

#[cfg(test)]
mod config_tests {
    use super::DeviceSpec;

    #[test]
    fn gpus_argument_parses_all_three_forms() {
        assert_eq!(DeviceSpec::parse("-1").unwrap(), DeviceSpec::All);
        assert_eq!(DeviceSpec::parse("2").unwrap(), DeviceSpec::Count(2));
        assert_eq!(
            DeviceSpec::parse("0, 1").unwrap(),
            DeviceSpec::Ids(vec![0, 1])
        );
        assert!(DeviceSpec::parse("two").is_err());
    }
}
