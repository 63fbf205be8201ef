use clap::Parser;
use std::fs;
use std::path::Path;
use wasr_training::{ConfigError, DeviceSpec, MonitorMode, Precision, RunConfig, TrainArgs};
use wasr_models::ModelVariant;

fn touch(path: &Path) {
    fs::write(path, b"{}").unwrap();
}

fn minimal_args(dir: &Path) -> Vec<String> {
    let train = dir.join("train.json");
    touch(&train);
    vec![
        "train".to_string(),
        "--model-name".to_string(),
        "wasr_run".to_string(),
        "--train-file".to_string(),
        train.display().to_string(),
        "--output-dir".to_string(),
        dir.join("output").display().to_string(),
    ]
}

#[test]
fn defaults_match_the_documented_surface() {
    let dir = tempfile::tempdir().unwrap();
    let args = TrainArgs::try_parse_from(minimal_args(dir.path())).unwrap();
    let config = RunConfig::resolve(args).unwrap();

    assert_eq!(config.model, ModelVariant::WasrResnet101);
    assert_eq!(config.batch_size, 3);
    assert_eq!(config.num_classes, 3);
    assert_eq!(config.workers, 1);
    assert_eq!(config.epochs, 50);
    assert_eq!(config.learning_rate, 1e-6);
    assert_eq!(config.momentum, 0.9);
    assert_eq!(config.weight_decay, 1e-6);
    assert_eq!(config.lr_decay_pow, 0.9);
    assert_eq!(config.log_steps, 20);
    assert_eq!(config.devices, DeviceSpec::All);
    assert_eq!(config.precision, Precision::Full);
    assert_eq!(config.monitor_metric, "val/iou/obstacle");
    assert_eq!(config.monitor_mode, MonitorMode::Max);
    assert!(config.pretrained);
    assert!(config.augment);
    assert!(!config.validation);
    assert!(config.patience.is_none());
}

#[test]
fn model_name_and_train_file_are_required() {
    let dir = tempfile::tempdir().unwrap();
    let mut args = minimal_args(dir.path());
    args.remove(2);
    args.remove(1);
    let parsed = TrainArgs::try_parse_from(args).unwrap();
    let err = RunConfig::resolve(parsed).unwrap_err();
    assert!(matches!(err, ConfigError::Missing { field: "model-name" }));

    let mut args = minimal_args(dir.path());
    args.remove(4);
    args.remove(3);
    let parsed = TrainArgs::try_parse_from(args).unwrap();
    let err = RunConfig::resolve(parsed).unwrap_err();
    assert!(matches!(err, ConfigError::Missing { field: "train-file" }));
}

#[test]
fn bad_enum_values_are_rejected_at_parse_time() {
    let dir = tempfile::tempdir().unwrap();
    let mut args = minimal_args(dir.path());
    args.extend(["--precision".to_string(), "24".to_string()]);
    assert!(TrainArgs::try_parse_from(args).is_err());

    let mut args = minimal_args(dir.path());
    args.extend(["--model".to_string(), "unet".to_string()]);
    assert!(TrainArgs::try_parse_from(args).is_err());
}

#[test]
fn validation_requires_a_val_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut args = minimal_args(dir.path());
    args.push("--validation".to_string());
    let parsed = TrainArgs::try_parse_from(args).unwrap();
    let err = RunConfig::resolve(parsed).unwrap_err();
    assert!(matches!(err, ConfigError::Missing { field: "val-file" }));
}

#[test]
fn nonexistent_manifest_paths_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut args = minimal_args(dir.path());
    args[4] = dir.path().join("absent.json").display().to_string();
    let parsed = TrainArgs::try_parse_from(args).unwrap();
    let err = RunConfig::resolve(parsed).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::MissingPath {
            field: "train-file",
            ..
        }
    ));
}

#[test]
fn zero_valued_counters_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    for (flag, field) in [
        ("--batch-size", "batch-size"),
        ("--num-classes", "num-classes"),
        ("--log-steps", "log-steps"),
        ("--epochs", "epochs"),
        ("--patience", "patience"),
    ] {
        let mut args = minimal_args(dir.path());
        args.extend([flag.to_string(), "0".to_string()]);
        let parsed = TrainArgs::try_parse_from(args).unwrap();
        let err = RunConfig::resolve(parsed).unwrap_err();
        match err {
            ConfigError::Invalid { field: f, .. } => assert_eq!(f, field),
            other => panic!("expected Invalid for {flag}, got {other:?}"),
        }
    }
}

#[test]
fn invalid_gpus_string_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut args = minimal_args(dir.path());
    args.extend(["--gpus".to_string(), "two".to_string()]);
    let parsed = TrainArgs::try_parse_from(args).unwrap();
    let err = RunConfig::resolve(parsed).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { field: "gpus", .. }));
}

#[test]
fn explicit_seed_is_carried_through() {
    let dir = tempfile::tempdir().unwrap();
    let mut args = minimal_args(dir.path());
    args.extend(["--random-seed".to_string(), "1234".to_string()]);
    let parsed = TrainArgs::try_parse_from(args).unwrap();
    let config = RunConfig::resolve(parsed).unwrap();
    assert_eq!(config.seed, 1234);
}

#[test]
fn monitor_metric_mode_flag_selects_direction() {
    let dir = tempfile::tempdir().unwrap();
    let mut args = minimal_args(dir.path());
    args.extend(["--monitor-metric-mode".to_string(), "min".to_string()]);
    let parsed = TrainArgs::try_parse_from(args).unwrap();
    let config = RunConfig::resolve(parsed).unwrap();
    assert_eq!(config.monitor_mode, MonitorMode::Min);

    let mut args = minimal_args(dir.path());
    args.extend(["--monitor-mode".to_string(), "min".to_string()]);
    assert!(TrainArgs::try_parse_from(args).is_err());
}

#[test]
fn pretrained_accepts_an_explicit_false() {
    let dir = tempfile::tempdir().unwrap();
    let mut args = minimal_args(dir.path());
    args.extend(["--pretrained".to_string(), "false".to_string()]);
    let parsed = TrainArgs::try_parse_from(args).unwrap();
    let config = RunConfig::resolve(parsed).unwrap();
    assert!(!config.pretrained);
}
