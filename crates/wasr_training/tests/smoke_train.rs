use anyhow::Result;
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use wasr_training::{run_train, FitOutcome, TrainArgs};

/// Write a tiny synthetic split. `mask_value` above the class count makes
/// every pixel an ignore pixel, which keeps validation metrics constant.
fn synth_split(dir: &Path, count: usize, mask_value: u8) -> Result<PathBuf> {
    fs::create_dir_all(dir.join("images"))?;
    fs::create_dir_all(dir.join("masks"))?;
    let mut entries = Vec::new();
    for i in 0..count {
        let name = format!("frame{i}.png");
        let shade = (40 + i * 31 % 200) as u8;
        image::RgbImage::from_pixel(8, 8, image::Rgb([shade, 100, 180]))
            .save(dir.join("images").join(&name))?;
        let mut mask = image::GrayImage::from_pixel(8, 8, image::Luma([mask_value]));
        if mask_value == 0 {
            // Mix in some water and sky rows so the loss sees every class.
            for y in 3..6 {
                for x in 0..8 {
                    mask.put_pixel(x, y, image::Luma([1]));
                }
            }
            for x in 0..8 {
                mask.put_pixel(x, 7, image::Luma([2]));
            }
        }
        mask.save(dir.join("masks").join(&name))?;
        entries.push(format!(r#"{{"image":"{name}","mask":"{name}"}}"#));
    }
    let manifest = dir.join("split.json");
    fs::write(
        &manifest,
        format!(
            r#"{{"image_dir":"images","mask_dir":"masks","samples":[{}]}}"#,
            entries.join(",")
        ),
    )?;
    Ok(manifest)
}

fn base_args(train: &Path, out: &Path) -> Vec<String> {
    [
        "train",
        "--model-name",
        "smoke",
        "--model",
        "wasr_resnet50",
        "--train-file",
        &train.display().to_string(),
        "--output-dir",
        &out.display().to_string(),
        "--batch-size",
        "2",
        "--epochs",
        "2",
        "--workers",
        "0",
        "--log-steps",
        "1",
        "--learning-rate",
        "1e-3",
        "--random-seed",
        "7",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[test]
fn validation_run_produces_all_artifacts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let train = synth_split(&dir.path().join("train"), 6, 0)?;
    let val = synth_split(&dir.path().join("val"), 3, 0)?;
    let out = dir.path().join("out");

    let mut args = base_args(&train, &out);
    args.extend([
        "--validation".to_string(),
        "--val-file".to_string(),
        val.display().to_string(),
    ]);
    let outcome = run_train(TrainArgs::try_parse_from(args)?)?;
    assert_eq!(outcome, FitOutcome::Completed { epochs: 2 });

    let run_dir = out.join("logs/smoke/version_0");
    assert!(run_dir.join("hparams.json").exists());
    let metrics = fs::read_to_string(run_dir.join("metrics.jsonl"))?;
    assert!(metrics.contains("train/loss"));
    assert!(metrics.contains("val/iou/obstacle"));
    assert!(metrics.contains("val/iou/mean"));
    assert!(metrics.contains("val/loss"));

    for name in ["last", "best"] {
        let ckpt = run_dir.join("checkpoints").join(name);
        assert!(ckpt.join("model.bin").exists(), "missing {name}/model.bin");
        assert!(ckpt.join("optim.bin").exists(), "missing {name}/optim.bin");
        assert!(ckpt.join("state.json").exists(), "missing {name}/state.json");
    }
    Ok(())
}

#[test]
fn run_without_validation_trains_to_the_end() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let train = synth_split(&dir.path().join("train"), 6, 0)?;
    let out = dir.path().join("out");

    let outcome = run_train(TrainArgs::try_parse_from(base_args(&train, &out))?)?;
    assert_eq!(outcome, FitOutcome::Completed { epochs: 2 });

    let run_dir = out.join("logs/smoke/version_0");
    assert!(run_dir.join("checkpoints/last/model.bin").exists());
    assert!(!run_dir.join("checkpoints/best").exists());
    let metrics = fs::read_to_string(run_dir.join("metrics.jsonl"))?;
    assert!(!metrics.contains("val/"));
    Ok(())
}

#[test]
fn constant_metric_triggers_early_stopping() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // All-ignore masks pin every validation metric at zero.
    let train = synth_split(&dir.path().join("train"), 4, 5)?;
    let val = synth_split(&dir.path().join("val"), 2, 5)?;
    let out = dir.path().join("out");

    let mut args = base_args(&train, &out);
    let pos = args.iter().position(|a| a == "--epochs").unwrap();
    args[pos + 1] = "6".to_string();
    args.extend([
        "--validation".to_string(),
        "--val-file".to_string(),
        val.display().to_string(),
        "--patience".to_string(),
        "2".to_string(),
    ]);
    let outcome = run_train(TrainArgs::try_parse_from(args)?)?;
    // Epoch 0 sets the baseline; epochs 1 and 2 exhaust the patience.
    assert_eq!(outcome, FitOutcome::EarlyStopped { epoch: 2 });
    Ok(())
}

#[test]
fn resume_continues_from_the_saved_epoch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let train = synth_split(&dir.path().join("train"), 6, 0)?;
    let out = dir.path().join("out");

    run_train(TrainArgs::try_parse_from(base_args(&train, &out))?)?;
    let last = out.join("logs/smoke/version_0/checkpoints/last");
    let state: serde_json::Value = serde_json::from_str(&fs::read_to_string(last.join("state.json"))?)?;
    assert_eq!(state["epoch"], 2);

    let mut args = base_args(&train, &out);
    let pos = args.iter().position(|a| a == "--epochs").unwrap();
    args[pos + 1] = "4".to_string();
    args.extend([
        "--resume-from".to_string(),
        last.display().to_string(),
    ]);
    let outcome = run_train(TrainArgs::try_parse_from(args)?)?;
    assert_eq!(outcome, FitOutcome::Completed { epochs: 4 });

    let resumed_state: serde_json::Value = serde_json::from_str(&fs::read_to_string(
        out.join("logs/smoke/version_1/checkpoints/last/state.json"),
    )?)?;
    assert_eq!(resumed_state["epoch"], 4);
    Ok(())
}

#[test]
fn deeplab_with_imu_request_still_trains() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let train = synth_split(&dir.path().join("train"), 4, 0)?;
    let out = dir.path().join("out");

    let mut args = base_args(&train, &out);
    let model_pos = args.iter().position(|a| a == "wasr_resnet50").unwrap();
    args[model_pos] = "deeplab".to_string();
    args.push("--imu".to_string());
    let outcome = run_train(TrainArgs::try_parse_from(args)?)?;
    assert_eq!(outcome, FitOutcome::Completed { epochs: 2 });
    Ok(())
}
