use anyhow::Result;
use burn::backend::NdArray;
use burn::tensor::{Distribution, Tensor};
use wasr_models::{
    DeepLabConfig, DeepLabNet, SegmentationModel, WasrConfig, WasrNet, WeightBlob, WeightLoadError,
};

type B = NdArray<f32>;

fn sample_input(device: &<B as burn::tensor::backend::Backend>::Device) -> Tensor<B, 4> {
    Tensor::random([1, 3, 16, 16], Distribution::Uniform(-1.0, 1.0), device)
}

#[test]
fn bare_and_wrapped_blobs_restore_identically() -> Result<()> {
    let device = Default::default();
    let source = WasrNet::<B>::new(WasrConfig::resnet50(3, true, false), &device);
    let params = source.export();

    let dir = tempfile::tempdir()?;
    let bare_path = dir.path().join("bare.json");
    let wrapped_path = dir.path().join("wrapped.json");
    std::fs::write(&bare_path, serde_json::to_vec(&params)?)?;
    std::fs::write(
        &wrapped_path,
        serde_json::to_vec(&serde_json::json!({ "model": params }))?,
    )?;

    let from_bare = WasrNet::<B>::new(WasrConfig::resnet50(3, true, false), &device)
        .restore(&WeightBlob::load(&bare_path)?, &device)?;
    let from_wrapped = WasrNet::<B>::new(WasrConfig::resnet50(3, true, false), &device)
        .restore(&WeightBlob::load(&wrapped_path)?, &device)?;

    let input = sample_input(&device);
    let a = source
        .forward(input.clone(), None)
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    let b = from_bare
        .forward(input.clone(), None)
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    let c = from_wrapped
        .forward(input, None)
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(a, c);
    Ok(())
}

#[test]
fn restore_rejects_missing_parameter() {
    let device = Default::default();
    let source = WasrNet::<B>::new(WasrConfig::resnet50(3, false, false), &device);
    let mut params = source.export();
    params.remove("head.weight");

    let err = WasrNet::<B>::new(WasrConfig::resnet50(3, false, false), &device)
        .restore(&params, &device)
        .unwrap_err();
    assert!(matches!(err, WeightLoadError::Missing { name } if name == "head.weight"));
}

#[test]
fn restore_rejects_shape_mismatch() {
    let device = Default::default();
    // resnet50 weights do not fit a resnet101 layout.
    let params = WasrNet::<B>::new(WasrConfig::resnet50(3, false, false), &device).export();
    let err = WasrNet::<B>::new(WasrConfig::resnet101(3, false, false), &device)
        .restore(&params, &device)
        .unwrap_err();
    assert!(matches!(err, WeightLoadError::ShapeMismatch { .. }));
}

#[test]
fn restore_rejects_leftover_entries() {
    let device = Default::default();
    // IMU-enabled weights carry fusion parameters an IMU-less model never reads.
    let params = WasrNet::<B>::new(WasrConfig::resnet50(3, true, false), &device).export();
    let err = WasrNet::<B>::new(WasrConfig::resnet50(3, false, false), &device)
        .restore(&params, &device)
        .unwrap_err();
    match err {
        WeightLoadError::Unexpected { names } => {
            assert!(names.iter().any(|n| n.starts_with("imu_fuse")));
        }
        other => panic!("expected Unexpected, got {other:?}"),
    }
}

#[test]
fn deeplab_ignores_imu_input() {
    let device = Default::default();
    let model = DeepLabNet::<B>::new(DeepLabConfig::new(3, false), &device);
    let input = sample_input(&device);
    let imu = Tensor::<B, 4>::ones([1, 1, 16, 16], &device);

    let without = model
        .forward(input.clone(), None)
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    let with = model
        .forward(input, Some(imu))
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert_eq!(without, with);
}

#[test]
fn wasr_output_matches_input_resolution() {
    let device = Default::default();
    let model = WasrNet::<B>::new(WasrConfig::resnet101(3, true, true), &device);
    let input = Tensor::<B, 4>::random([2, 3, 24, 20], Distribution::Uniform(-1.0, 1.0), &device);
    let imu = Tensor::<B, 4>::zeros([2, 1, 24, 20], &device);
    let logits = model.forward(input, Some(imu));
    assert_eq!(logits.dims(), [2, 3, 24, 20]);
}
