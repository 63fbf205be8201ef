//! WaSR-style encoder-decoder with optional IMU horizon fusion.

use crate::weights::{ParamMap, ParamReader, ParamWriter, WeightLoadError};
use crate::SegmentationModel;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use burn::tensor::Tensor;

#[derive(Debug, Clone)]
pub struct WasrConfig {
    pub channels: usize,
    pub blocks: usize,
    pub num_classes: usize,
    /// Adds the IMU fusion stage after the encoder.
    pub use_imu: bool,
    /// Use the initialization scheme matched to warm-started backbones.
    pub pretrained: bool,
}

impl WasrConfig {
    /// Deeper encoder, the default architecture.
    pub fn resnet101(num_classes: usize, use_imu: bool, pretrained: bool) -> Self {
        Self {
            channels: 64,
            blocks: 4,
            num_classes,
            use_imu,
            pretrained,
        }
    }

    /// Lighter encoder for constrained hosts.
    pub fn resnet50(num_classes: usize, use_imu: bool, pretrained: bool) -> Self {
        Self {
            channels: 48,
            blocks: 3,
            num_classes,
            use_imu,
            pretrained,
        }
    }

    fn initializer(&self) -> Option<Initializer> {
        self.pretrained.then(|| Initializer::KaimingNormal {
            gain: std::f64::consts::SQRT_2,
            fan_out_only: true,
        })
    }
}

fn conv3x3<B: Backend>(
    channels_in: usize,
    channels_out: usize,
    stride: usize,
    init: &Option<Initializer>,
    device: &B::Device,
) -> Conv2d<B> {
    let mut config = Conv2dConfig::new([channels_in, channels_out], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1));
    if let Some(init) = init {
        config = config.with_initializer(init.clone());
    }
    config.init(device)
}

fn conv1x1<B: Backend>(
    channels_in: usize,
    channels_out: usize,
    init: &Option<Initializer>,
    device: &B::Device,
) -> Conv2d<B> {
    let mut config = Conv2dConfig::new([channels_in, channels_out], [1, 1]);
    if let Some(init) = init {
        config = config.with_initializer(init.clone());
    }
    config.init(device)
}

fn bilinear() -> InterpolateOptions {
    InterpolateOptions::new(InterpolateMode::Bilinear)
}

/// Two 3x3 convolutions with batch norm; the first may downsample.
#[derive(Debug, Module)]
pub struct EncoderBlock<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
}

impl<B: Backend> EncoderBlock<B> {
    pub(crate) fn new(
        channels: usize,
        stride: usize,
        init: &Option<Initializer>,
        device: &B::Device,
    ) -> Self {
        Self {
            conv1: conv3x3(channels, channels, stride, init, device),
            norm1: BatchNormConfig::new(channels).init(device),
            conv2: conv3x3(channels, channels, 1, init, device),
            norm2: BatchNormConfig::new(channels).init(device),
        }
    }

    pub(crate) fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.norm1.forward(self.conv1.forward(x)));
        relu(self.norm2.forward(self.conv2.forward(x)))
    }

    pub(crate) fn export(&self, prefix: &str, writer: &mut ParamWriter) {
        writer.conv(&format!("{prefix}.conv1"), &self.conv1);
        writer.norm(&format!("{prefix}.norm1"), &self.norm1);
        writer.conv(&format!("{prefix}.conv2"), &self.conv2);
        writer.norm(&format!("{prefix}.norm2"), &self.norm2);
    }

    pub(crate) fn restore(
        self,
        prefix: &str,
        reader: &mut ParamReader,
        device: &B::Device,
    ) -> Result<Self, WeightLoadError> {
        Ok(Self {
            conv1: reader.conv(&format!("{prefix}.conv1"), self.conv1, device)?,
            norm1: reader.norm(&format!("{prefix}.norm1"), self.norm1, device)?,
            conv2: reader.conv(&format!("{prefix}.conv2"), self.conv2, device)?,
            norm2: reader.norm(&format!("{prefix}.norm2"), self.norm2, device)?,
        })
    }
}

#[derive(Debug, Module)]
pub struct WasrNet<B: Backend> {
    stem: Conv2d<B>,
    stem_norm: BatchNorm<B, 2>,
    blocks: Vec<EncoderBlock<B>>,
    imu_fuse: Option<Conv2d<B>>,
    fuse_norm: Option<BatchNorm<B, 2>>,
    decoder: Conv2d<B>,
    decoder_norm: BatchNorm<B, 2>,
    head: Conv2d<B>,
}

impl<B: Backend> WasrNet<B> {
    pub fn new(config: WasrConfig, device: &B::Device) -> Self {
        let init = config.initializer();
        let channels = config.channels;
        let blocks = (0..config.blocks)
            .map(|i| {
                let stride = if i == 0 { 2 } else { 1 };
                EncoderBlock::new(channels, stride, &init, device)
            })
            .collect();
        let (imu_fuse, fuse_norm) = if config.use_imu {
            (
                Some(conv1x1(channels + 1, channels, &init, device)),
                Some(BatchNormConfig::new(channels).init(device)),
            )
        } else {
            (None, None)
        };
        Self {
            stem: conv3x3(3, channels, 2, &init, device),
            stem_norm: BatchNormConfig::new(channels).init(device),
            blocks,
            imu_fuse,
            fuse_norm,
            decoder: conv3x3(channels, channels, 1, &init, device),
            decoder_norm: BatchNormConfig::new(channels).init(device),
            head: conv1x1(channels, config.num_classes, &init, device),
        }
    }
}

impl<B: Backend> SegmentationModel<B> for WasrNet<B> {
    fn forward(&self, images: Tensor<B, 4>, imu: Option<Tensor<B, 4>>) -> Tensor<B, 4> {
        let [n, _, height, width] = images.dims();
        let mut x = relu(self.stem_norm.forward(self.stem.forward(images)));
        for block in &self.blocks {
            x = block.forward(x);
        }
        if let (Some(fuse), Some(fuse_norm)) = (&self.imu_fuse, &self.fuse_norm) {
            let [_, _, fh, fw] = x.dims();
            // Missing IMU input degrades to an all-zero horizon plane.
            let plane = match imu {
                Some(imu) => interpolate(imu, [fh, fw], bilinear()),
                None => Tensor::zeros([n, 1, fh, fw], &x.device()),
            };
            let fused = Tensor::cat(vec![x, plane], 1);
            x = relu(fuse_norm.forward(fuse.forward(fused)));
        }
        let x = relu(self.decoder_norm.forward(self.decoder.forward(x)));
        let logits = self.head.forward(x);
        interpolate(logits, [height, width], bilinear())
    }

    fn export(&self) -> ParamMap {
        let mut writer = ParamWriter::new();
        writer.conv("stem", &self.stem);
        writer.norm("stem_norm", &self.stem_norm);
        for (i, block) in self.blocks.iter().enumerate() {
            block.export(&format!("blocks.{i}"), &mut writer);
        }
        if let (Some(fuse), Some(fuse_norm)) = (&self.imu_fuse, &self.fuse_norm) {
            writer.conv("imu_fuse", fuse);
            writer.norm("fuse_norm", fuse_norm);
        }
        writer.conv("decoder", &self.decoder);
        writer.norm("decoder_norm", &self.decoder_norm);
        writer.conv("head", &self.head);
        writer.finish()
    }

    fn restore(self, params: &ParamMap, device: &B::Device) -> Result<Self, WeightLoadError> {
        let mut reader = ParamReader::new(params);
        let stem = reader.conv("stem", self.stem, device)?;
        let stem_norm = reader.norm("stem_norm", self.stem_norm, device)?;
        let blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| block.restore(&format!("blocks.{i}"), &mut reader, device))
            .collect::<Result<Vec<_>, _>>()?;
        let imu_fuse = match self.imu_fuse {
            Some(fuse) => Some(reader.conv("imu_fuse", fuse, device)?),
            None => None,
        };
        let fuse_norm = match self.fuse_norm {
            Some(norm) => Some(reader.norm("fuse_norm", norm, device)?),
            None => None,
        };
        let decoder = reader.conv("decoder", self.decoder, device)?;
        let decoder_norm = reader.norm("decoder_norm", self.decoder_norm, device)?;
        let head = reader.conv("head", self.head, device)?;
        reader.finish()?;
        Ok(Self {
            stem,
            stem_norm,
            blocks,
            imu_fuse,
            fuse_norm,
            decoder,
            decoder_norm,
            head,
        })
    }
}
