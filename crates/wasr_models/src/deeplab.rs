//! Dilated-convolution baseline. No IMU fusion stage.

use crate::wasr::EncoderBlock;
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
pub struct DeepLabConfig {
    pub channels: usize,
    pub blocks: usize,
    pub num_classes: usize,
    pub pretrained: bool,
}

impl DeepLabConfig {
    pub fn new(num_classes: usize, pretrained: bool) -> Self {
        Self {
            channels: 64,
            blocks: 2,
            num_classes,
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

fn dilated3x3<B: Backend>(
    channels: usize,
    dilation: usize,
    init: &Option<Initializer>,
    device: &B::Device,
) -> Conv2d<B> {
    let mut config = Conv2dConfig::new([channels, channels], [3, 3])
        .with_padding(PaddingConfig2d::Explicit(dilation, dilation))
        .with_dilation([dilation, dilation]);
    if let Some(init) = init {
        config = config.with_initializer(init.clone());
    }
    config.init(device)
}

#[derive(Debug, Module)]
pub struct DeepLabNet<B: Backend> {
    stem: Conv2d<B>,
    stem_norm: BatchNorm<B, 2>,
    blocks: Vec<EncoderBlock<B>>,
    /// Parallel dilated branches, summed before the head.
    aspp: Vec<Conv2d<B>>,
    aspp_norm: BatchNorm<B, 2>,
    head: Conv2d<B>,
}

impl<B: Backend> DeepLabNet<B> {
    pub fn new(config: DeepLabConfig, device: &B::Device) -> Self {
        let init = config.initializer();
        let channels = config.channels;
        let stem = {
            let mut stem_config = Conv2dConfig::new([3, channels], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1));
            if let Some(init) = &init {
                stem_config = stem_config.with_initializer(init.clone());
            }
            stem_config.init(device)
        };
        let blocks = (0..config.blocks)
            .map(|i| {
                let stride = if i == 0 { 2 } else { 1 };
                EncoderBlock::new(channels, stride, &init, device)
            })
            .collect();
        let aspp = [1, 2, 4]
            .iter()
            .map(|&dilation| dilated3x3(channels, dilation, &init, device))
            .collect();
        let head = {
            let mut head_config = Conv2dConfig::new([channels, config.num_classes], [1, 1]);
            if let Some(init) = &init {
                head_config = head_config.with_initializer(init.clone());
            }
            head_config.init(device)
        };
        Self {
            stem,
            stem_norm: BatchNormConfig::new(channels).init(device),
            blocks,
            aspp,
            aspp_norm: BatchNormConfig::new(channels).init(device),
            head,
        }
    }
}

impl<B: Backend> SegmentationModel<B> for DeepLabNet<B> {
    fn forward(&self, images: Tensor<B, 4>, _imu: Option<Tensor<B, 4>>) -> Tensor<B, 4> {
        let [_, _, height, width] = images.dims();
        let mut x = relu(self.stem_norm.forward(self.stem.forward(images)));
        for block in &self.blocks {
            x = block.forward(x);
        }
        let mut pooled: Option<Tensor<B, 4>> = None;
        for branch in &self.aspp {
            let y = branch.forward(x.clone());
            pooled = Some(match pooled {
                Some(acc) => acc + y,
                None => y,
            });
        }
        let x = match pooled {
            Some(sum) => relu(self.aspp_norm.forward(sum)),
            None => x,
        };
        let logits = self.head.forward(x);
        interpolate(
            logits,
            [height, width],
            InterpolateOptions::new(InterpolateMode::Bilinear),
        )
    }

    fn export(&self) -> ParamMap {
        let mut writer = ParamWriter::new();
        writer.conv("stem", &self.stem);
        writer.norm("stem_norm", &self.stem_norm);
        for (i, block) in self.blocks.iter().enumerate() {
            block.export(&format!("blocks.{i}"), &mut writer);
        }
        for (i, branch) in self.aspp.iter().enumerate() {
            writer.conv(&format!("aspp.{i}"), branch);
        }
        writer.norm("aspp_norm", &self.aspp_norm);
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
        let aspp = self
            .aspp
            .into_iter()
            .enumerate()
            .map(|(i, branch)| reader.conv(&format!("aspp.{i}"), branch, device))
            .collect::<Result<Vec<_>, _>>()?;
        let aspp_norm = reader.norm("aspp_norm", self.aspp_norm, device)?;
        let head = reader.conv("head", self.head, device)?;
        reader.finish()?;
        Ok(Self {
            stem,
            stem_norm,
            blocks,
            aspp,
            aspp_norm,
            head,
        })
    }
}
