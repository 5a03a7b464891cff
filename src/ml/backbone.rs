// ============================================================
// Layer 5 — ResNet v1 Embedding Backbone
// ============================================================
// One parameterised network instead of a class per depth:
//
//   stem:   7x7/2 conv → BN → ReLU → 3x3/2 max-pool
//   stages: 4 stages of residual blocks with
//           filters = base, 2·base, 4·base, 8·base
//           (first block of stages 2–4 has stride 2)
//   head:   global average pool → Linear(embedding_size)
//
// Which residual block is used, and how many per stage, is
// data (`BlockKind` + `layers`). ResNet-18/34 use basic blocks,
// ResNet-50/101/152 use bottlenecks.
//
// The shortcut gets a 1x1 conv + BN projection exactly when
// the block changes the tensor shape (stride != 1 or channel
// count differs); otherwise it is the identity.
//
// Reference: He et al. (2016) Deep Residual Learning

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::relu,
};

use crate::domain::config::BlockKind;

#[derive(Config, Debug)]
pub struct ResNetConfig {
    pub block:          BlockKind,
    pub layers:         [usize; 4],
    pub embedding_size: usize,
    #[config(default = 64)]
    pub base_filters:   usize,
}

impl ResNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let stem_conv = conv(3, self.base_filters, 7, 2, device);
        let stem_bn   = BatchNormConfig::new(self.base_filters).init(device);
        let maxpool   = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut in_channels = self.base_filters;
        let mut stages      = Vec::with_capacity(4);
        for (stage, &count) in self.layers.iter().enumerate() {
            let filters = self.base_filters << stage;
            let mut blocks = Vec::with_capacity(count);
            for i in 0..count {
                let stride = if stage > 0 && i == 0 { 2 } else { 1 };
                blocks.push(ResidualBlock::new(self.block, in_channels, filters, stride, device));
                in_channels = filters * self.block.expansion();
            }
            stages.push(blocks);
        }

        ResNet {
            stem_conv,
            stem_bn,
            maxpool,
            stages,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            embedding:   LinearConfig::new(in_channels, self.embedding_size).init(device),
        }
    }
}

/// k×k convolution with "same"-style padding (ceil(in / stride) output).
fn conv<B: Backend>(
    in_ch:  usize,
    out_ch: usize,
    kernel: usize,
    stride: usize,
    device: &B::Device,
) -> Conv2d<B> {
    let pad = (kernel - 1) / 2;
    Conv2dConfig::new([in_ch, out_ch], [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(pad, pad))
        .init(device)
}

#[derive(Module, Debug)]
pub struct Projection<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn:   BatchNorm<B, 2>,
}

/// A basic block leaves `conv3`/`bn3` empty; a bottleneck fills them.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    pub conv1:    Conv2d<B>,
    pub bn1:      BatchNorm<B, 2>,
    pub conv2:    Conv2d<B>,
    pub bn2:      BatchNorm<B, 2>,
    pub conv3:    Option<Conv2d<B>>,
    pub bn3:      Option<BatchNorm<B, 2>>,
    pub shortcut: Option<Projection<B>>,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn new(
        kind:        BlockKind,
        in_channels: usize,
        filters:     usize,
        stride:      usize,
        device:      &B::Device,
    ) -> Self {
        let out_channels = filters * kind.expansion();

        let (conv1, conv2, conv3) = match kind {
            BlockKind::Basic => (
                conv(in_channels, filters, 3, stride, device),
                conv(filters, filters, 3, 1, device),
                None,
            ),
            BlockKind::Bottleneck => (
                conv(in_channels, filters, 1, stride, device),
                conv(filters, filters, 3, 1, device),
                Some(conv(filters, out_channels, 1, 1, device)),
            ),
        };
        let bn3 = conv3.as_ref().map(|_| BatchNormConfig::new(out_channels).init(device));

        let shortcut = (stride != 1 || in_channels != out_channels).then(|| Projection {
            conv: conv(in_channels, out_channels, 1, stride, device),
            bn:   BatchNormConfig::new(out_channels).init(device),
        });

        Self {
            conv1,
            bn1: BatchNormConfig::new(filters).init(device),
            conv2,
            bn2: BatchNormConfig::new(filters).init(device),
            conv3,
            bn3,
            shortcut,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.bn1.forward(self.conv1.forward(input.clone())));
        let x = self.bn2.forward(self.conv2.forward(x));

        let x = match (&self.conv3, &self.bn3) {
            (Some(conv3), Some(bn3)) => bn3.forward(conv3.forward(relu(x))),
            _ => x,
        };

        let residual = match &self.shortcut {
            Some(proj) => proj.bn.forward(proj.conv.forward(input)),
            None       => input,
        };
        relu(x + residual)
    }
}

#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    pub stem_conv:   Conv2d<B>,
    pub stem_bn:     BatchNorm<B, 2>,
    pub maxpool:     MaxPool2d,
    pub stages:      Vec<Vec<ResidualBlock<B>>>,
    pub global_pool: AdaptiveAvgPool2d,
    pub embedding:   Linear<B>,
}

impl<B: Backend> ResNet<B> {
    /// images: [batch, 3, H, W] → embeddings (pre-logits): [batch, embedding_size]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.stem_bn.forward(self.stem_conv.forward(images)));
        let mut x = self.maxpool.forward(x);

        for stage in &self.stages {
            for block in stage {
                x = block.forward(x);
            }
        }

        let [batch, channels, _, _] = x.dims();
        let pooled = self.global_pool.forward(x).reshape([batch, channels]);
        self.embedding.forward(pooled)
    }
}
