//! CNN backbone shared by both co-teaching peers
//!
//! A stack of conv blocks, global average pooling and a two-layer head. The
//! head emits class logits, or an embedding when the run trains with a
//! triplet loss. Global pooling keeps the network independent of the input
//! resolution, so un-resized images work as well.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::config::BackboneKind;

#[derive(Config, Debug)]
pub struct CoTeachingNetConfig {
    /// Width of the output: class count, or embedding size
    pub output_dim: usize,

    /// Emit an embedding instead of logits
    #[config(default = false)]
    pub return_embedding: bool,

    /// Number of conv blocks, each halving the resolution until it reaches 1
    #[config(default = 4)]
    pub depth: usize,

    #[config(default = 32)]
    pub base_filters: usize,

    #[config(default = 256)]
    pub hidden_units: usize,

    #[config(default = 0.3)]
    pub dropout_rate: f64,

    #[config(default = 3)]
    pub in_channels: usize,
}

/// Embedding width of the triplet variants
pub const EMBEDDING_DIM: usize = 128;

impl CoTeachingNetConfig {
    /// Configuration of a named backbone
    pub fn for_backbone(kind: BackboneKind, output_dim: usize, return_embedding: bool) -> Self {
        let config = Self::new(output_dim).with_return_embedding(return_embedding);
        match kind {
            BackboneKind::CoTeaching => config,
            BackboneKind::Lite => config
                .with_depth(3)
                .with_base_filters(16)
                .with_hidden_units(128),
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> CoTeachingNet<B> {
        CoTeachingNet::new(self, device)
    }
}

/// Conv2d, BatchNorm, ReLU, MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);

        let [_, _, height, width] = x.dims();
        if height < 2 || width < 2 {
            return x;
        }
        self.pool.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct CoTeachingNet<B: Backend> {
    pub blocks: Vec<ConvBlock<B>>,
    pub global_pool: AdaptiveAvgPool2d,
    pub fc: Linear<B>,
    pub dropout: Dropout,
    pub head: Linear<B>,
    hidden_units: usize,
    output_dim: usize,
    return_embedding: bool,
}

impl<B: Backend> CoTeachingNet<B> {
    pub fn new(config: &CoTeachingNetConfig, device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(config.depth);
        let mut channels = config.in_channels;
        for i in 0..config.depth {
            let out = config.base_filters << i;
            blocks.push(ConvBlock::new(channels, out, device));
            channels = out;
        }

        Self {
            blocks,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(channels, config.hidden_units).init(device),
            dropout: DropoutConfig::new(config.dropout_rate).init(),
            head: LinearConfig::new(config.hidden_units, config.output_dim).init(device),
            hidden_units: config.hidden_units,
            output_dim: config.output_dim,
            return_embedding: config.return_embedding,
        }
    }

    /// `[N, C, H, W]` to logits `[N, classes]` or embeddings `[N, D]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = x;
        for block in &self.blocks {
            x = block.forward(x);
        }

        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.fc.forward(x);
        let x = Relu::new().forward(x);
        let x = self.dropout.forward(x);
        self.head.forward(x)
    }

    /// Replace the output layer with a freshly initialised one of `output_dim`
    /// outputs, keeping every other weight
    pub fn with_new_head(mut self, output_dim: usize, device: &B::Device) -> Self {
        self.head = LinearConfig::new(self.hidden_units, output_dim).init(device);
        self.output_dim = output_dim;
        self
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn returns_embedding(&self) -> bool {
        self.return_embedding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn small_config(output_dim: usize) -> CoTeachingNetConfig {
        CoTeachingNetConfig::new(output_dim)
            .with_depth(2)
            .with_base_filters(4)
            .with_hidden_units(8)
    }

    #[test]
    fn test_logits_shape() {
        let device = Default::default();
        let model: CoTeachingNet<TestBackend> = small_config(5).init(&device);

        let output = model.forward(Tensor::zeros([2, 3, 16, 16], &device));
        assert_eq!(output.dims(), [2, 5]);
        assert!(!model.returns_embedding());
    }

    #[test]
    fn test_default_depth_on_small_inputs() {
        let device = Default::default();
        let model: CoTeachingNet<TestBackend> = CoTeachingNetConfig::new(2)
            .with_base_filters(4)
            .with_hidden_units(8)
            .init(&device);

        // four blocks, but only three halvings fit in 8x8
        let output = model.forward(Tensor::zeros([1, 3, 8, 8], &device));
        assert_eq!(output.dims(), [1, 2]);

        let output = model.forward(Tensor::zeros([2, 3, 3, 1], &device));
        assert_eq!(output.dims(), [2, 2]);
    }

    #[test]
    fn test_any_input_size() {
        let device = Default::default();
        let model: CoTeachingNet<TestBackend> = small_config(3).init(&device);

        let output = model.forward(Tensor::zeros([1, 3, 20, 28], &device));
        assert_eq!(output.dims(), [1, 3]);
    }

    #[test]
    fn test_new_head_changes_output_width() {
        let device = Default::default();
        let model: CoTeachingNet<TestBackend> = small_config(365).init(&device);
        let model = model.with_new_head(8, &device);

        assert_eq!(model.output_dim(), 8);
        let output = model.forward(Tensor::zeros([3, 3, 8, 8], &device));
        assert_eq!(output.dims(), [3, 8]);
    }

    #[test]
    fn test_backbone_presets() {
        let full = CoTeachingNetConfig::for_backbone(BackboneKind::CoTeaching, 8, false);
        let lite = CoTeachingNetConfig::for_backbone(BackboneKind::Lite, EMBEDDING_DIM, true);

        assert_eq!(full.depth, 4);
        assert_eq!(lite.depth, 3);
        assert!(lite.return_embedding);
        assert_eq!(lite.output_dim, EMBEDDING_DIM);
    }
}
