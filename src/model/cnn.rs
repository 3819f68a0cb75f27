//! LeveeNet CNN architecture
//!
//! A stack of convolutional blocks followed by global average pooling and a
//! small classifier head. Outputs one logit per class; a sigmoid turns them
//! into independent levee / non-levee probabilities.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};

/// Default number of downsampling blocks
pub const DEFAULT_BLOCKS: usize = 3;

/// Configuration for the LeveeNet model
#[derive(Config, Debug)]
pub struct LeveeNetConfig {
    /// Number of output classes
    pub num_classes: usize,

    /// Number of raster bands
    #[config(default = "1")]
    pub in_channels: usize,

    /// Filters in the first block, doubled in every following block
    #[config(default = "16")]
    pub base_filters: usize,

    /// Conv blocks, each halving the spatial size
    #[config(default = "3")]
    pub num_blocks: usize,

    /// Dropout rate before the classifier
    #[config(default = "0.3")]
    pub dropout: f64,
}

impl LeveeNetConfig {
    /// Total spatial downsampling of the conv stack
    pub fn pool_factor(&self) -> usize {
        1 << self.num_blocks
    }

    /// Largest block count (capped at the default) the window can go through
    pub fn blocks_for_input(height: usize, width: usize) -> usize {
        let side = height.min(width).max(1);
        let max_blocks = (usize::BITS - 1 - side.leading_zeros()) as usize;
        max_blocks.min(DEFAULT_BLOCKS)
    }

    /// Channels coming out of the conv stack
    pub fn feature_channels(&self) -> usize {
        match self.num_blocks {
            0 => self.in_channels,
            n => self.base_filters << (n - 1),
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> LeveeNet<B> {
        LeveeNet::new(self, device)
    }
}

/// Conv2d, BatchNorm, ReLU, 2x2 MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
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
        self.pool.forward(x)
    }
}

/// Levee detection CNN
#[derive(Module, Debug)]
pub struct LeveeNet<B: Backend> {
    pub blocks: Vec<ConvBlock<B>>,
    pub global_pool: AdaptiveAvgPool2d,
    pub dropout: Dropout,
    pub head: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> LeveeNet<B> {
    pub fn new(config: &LeveeNetConfig, device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(config.num_blocks);
        let mut channels = config.in_channels;
        for i in 0..config.num_blocks {
            let out = config.base_filters << i;
            blocks.push(ConvBlock::new(channels, out, device));
            channels = out;
        }

        Self {
            blocks,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(config.dropout).init(),
            head: LinearConfig::new(config.feature_channels(), config.num_classes).init(device),
            num_classes: config.num_classes,
        }
    }

    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, channels, height, width]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));

        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.dropout.forward(x);
        self.head.forward(x)
    }

    /// Per-class probabilities
    pub fn predict(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        sigmoid(self.forward(x))
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}
