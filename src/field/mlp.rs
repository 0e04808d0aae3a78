//! Multi-layer perceptron with skip connections.

pub use super::*;
pub use burn::nn::{Linear, Relu};

use burn::nn::LinearConfig;

/// The configuration for [`SkipMlp`].
#[derive(Config, Debug)]
pub struct SkipMlpConfig {
    /// Input dimension.
    pub dim_input: usize,
    /// The dimension of the input concatenated after each skip layer.
    pub dim_skip: usize,
    /// Hidden dimension.
    #[config(default = 256)]
    pub dim_hidden: usize,
    /// The number of linear layers.
    #[config(default = 8)]
    pub depth: usize,
    /// The layer indices followed by a skip connection.
    #[config(default = "vec![4]")]
    pub skips: Vec<usize>,
}

/// Stacked linear layers with ReLU activations.
///
/// After the layer `i` in [`skips`](SkipMlpConfig::skips),
/// the skip input is concatenated in front of the hidden features.
///
/// ## Details
///
/// The output is the activated hidden features of the last layer.
#[derive(Debug, Module)]
pub struct SkipMlp<B: Backend> {
    pub layers: Vec<Linear<B>>,
    pub activation: Relu,
    pub skips: Vec<usize>,
}

impl SkipMlpConfig {
    /// Initialize from the configuration.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> SkipMlp<B> {
        let layers = (0..self.depth)
            .map(|index| {
                let dim_input = match index {
                    0 => self.dim_input,
                    _ if self.skips.contains(&(index - 1)) => {
                        self.dim_hidden + self.dim_skip
                    },
                    _ => self.dim_hidden,
                };
                LinearConfig::new(dim_input, self.dim_hidden).init(device)
            })
            .collect();

        SkipMlp {
            layers,
            activation: Relu::new(),
            skips: self.skips.to_owned(),
        }
    }
}

impl<B: Backend> SkipMlp<B> {
    /// ## Shapes
    ///
    /// * `input` - [`[N, dim_input]`](SkipMlpConfig::dim_input)
    /// * `skip` - [`[N, dim_skip]`](SkipMlpConfig::dim_skip)
    /// * `output` - [`[N, dim_hidden]`](SkipMlpConfig::dim_hidden)
    pub fn forward(
        &self,
        input: Tensor<B, 2>,
        skip: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let mut hidden = input;

        for (index, layer) in self.layers.iter().enumerate() {
            hidden = self.activation.forward(layer.forward(hidden));
            // The last layer has no successor to feed.
            if self.skips.contains(&index) && index + 1 < self.layers.len() {
                hidden = Tensor::cat(vec![skip.to_owned(), hidden], 1);
            }
        }

        hidden
    }
}
