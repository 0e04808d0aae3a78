//! Input embedders of positions, times and view directions.

pub mod frequency;
pub mod hash;

pub use burn::{
    config::Config,
    module::{Module, Param},
    tensor::{backend::Backend, Int, Tensor, TensorData},
};
pub use frequency::*;
pub use hash::*;

use crate::error::Error;

/// The configuration for [`Encoder`].
#[derive(Config, Debug)]
pub enum EncoderConfig {
    Frequency(FrequencyEncoderConfig),
    Hash(HashEncoderConfig),
}

/// An embedder selected at configuration time.
#[derive(Clone, Debug)]
pub enum Encoder<B: Backend> {
    Frequency(FrequencyEncoder),
    Hash(HashEncoder<B>),
}

impl EncoderConfig {
    /// Initialize from the configuration.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<Encoder<B>, Error> {
        Ok(match self {
            Self::Frequency(config) => Encoder::Frequency(config.init()),
            Self::Hash(config) => Encoder::Hash(config.init(device)?),
        })
    }
}

impl<B: Backend> Encoder<B> {
    #[inline]
    pub fn dim_output(&self) -> usize {
        match self {
            Self::Frequency(encoder) => encoder.dim_output(),
            Self::Hash(encoder) => encoder.dim_output(),
        }
    }

    /// ## Shapes
    ///
    /// * `input` - `[N, D]`
    /// * `output` - [`[N, dim_output]`](Self::dim_output)
    #[inline]
    pub fn forward(
        &self,
        input: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        match self {
            Self::Frequency(encoder) => encoder.forward(input),
            Self::Hash(encoder) => encoder.forward(input),
        }
    }
}
