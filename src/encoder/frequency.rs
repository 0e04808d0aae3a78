//! Frequency (positional) encoding.

pub use super::*;

/// The configuration for [`FrequencyEncoder`].
#[derive(Config, Copy, Debug)]
pub struct FrequencyEncoderConfig {
    /// Input dimension.
    pub dim_input: usize,
    /// The number of octaves, `L`.
    #[config(default = 10)]
    pub frequency_count: usize,
}

/// Frequency encoding with the input kept in front.
///
/// `[x, sin(2^0 * x), cos(2^0 * x), .., sin(2^(L - 1) * x), cos(2^(L - 1) * x)]`
#[derive(Clone, Debug, Module)]
pub struct FrequencyEncoder {
    /// Input dimension.
    pub dim_input: usize,
    /// `L`
    pub frequency_count: usize,
}

impl FrequencyEncoderConfig {
    /// Initialize from the configuration.
    pub fn init(&self) -> FrequencyEncoder {
        FrequencyEncoder {
            dim_input: self.dim_input,
            frequency_count: self.frequency_count,
        }
    }
}

impl FrequencyEncoder {
    /// `dim_input * (1 + 2 * L)`
    #[inline]
    pub fn dim_output(&self) -> usize {
        self.dim_input * (1 + 2 * self.frequency_count)
    }

    /// ## Shapes
    ///
    /// * `input` - `[N, dim_input]`
    /// * `output` - [`[N, dim_output]`](Self::dim_output)
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let mut features = Vec::with_capacity(1 + 2 * self.frequency_count);
        features.push(input.to_owned());

        for octave in 0..self.frequency_count {
            let scaled = input.to_owned().mul_scalar((1_u64 << octave) as f32);
            features.push(scaled.to_owned().sin());
            features.push(scaled.cos());
        }

        Tensor::cat(features, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn forward() {
        let device = &Default::default();
        let encoder = FrequencyEncoderConfig::new(1)
            .with_frequency_count(2)
            .init();
        assert_eq!(encoder.dim_output(), 5);

        let input = Tensor::<B, 2>::from_floats([[0.0], [0.5]], device);
        let output = encoder.forward(input);

        output.into_data().assert_approx_eq_diff(
            &TensorData::from([
                [0.0f32, 0.0, 1.0, 0.0, 1.0],
                [
                    0.5,
                    0.5f32.sin(),
                    0.5f32.cos(),
                    1.0f32.sin(),
                    1.0f32.cos(),
                ],
            ]),
            1e-6,
        );
    }

    #[test]
    fn forward_without_octaves() {
        let device = &Default::default();
        let encoder = FrequencyEncoderConfig::new(3)
            .with_frequency_count(0)
            .init();
        let input = Tensor::<B, 2>::from_floats([[1.0, 2.0, 3.0]], device);
        let output = encoder.forward(input.to_owned());

        assert_eq!(output.dims(), [1, 3]);
        output.into_data().assert_eq(&input.into_data(), true);
    }
}
