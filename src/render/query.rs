//! Field query adapter.

pub use super::*;

use crate::{
    encoder::{EncoderConfig, FrequencyEncoderConfig},
    field::{FieldInput, FieldOutput},
};

/// The configuration for [`FieldQuery`].
#[derive(Config, Debug)]
pub struct FieldQueryConfig {
    /// The embedder of times, `[N, 1] -> [N, C_t]`.
    #[config(default = "EncoderConfig::Frequency(FrequencyEncoderConfig::new(1))")]
    pub time_encoder: EncoderConfig,
    /// The embedder of view directions, `[N, 3] -> [N, C_v]`.
    pub view_encoder: Option<EncoderConfig>,
    /// Times are embedded point by point.
    #[config(default = true)]
    pub is_time_embedding_discrete: bool,
}

/// Embeds the samples of a ray batch and queries a field with them.
#[derive(Clone, Debug)]
pub struct FieldQuery<B: Backend> {
    pub time_encoder: Encoder<B>,
    pub view_encoder: Option<Encoder<B>>,
}

/// The field output of every sample.
#[derive(Clone, Debug)]
pub struct FieldSamples<B: Backend> {
    /// `[R, S, 4]`
    pub raw: Tensor<B, 3>,
    /// `[R, S, 3]`
    pub positions_delta: Tensor<B, 3>,
}

impl FieldQueryConfig {
    /// Initialize from the configuration.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<FieldQuery<B>, Error> {
        if !self.is_time_embedding_discrete {
            return Err(Error::Unsupported(
                "Continuous time embedding".into(),
            ));
        }

        Ok(FieldQuery {
            time_encoder: self.time_encoder.init(device)?,
            view_encoder: self
                .view_encoder
                .as_ref()
                .map(|config| config.init(device))
                .transpose()?,
        })
    }
}

impl<B: Backend> FieldQuery<B> {
    /// `C_t`
    #[inline]
    pub fn dim_time_embedded(&self) -> usize {
        self.time_encoder.dim_output()
    }

    /// `C_v`, `0` if views are not embedded.
    #[inline]
    pub fn dim_view_embedded(&self) -> usize {
        self.view_encoder
            .as_ref()
            .map(Encoder::dim_output)
            .unwrap_or_default()
    }

    /// Queries `field` at every sample.
    ///
    /// View directions are ignored without a view encoder.
    ///
    /// ## Panics
    ///
    /// If `times` holds more than one distinct value.
    ///
    /// ## Shapes
    ///
    /// * `positions` - `[R, S, 3]`
    /// * `times` - `[R, 1]`
    /// * `view_directions` - `[R, 3]`
    pub fn query<F: TemporalField<B>>(
        &self,
        field: &F,
        positions: Tensor<B, 3>,
        times: Tensor<B, 2>,
        view_directions: Option<Tensor<B, 2>>,
        point_chunk_size: Option<usize>,
    ) -> FieldSamples<B> {
        let time = {
            let times = times.into_host_vec();
            let time = times.first().copied().unwrap_or_default();
            assert!(
                times.iter().all(|t| *t == time),
                "Only accepts all points from same time"
            );
            time
        };

        // (R, S)
        let [ray_count, sample_count, _] = positions.dims();
        // R * S
        let point_count = ray_count * sample_count;
        let device = positions.device();

        // [R * S, 3]
        let positions = positions.reshape([point_count, 3]);
        // [R * S, C_p]
        let mut positions_embedded = field.embed_positions(positions.to_owned());

        // [R * S, C_t]
        let times_embedded = self
            .time_encoder
            .forward(Tensor::full([point_count, 1], time, &device));

        // [R * S, C_p + C_v]
        if let (Some(view_encoder), Some(view_directions)) =
            (&self.view_encoder, view_directions)
        {
            let view_directions = view_directions
                .unsqueeze_dim::<3>(1)
                .repeat_dim(1, sample_count)
                .reshape([point_count, 3]);
            positions_embedded = Tensor::cat(
                vec![positions_embedded, view_encoder.forward(view_directions)],
                1,
            );
        }

        let input = FieldInput {
            positions_embedded,
            times_embedded: [times_embedded.to_owned(), times_embedded],
            positions,
        };
        let FieldOutput {
            raw,
            positions_delta,
        } = batchify(input, point_chunk_size, |input| field.query(input));

        let channel_count = raw.dims()[1];
        FieldSamples {
            raw: raw.reshape([ray_count, sample_count, channel_count]),
            positions_delta: positions_delta.reshape([ray_count, sample_count, 3]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    /// Outputs the embedded inputs of every point.
    struct EchoField;

    impl TemporalField<B> for EchoField {
        fn embed_positions(
            &self,
            positions: Tensor<B, 2>,
        ) -> Tensor<B, 2> {
            positions.mul_scalar(10.0)
        }

        fn dim_position_embedded(&self) -> usize {
            3
        }

        fn query(
            &self,
            input: FieldInput<B>,
        ) -> FieldOutput<B> {
            let [times_embedded, _] = input.times_embedded;
            let channel_count = input.positions_embedded.dims()[1];
            FieldOutput {
                raw: Tensor::cat(
                    vec![
                        input.positions_embedded.narrow(1, channel_count - 3, 3),
                        times_embedded.narrow(1, 0, 1),
                    ],
                    1,
                ),
                positions_delta: input.positions,
            }
        }
    }

    #[test]
    fn query_shapes_and_order() {
        let device = &Default::default();
        let query = FieldQueryConfig::new().init::<B>(device).unwrap();
        assert_eq!(query.dim_time_embedded(), 21);
        assert_eq!(query.dim_view_embedded(), 0);

        let positions = Tensor::<B, 3>::from_floats(
            [
                [[0.0, 0.0, 1.0], [0.0, 0.0, 2.0], [0.0, 0.0, 3.0]],
                [[1.0, 0.0, 1.0], [1.0, 0.0, 2.0], [1.0, 0.0, 3.0]],
            ],
            device,
        );
        let times = Tensor::<B, 2>::full([2, 1], 0.5, device);

        for point_chunk_size in [None, Some(1), Some(4)] {
            let output = query.query(
                &EchoField,
                positions.to_owned(),
                times.to_owned(),
                None,
                point_chunk_size,
            );

            assert_eq!(output.raw.dims(), [2, 3, 4]);
            output
                .positions_delta
                .into_data()
                .assert_eq(&positions.to_owned().into_data(), true);
            output
                .raw
                .narrow(2, 3, 1)
                .into_data()
                .assert_eq(&Tensor::<B, 3>::full([2, 3, 1], 0.5, device).into_data(), true);
        }
    }

    #[test]
    fn query_with_view_directions() {
        let device = &Default::default();
        let query = FieldQueryConfig::new()
            .with_view_encoder(Some(EncoderConfig::Frequency(
                FrequencyEncoderConfig::new(3).with_frequency_count(0),
            )))
            .init::<B>(device)
            .unwrap();
        assert_eq!(query.dim_view_embedded(), 3);

        let positions = Tensor::<B, 3>::zeros([2, 2, 3], device);
        let times = Tensor::<B, 2>::zeros([2, 1], device);
        let view_directions =
            Tensor::<B, 2>::from_floats([[0.0, 0.0, -1.0], [1.0, 0.0, 0.0]], device);
        let output =
            query.query(&EchoField, positions, times, Some(view_directions), None);

        output.raw.narrow(2, 0, 3).into_data().assert_eq(
            &TensorData::from([
                [[0.0f32, 0.0, -1.0], [0.0, 0.0, -1.0]],
                [[1.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            ]),
            true,
        );
    }

    #[test]
    #[should_panic(expected = "Only accepts all points from same time")]
    fn query_mixed_times() {
        let device = &Default::default();
        let query = FieldQueryConfig::new().init::<B>(device).unwrap();

        let positions = Tensor::<B, 3>::zeros([2, 1, 3], device);
        let times = Tensor::<B, 2>::from_floats([[0.0], [0.5]], device);
        query.query(&EchoField, positions, times, None, None);
    }

    #[test]
    fn init_continuous_time_is_unsupported() {
        let device = &Default::default();
        let result = FieldQueryConfig::new()
            .with_is_time_embedding_discrete(false)
            .init::<B>(device);

        assert!(matches!(result, Err(Error::Unsupported(_))));
    }
}
