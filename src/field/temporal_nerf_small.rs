//! Deformable radiance field on a multiresolution hash grid.

pub use super::*;

use crate::{encoder::HashEncoderConfig, error::Error};
use burn::nn::LinearConfig;

/// The configuration for [`TemporalNerfSmall`].
#[derive(Config, Debug)]
pub struct TemporalNerfSmallConfig {
    /// The hash grid of canonical positions.
    pub position_encoder: HashEncoderConfig,
    /// The channel count of each time embedding.
    pub dim_time_embedded: usize,
    /// The channel count of the view embedding, `0` if views are not used.
    #[config(default = 0)]
    pub dim_view_embedded: usize,
    #[config(default = 2)]
    pub deformation_layer_count: usize,
    #[config(default = 64)]
    pub deformation_width: usize,
    #[config(default = 2)]
    pub density_layer_count: usize,
    #[config(default = 64)]
    pub density_width: usize,
    /// The geometry features passed from the density to the color network.
    #[config(default = 15)]
    pub geometry_feature_count: usize,
    #[config(default = 3)]
    pub color_layer_count: usize,
    #[config(default = 64)]
    pub color_width: usize,
}

/// A lightweight radiance field with a deformation network.
///
/// ## Details
///
/// The density network reads the hash features of the deformed position and
/// outputs the density with geometry features. The color network reads the
/// geometry features, the view embedding and the second time embedding.
/// Densities of deformed positions outside the bounding box are zero.
#[derive(Debug, Module)]
pub struct TemporalNerfSmall<B: Backend> {
    pub position_encoder: HashEncoder<B>,
    pub deformation: SkipMlp<B>,
    /// `[W] -> [3]`
    pub deformation_output: Linear<B>,
    pub density: SkipMlp<B>,
    /// `[W] -> [1 + G]`
    pub density_output: Linear<B>,
    pub color: SkipMlp<B>,
    /// `[W] -> [3]`
    pub color_output: Linear<B>,
    pub dim_view_embedded: usize,
}

impl TemporalNerfSmallConfig {
    /// Initialize from the configuration.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<TemporalNerfSmall<B>, Error> {
        for (name, count) in [
            ("deformation_layer_count", self.deformation_layer_count),
            ("density_layer_count", self.density_layer_count),
            ("color_layer_count", self.color_layer_count),
        ] {
            if count < 2 {
                return Err(Error::Validation(name.into(), "at least 2".into()));
            }
        }

        let position_encoder = self.position_encoder.init(device)?;
        let dim_position = position_encoder.dim_output();

        let deformation = SkipMlpConfig::new(
            dim_position + self.dim_time_embedded,
            0,
        )
        .with_dim_hidden(self.deformation_width)
        .with_depth(self.deformation_layer_count - 1)
        .with_skips(vec![])
        .init(device);
        let deformation_output =
            LinearConfig::new(self.deformation_width, 3).init(device);
        let density = SkipMlpConfig::new(dim_position, 0)
            .with_dim_hidden(self.density_width)
            .with_depth(self.density_layer_count - 1)
            .with_skips(vec![])
            .init(device);
        let density_output =
            LinearConfig::new(self.density_width, 1 + self.geometry_feature_count)
                .init(device);
        let color = SkipMlpConfig::new(
            self.dim_view_embedded
                + self.geometry_feature_count
                + self.dim_time_embedded,
            0,
        )
        .with_dim_hidden(self.color_width)
        .with_depth(self.color_layer_count - 1)
        .with_skips(vec![])
        .init(device);
        let color_output = LinearConfig::new(self.color_width, 3).init(device);

        Ok(TemporalNerfSmall {
            position_encoder,
            deformation,
            deformation_output,
            density,
            density_output,
            color,
            color_output,
            dim_view_embedded: self.dim_view_embedded,
        })
    }
}

impl<B: Backend> TemporalField<B> for TemporalNerfSmall<B> {
    #[inline]
    fn embed_positions(
        &self,
        positions: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        self.position_encoder.forward(positions)
    }

    #[inline]
    fn dim_position_embedded(&self) -> usize {
        self.position_encoder.dim_output()
    }

    fn query(
        &self,
        input: FieldInput<B>,
    ) -> FieldOutput<B> {
        let FieldInput {
            positions_embedded,
            times_embedded: [times_embedded_deformation, times_embedded_color],
            positions,
        } = input;
        let [point_count, _] = positions.dims();
        let dim_position = self.dim_position_embedded();
        let geometry_feature_count = self.density_output.weight.dims()[1] - 1;

        let mut color_inputs = Vec::with_capacity(3);
        if self.dim_view_embedded != 0 {
            color_inputs.push(positions_embedded.to_owned().narrow(
                1,
                dim_position,
                self.dim_view_embedded,
            ));
        }
        let positions_embedded = positions_embedded.narrow(1, 0, dim_position);

        let deformation_input = Tensor::cat(
            vec![positions_embedded, times_embedded_deformation],
            1,
        );
        let positions_delta = self.deformation_output.forward(
            self.deformation
                .forward(deformation_input.to_owned(), deformation_input),
        );

        let (features, keep_mask) = self
            .position_encoder
            .forward_with_mask(positions + positions_delta.to_owned());
        let keep_mask = Tensor::<B, 2>::from_data(
            TensorData::new(
                keep_mask
                    .into_iter()
                    .map(|is_kept| if is_kept { 1.0_f32 } else { 0.0 })
                    .collect(),
                [point_count, 1],
            ),
            &features.device(),
        );

        let hidden = self.density_output.forward(
            self.density.forward(features.to_owned(), features),
        );
        let densities = hidden.to_owned().narrow(1, 0, 1) * keep_mask;
        color_inputs.push(hidden.narrow(1, 1, geometry_feature_count));
        color_inputs.push(times_embedded_color);

        let color_input = Tensor::cat(color_inputs, 1);
        let colors = self
            .color_output
            .forward(self.color.forward(color_input.to_owned(), color_input));

        FieldOutput {
            raw: Tensor::cat(vec![colors, densities], 1),
            positions_delta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::TensorFloatExtension;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn query_shapes_and_bounding_box() {
        let device = &Default::default();
        let field = TemporalNerfSmallConfig::new(
            HashEncoderConfig::new(vec![-1.0; 3], vec![1.0; 3])
                .with_level_count(4)
                .with_table_size_log2(10)
                .with_resolution_finest(64),
            3,
        )
        .with_dim_view_embedded(2)
        .init::<B>(device)
        .unwrap();
        assert_eq!(field.dim_position_embedded(), 8);

        let positions = Tensor::<B, 2>::from_floats(
            [[0.0, 0.1, 0.2], [50.0, 0.0, 0.0], [-0.3, 0.9, -0.9]],
            device,
        );
        let positions_embedded = Tensor::cat(
            vec![
                field.embed_positions(positions.to_owned()),
                Tensor::zeros([3, 2], device),
            ],
            1,
        );
        let times = Tensor::<B, 2>::full([3, 3], 0.25, device);
        let output = field.query(FieldInput {
            positions_embedded,
            times_embedded: [times.to_owned(), times],
            positions,
        });

        assert_eq!(output.raw.dims(), [3, 4]);
        assert_eq!(output.positions_delta.dims(), [3, 3]);

        let densities = output.raw.narrow(1, 3, 1).into_host_vec();
        assert_eq!(densities[1], 0.0);
    }

    #[test]
    fn init_rejects_shallow_networks() {
        let device = &Default::default();
        let result = TemporalNerfSmallConfig::new(
            HashEncoderConfig::new(vec![-1.0; 3], vec![1.0; 3]),
            3,
        )
        .with_color_layer_count(1)
        .init::<B>(device);

        assert!(matches!(result, Err(Error::Validation(..))));
    }
}
