//! Deformable radiance field built from fully-connected layers.

pub use super::*;

use crate::encoder::FrequencyEncoderConfig;
use burn::nn::LinearConfig;

/// The configuration for [`TemporalNerf`].
#[derive(Config, Debug)]
pub struct TemporalNerfConfig {
    /// The channel count of each time embedding.
    pub dim_time_embedded: usize,
    /// The channel count of the view embedding, `0` if views are not used.
    #[config(default = 0)]
    pub dim_view_embedded: usize,
    #[config(default = "FrequencyEncoderConfig::new(3)")]
    pub position_encoder: FrequencyEncoderConfig,
    #[config(default = 8)]
    pub depth: usize,
    #[config(default = 256)]
    pub width: usize,
    #[config(default = "vec![4]")]
    pub skips: Vec<usize>,
    /// Time `0` is the canonical frame and has no deformation.
    #[config(default = true)]
    pub is_zero_canonical: bool,
}

/// A radiance field with a deformation network.
///
/// The deformation network maps an embedded position and time to a position
/// offset. The offset position is embedded again and read by the canonical
/// network, which outputs the density and color logits.
#[derive(Debug, Module)]
pub struct TemporalNerf<B: Backend> {
    pub position_encoder: FrequencyEncoder,
    pub deformation: SkipMlp<B>,
    /// `[W] -> [3]`
    pub deformation_output: Linear<B>,
    pub canonical: SkipMlp<B>,
    /// `[W] -> [4]` without view directions, `[W] -> [1]` with them.
    pub output: Linear<B>,
    pub view_head: Option<ViewHead<B>>,
    pub dim_view_embedded: usize,
    pub is_zero_canonical: bool,
}

/// The view-dependent color branch of [`TemporalNerf`].
#[derive(Debug, Module)]
pub struct ViewHead<B: Backend> {
    /// `[W] -> [W]`
    pub feature: Linear<B>,
    /// `[W + V] -> [W / 2]`
    pub views: Linear<B>,
    pub activation: Relu,
    /// `[W / 2] -> [3]`
    pub colors: Linear<B>,
}

impl TemporalNerfConfig {
    /// Initialize from the configuration.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> TemporalNerf<B> {
        let position_encoder = self.position_encoder.init();
        let dim_position = position_encoder.dim_output();
        let is_view_used = self.dim_view_embedded != 0;

        let deformation = SkipMlpConfig::new(
            dim_position + self.dim_time_embedded,
            dim_position,
        )
        .with_dim_hidden(self.width)
        .with_depth(self.depth)
        .with_skips(self.skips.to_owned())
        .init(device);
        let deformation_output = LinearConfig::new(self.width, 3).init(device);
        let canonical = SkipMlpConfig::new(dim_position, dim_position)
            .with_dim_hidden(self.width)
            .with_depth(self.depth)
            .with_skips(self.skips.to_owned())
            .init(device);
        let output =
            LinearConfig::new(self.width, if is_view_used { 1 } else { 4 })
                .init(device);
        let view_head = is_view_used.then(|| ViewHead {
            feature: LinearConfig::new(self.width, self.width).init(device),
            views: LinearConfig::new(
                self.width + self.dim_view_embedded,
                self.width / 2,
            )
            .init(device),
            activation: Relu::new(),
            colors: LinearConfig::new(self.width / 2, 3).init(device),
        });

        TemporalNerf {
            position_encoder,
            deformation,
            deformation_output,
            canonical,
            output,
            view_head,
            dim_view_embedded: self.dim_view_embedded,
            is_zero_canonical: self.is_zero_canonical,
        }
    }
}

impl<B: Backend> ViewHead<B> {
    /// ## Shapes
    ///
    /// * `hidden` - `[N, W]`
    /// * `views_embedded` - `[N, V]`
    /// * `output` - `[N, 3]`
    pub fn forward(
        &self,
        hidden: Tensor<B, 2>,
        views_embedded: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let feature = self.feature.forward(hidden);
        let hidden = self
            .activation
            .forward(self.views.forward(Tensor::cat(vec![feature, views_embedded], 1)));
        self.colors.forward(hidden)
    }
}

impl<B: Backend> TemporalField<B> for TemporalNerf<B> {
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
            times_embedded: [times_embedded, _],
            positions,
        } = input;
        let dim_position = self.dim_position_embedded();
        let views_embedded = (self.dim_view_embedded != 0).then(|| {
            positions_embedded.to_owned().narrow(
                1,
                dim_position,
                self.dim_view_embedded,
            )
        });
        let positions_embedded = positions_embedded.narrow(1, 0, dim_position);

        let (positions_delta, positions_embedded) = if self.is_zero_canonical
            && is_canonical_time(&times_embedded)
        {
            (positions.zeros_like(), positions_embedded)
        } else {
            let hidden = self.deformation.forward(
                Tensor::cat(vec![positions_embedded.to_owned(), times_embedded], 1),
                positions_embedded,
            );
            let positions_delta = self.deformation_output.forward(hidden);
            let positions_embedded = self
                .position_encoder
                .forward(positions + positions_delta.to_owned());
            (positions_delta, positions_embedded)
        };

        let hidden = self
            .canonical
            .forward(positions_embedded.to_owned(), positions_embedded);

        let raw = match (&self.view_head, views_embedded) {
            (Some(view_head), Some(views_embedded)) => {
                let densities = self.output.forward(hidden.to_owned());
                let colors = view_head.forward(hidden, views_embedded);
                Tensor::cat(vec![colors, densities], 1)
            },
            _ => self.output.forward(hidden),
        };

        FieldOutput {
            raw,
            positions_delta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn input(
        time: f32,
        field: &TemporalNerf<B>,
        dim_view_embedded: usize,
    ) -> FieldInput<B> {
        let device = &Default::default();
        let positions = Tensor::<B, 2>::from_floats(
            [[0.1, 0.2, 0.3], [-0.5, 0.0, 0.25]],
            device,
        );
        let mut positions_embedded = field.embed_positions(positions.to_owned());
        if dim_view_embedded != 0 {
            positions_embedded = Tensor::cat(
                vec![
                    positions_embedded,
                    Tensor::ones([2, dim_view_embedded], device),
                ],
                1,
            );
        }
        let times = Tensor::<B, 2>::full([2, 1], time, device);

        FieldInput {
            positions_embedded,
            times_embedded: [times.to_owned(), times],
            positions,
        }
    }

    #[test]
    fn query_canonical_time_has_no_deformation() {
        let device = &Default::default();
        let field = TemporalNerfConfig::new(1)
            .with_depth(3)
            .with_width(16)
            .with_skips(vec![1])
            .init::<B>(device);

        let output = field.query(input(0.0, &field, 0));

        assert_eq!(output.raw.dims(), [2, 4]);
        output
            .positions_delta
            .into_data()
            .assert_eq(&TensorData::zeros::<f32, _>([2, 3]), true);
    }

    #[test]
    fn query_with_views() {
        let device = &Default::default();
        let field = TemporalNerfConfig::new(1)
            .with_dim_view_embedded(9)
            .with_depth(3)
            .with_width(16)
            .with_skips(vec![1])
            .init::<B>(device);

        let output = field.query(input(0.5, &field, 9));

        assert_eq!(output.raw.dims(), [2, 4]);
        assert_eq!(output.positions_delta.dims(), [2, 3]);
    }

    #[test]
    fn query_is_point_independent() {
        let device = &Default::default();
        let field = TemporalNerfConfig::new(1)
            .with_depth(3)
            .with_width(16)
            .with_skips(vec![1])
            .init::<B>(device);

        let whole = field.query(input(0.5, &field, 0));
        let FieldInput {
            positions_embedded,
            times_embedded,
            positions,
        } = input(0.5, &field, 0);
        let last = field.query(FieldInput {
            positions_embedded: positions_embedded.narrow(0, 1, 1),
            times_embedded: times_embedded.map(|times| times.narrow(0, 1, 1)),
            positions: positions.narrow(0, 1, 1),
        });

        whole
            .raw
            .narrow(0, 1, 1)
            .into_data()
            .assert_approx_eq_diff(&last.raw.into_data(), 1e-5);
    }
}
