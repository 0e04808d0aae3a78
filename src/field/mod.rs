//! Time-conditioned radiance fields.
//!
//! A field receives embedded positions (with embedded view directions
//! appended when they are used), a pair of time embeddings and the raw
//! positions. It returns the raw output, `[r, g, b, sigma]` logits, and the
//! deformation applied to every position before the density and color read.

pub mod mlp;
pub mod temporal_nerf;
pub mod temporal_nerf_small;

pub use crate::encoder::{Encoder, FrequencyEncoder, HashEncoder};
pub use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, ElementConversion, Tensor, TensorData},
};
pub use mlp::*;
pub use temporal_nerf::*;
pub use temporal_nerf_small::*;

/// The query contract of a radiance field.
pub trait TemporalField<B: Backend> {
    /// Embeds raw positions for [`FieldInput::positions_embedded`].
    ///
    /// ## Shapes
    ///
    /// * `positions` - `[N, 3]`
    /// * `output` - [`[N, dim_position_embedded]`](Self::dim_position_embedded)
    fn embed_positions(
        &self,
        positions: Tensor<B, 2>,
    ) -> Tensor<B, 2>;

    /// The channel count of the position embedding.
    fn dim_position_embedded(&self) -> usize;

    /// Queries the field point by point.
    ///
    /// Points never interact, so any partition of the input yields the same
    /// output rows.
    fn query(
        &self,
        input: FieldInput<B>,
    ) -> FieldOutput<B>;
}

#[derive(Clone, Debug)]
pub struct FieldInput<B: Backend> {
    /// `[N, dim_position_embedded + dim_view_embedded]`
    pub positions_embedded: Tensor<B, 2>,
    /// `[2, N, dim_time_embedded]`, before and after the deformation
    pub times_embedded: [Tensor<B, 2>; 2],
    /// `[N, 3]`
    pub positions: Tensor<B, 2>,
}

#[derive(Clone, Debug)]
pub struct FieldOutput<B: Backend> {
    /// `[N, 4]`
    pub raw: Tensor<B, 2>,
    /// `[N, 3]`
    pub positions_delta: Tensor<B, 2>,
}

/// Returns `true` if the first time channel of the first point is exactly zero.
pub(crate) fn is_canonical_time<B: Backend>(times_embedded: &Tensor<B, 2>) -> bool {
    let [point_count, _] = times_embedded.dims();
    point_count != 0
        && times_embedded
            .to_owned()
            .slice([0..1, 0..1])
            .into_scalar()
            .elem::<f32>()
            == 0.0
}
