//! Training losses on render outputs and hash grids.

pub use crate::{encoder::HashEncoder, render::RenderOutput};
pub use burn::{
    config::Config,
    tensor::{backend::Backend, Int, Tensor, TensorData},
};

use crate::encoder::vertex_index;
use rand::Rng;
use std::f32::consts::LN_10;

/// The largest cube side sampled by [`total_variation_loss`].
pub const TV_CUBE_SIZE_MAX: usize = 50;

/// The weights of the regularization terms.
#[derive(Config, Copy, Debug)]
pub struct RegularizationConfig {
    #[config(default = 1e-10)]
    pub sparsity_weight: f32,
    #[config(default = 1e-4)]
    pub tv_weight: f32,
    /// The total variation term is dropped after this step.
    #[config(default = 1000)]
    pub tv_step_max: u64,
}

impl RegularizationConfig {
    /// The weight of the total variation term at the step.
    #[inline]
    pub fn tv_weight_at(
        &self,
        step: u64,
    ) -> f32 {
        if step <= self.tv_step_max {
            self.tv_weight
        } else {
            0.0
        }
    }

    /// The weighted sum of the sparsity term and, for hash grids, the total
    /// variation term.
    pub fn regularization<B: Backend>(
        &self,
        output: &RenderOutput<B>,
        encoder: Option<&HashEncoder<B>>,
        step: u64,
        rng: &mut impl Rng,
    ) -> Tensor<B, 1> {
        let mut loss = sparsity_loss(output).mul_scalar(self.sparsity_weight);

        let tv_weight = self.tv_weight_at(step);
        if let Some(encoder) = encoder.filter(|_| tv_weight != 0.0) {
            loss = loss
                + total_variation_loss_levels(encoder, rng).mul_scalar(tv_weight);
        }

        loss
    }
}

/// The sum of the entropy terms of both passes.
pub fn sparsity_loss<B: Backend>(output: &RenderOutput<B>) -> Tensor<B, 1> {
    let loss = output.sparsity_loss.to_owned().sum();
    match &output.coarse {
        Some(coarse) => loss + coarse.sparsity_loss.to_owned().sum(),
        None => loss,
    }
}

/// The total variation of a hash grid level over a sampled cube of vertices.
///
/// The cube side is `floor(resolution / 10)` clipped to
/// `[resolution_base - 1, 50]`, and its lower corner is drawn from `rng`.
/// The squared differences of the features of adjacent vertices along every
/// axis are summed and divided by the cube side.
pub fn total_variation_loss<B: Backend>(
    encoder: &HashEncoder<B>,
    level: usize,
    rng: &mut impl Rng,
) -> Tensor<B, 1> {
    // D
    let dim_input = encoder.dim_input();
    let resolution = encoder.resolution(level);
    let table = encoder.tables[level].val();
    let device = table.device();

    let cube_size = (resolution / 10)
        .max(encoder.resolution_base.saturating_sub(1))
        .min(TV_CUBE_SIZE_MAX);
    // C + 1
    let side = cube_size + 1;
    // (C + 1)^D
    let vertex_count = side.pow(dim_input as u32);

    let origin = (0..dim_input)
        .map(|_| match resolution > cube_size {
            true => rng.gen_range(0..(resolution - cube_size)) as i64,
            false => 0,
        })
        .collect::<Vec<_>>();

    // The last dimension varies fastest.
    let strides = (0..dim_input)
        .map(|dim| side.pow((dim_input - 1 - dim) as u32))
        .collect::<Vec<_>>();
    let coordinates = |vertex: usize| {
        strides
            .iter()
            .map(|stride| vertex / stride % side)
            .collect::<Vec<_>>()
    };

    // [(C + 1)^D]
    let indices = (0..vertex_count)
        .map(|vertex| {
            let vertex = coordinates(vertex)
                .into_iter()
                .zip(&origin)
                .map(|(c, o)| c as i64 + o)
                .collect::<Vec<_>>();
            vertex_index(&vertex, resolution, encoder.table_size_log2)
        })
        .collect::<Vec<_>>();
    // [(C + 1)^D, F]
    let features = table.select(
        0,
        Tensor::<B, 1, Int>::from_data(
            TensorData::new(indices, [vertex_count]).convert::<B::IntElem>(),
            &device,
        ),
    );

    let mut loss = Tensor::<B, 1>::zeros([1], &device);
    for (dim, stride) in strides.iter().enumerate() {
        let (heads, tails) = (0..vertex_count)
            .filter(|vertex| coordinates(*vertex)[dim] < cube_size)
            .map(|vertex| (vertex as i64, (vertex + stride) as i64))
            .unzip::<_, _, Vec<_>, Vec<_>>();
        if heads.is_empty() {
            continue;
        }
        let pair_count = heads.len();
        let [heads, tails] = [heads, tails].map(|indices| {
            features.to_owned().select(
                0,
                Tensor::<B, 1, Int>::from_data(
                    TensorData::new(indices, [pair_count]).convert::<B::IntElem>(),
                    &device,
                ),
            )
        });
        loss = loss + (tails - heads).powf_scalar(2.0).sum();
    }

    loss.div_scalar(cube_size.max(1) as f32)
}

/// [`total_variation_loss`] summed over all levels.
pub fn total_variation_loss_levels<B: Backend>(
    encoder: &HashEncoder<B>,
    rng: &mut impl Rng,
) -> Tensor<B, 1> {
    (0..encoder.level_count())
        .map(|level| total_variation_loss(encoder, level, rng))
        .reduce(|total, loss| total + loss)
        .unwrap_or_else(|| Tensor::zeros([1], &Default::default()))
}

/// Mean squared error.
pub fn mse<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    target: Tensor<B, D>,
) -> Tensor<B, 1> {
    (output - target).powf_scalar(2.0).mean()
}

/// Peak signal-to-noise ratio of a mean squared error, `-10 * log10(mse)`.
pub fn psnr<B: Backend>(mse: Tensor<B, 1>) -> Tensor<B, 1> {
    mse.log().mul_scalar(-10.0 / LN_10)
}
