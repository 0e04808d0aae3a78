//! Multiresolution hash-grid encoding.
//!
//! Every level is a grid of fixed resolution whose vertices map into a
//! learnable table of `T` feature slots, either densely (when the vertices fit
//! in the table) or through a spatial hash. A point is encoded by interpolating
//! the features of the `2^D` vertices of its cell, level by level.

pub use super::*;

use crate::error::Error;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;

/// The primes of the spatial hash, one per input dimension.
pub const HASH_PRIMES: [u64; 7] = [
    1, 2654435761, 805459861, 3674653429, 2097192037, 1434869437, 2165219737,
];

/// The initial table values are drawn from `U(-INIT_RANGE, INIT_RANGE)`.
pub const INIT_RANGE: f32 = 1e-4;

/// The configuration for [`HashEncoder`].
#[derive(Config, Debug)]
pub struct HashEncoderConfig {
    /// Lower corner of the bounding box, one value per input dimension.
    pub bound_min: Vec<f32>,
    /// Upper corner of the bounding box, one value per input dimension.
    pub bound_max: Vec<f32>,
    /// `L`
    #[config(default = 16)]
    pub level_count: usize,
    /// `F`, the features per level.
    #[config(default = 2)]
    pub feature_count: usize,
    /// `log2(T)`
    #[config(default = 19)]
    pub table_size_log2: u32,
    /// The resolution of the coarsest level.
    #[config(default = 16)]
    pub resolution_base: usize,
    /// The resolution of the finest level.
    #[config(default = 512)]
    pub resolution_finest: usize,
    /// The seed of the table initialization.
    #[config(default = 0x3D65)]
    pub seed: u64,
}

/// Multiresolution hash-grid encoder over a `D`-dimensional bounding box.
///
/// `D` is `3` for positions and `1` for times.
#[derive(Debug, Module)]
pub struct HashEncoder<B: Backend> {
    /// `[L]` tables of `[T, F]`
    pub tables: Vec<Param<Tensor<B, 2>>>,
    /// `[D]`
    pub bound_min: Vec<f32>,
    /// `[D]`
    pub bound_max: Vec<f32>,
    pub resolution_base: usize,
    pub resolution_finest: usize,
    /// `log2(T)`
    pub table_size_log2: u32,
}

impl HashEncoderConfig {
    /// Initialize from the configuration.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<HashEncoder<B>, Error> {
        let dim_input = self.bound_min.len();
        if dim_input == 0 || dim_input > HASH_PRIMES.len() {
            return Err(Error::Validation(
                "bound_min.len()".into(),
                format!("in 1..={}", HASH_PRIMES.len()),
            ));
        }
        if self.bound_max.len() != dim_input {
            return Err(Error::Validation(
                "bound_max.len()".into(),
                format!("{dim_input} (bound_min.len())"),
            ));
        }
        if self
            .bound_min
            .iter()
            .zip(&self.bound_max)
            .any(|(min, max)| min.partial_cmp(max) != Some(std::cmp::Ordering::Less))
        {
            return Err(Error::Validation(
                "bound_min".into(),
                "less than bound_max".into(),
            ));
        }
        if self.level_count == 0 || self.feature_count == 0 {
            return Err(Error::Validation(
                "level_count and feature_count".into(),
                "positive".into(),
            ));
        }
        if self.resolution_base == 0
            || self.resolution_finest < self.resolution_base
        {
            return Err(Error::Validation(
                "resolution_finest".into(),
                format!("at least resolution_base ({})", self.resolution_base),
            ));
        }
        if self.table_size_log2 >= 32 {
            return Err(Error::Validation(
                "table_size_log2".into(),
                "less than 32".into(),
            ));
        }

        // T
        let table_size = 1_usize << self.table_size_log2;
        let distribution = rand_distr::Uniform::new(-INIT_RANGE, INIT_RANGE);

        let tables = (0..self.level_count)
            .map(|level| {
                let values = StdRng::seed_from_u64(self.seed + level as u64)
                    .sample_iter(distribution)
                    .take(table_size * self.feature_count)
                    .collect::<Vec<f32>>();
                Param::from_tensor(Tensor::from_data(
                    TensorData::new(values, [table_size, self.feature_count]),
                    device,
                ))
            })
            .collect();

        Ok(HashEncoder {
            tables,
            bound_min: self.bound_min.to_owned(),
            bound_max: self.bound_max.to_owned(),
            resolution_base: self.resolution_base,
            resolution_finest: self.resolution_finest,
            table_size_log2: self.table_size_log2,
        })
    }
}

/// Dimension operations
impl<B: Backend> HashEncoder<B> {
    /// `D`
    #[inline]
    pub fn dim_input(&self) -> usize {
        self.bound_min.len()
    }

    /// `L * F`
    #[inline]
    pub fn dim_output(&self) -> usize {
        self.level_count() * self.feature_count()
    }

    /// `F`
    #[inline]
    pub fn feature_count(&self) -> usize {
        self.tables
            .first()
            .map(|table| table.val().dims()[1])
            .unwrap_or_default()
    }

    /// `L`
    #[inline]
    pub fn level_count(&self) -> usize {
        self.tables.len()
    }

    /// `T`
    #[inline]
    pub fn table_size(&self) -> usize {
        1 << self.table_size_log2
    }

    /// The resolution of the given level.
    ///
    /// Resolutions grow geometrically from
    /// [`resolution_base`](Self::resolution_base) to
    /// [`resolution_finest`](Self::resolution_finest).
    pub fn resolution(
        &self,
        level: usize,
    ) -> usize {
        let level_count = self.level_count();
        let base = self.resolution_base as f64;
        if level_count < 2 {
            return self.resolution_base;
        }
        let growth = ((self.resolution_finest as f64).ln() - base.ln())
            / (level_count - 1) as f64;
        (base * (growth * level as f64).exp() + 1e-6).floor() as usize
    }
}

/// Encoding
impl<B: Backend> HashEncoder<B> {
    /// ## Shapes
    ///
    /// * `positions` - `[N, D]`
    /// * `output` - [`[N, L * F]`](Self::dim_output)
    #[inline]
    pub fn forward(
        &self,
        positions: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        self.forward_with_mask(positions).0
    }

    /// Encodes the positions and reports which of them lie inside the
    /// bounding box. Outside positions are clamped onto the box.
    pub fn forward_with_mask(
        &self,
        positions: Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Vec<bool>) {
        // (N, D)
        let [point_count, dim_input] = positions.dims();
        // 2^D
        let corner_count = 1_usize << dim_input;
        // F
        let feature_count = self.feature_count();
        let device = positions.device();

        debug_assert_eq!(
            dim_input,
            self.dim_input(),
            "positions.dims()[1] should be the bounding box dimension"
        );

        let positions_host = positions.to_owned().into_data().convert::<f32>();
        let positions_host = positions_host
            .as_slice::<f32>()
            .expect("The data should be converted to f32");
        let keep_mask = positions_host
            .chunks_exact(dim_input)
            .map(|point| {
                point.iter().enumerate().all(|(dim, c)| {
                    (self.bound_min[dim]..=self.bound_max[dim]).contains(c)
                })
            })
            .collect::<Vec<_>>();

        // [N, D]
        let positions = Tensor::cat(
            (0..dim_input)
                .map(|dim| {
                    positions.to_owned().narrow(1, dim, 1).clamp(
                        self.bound_min[dim],
                        self.bound_max[dim],
                    )
                })
                .collect(),
            1,
        );
        let positions_host = positions.to_owned().into_data().convert::<f32>();
        let positions_host = positions_host
            .as_slice::<f32>()
            .expect("The data should be converted to f32");

        let features = (0..self.level_count())
            .map(|level| {
                let resolution = self.resolution(level);
                let resolution_max = resolution as i64 - 1;
                let table_size_log2 = self.table_size_log2;
                let bound_min = self.bound_min.as_slice();
                let grid_sizes = self
                    .bound_min
                    .iter()
                    .zip(&self.bound_max)
                    .map(|(min, max)| (max - min) / resolution as f32)
                    .collect::<Vec<_>>();

                // ([N * D], [N * 2^D])
                let (voxel_mins, indices) = positions_host
                    .par_chunks_exact(dim_input)
                    .map(|point| {
                        let vertex = (0..dim_input)
                            .map(|dim| {
                                (((point[dim] - bound_min[dim]) / grid_sizes[dim])
                                    .floor() as i64)
                                    .clamp(0, resolution_max)
                            })
                            .collect::<Vec<_>>();
                        let voxel_min = (0..dim_input)
                            .map(|dim| {
                                vertex[dim] as f32 * grid_sizes[dim]
                                    + bound_min[dim]
                            })
                            .collect::<Vec<_>>();
                        let indices = (0..corner_count)
                            .map(|corner| {
                                let corner_vertex = (0..dim_input)
                                    .map(|dim| {
                                        vertex[dim]
                                            + ((corner >> (dim_input - 1 - dim)) & 1)
                                                as i64
                                    })
                                    .collect::<Vec<_>>();
                                vertex_index(
                                    &corner_vertex,
                                    resolution,
                                    table_size_log2,
                                )
                            })
                            .collect::<Vec<_>>();
                        (voxel_min, indices)
                    })
                    .unzip::<_, _, Vec<_>, Vec<_>>();

                // [N, D]
                let voxel_mins = Tensor::<B, 2>::from_data(
                    TensorData::new(voxel_mins.concat(), [point_count, dim_input]),
                    &device,
                );
                // [1, D]
                let grid_sizes = Tensor::<B, 2>::from_data(
                    TensorData::new(grid_sizes, [1, dim_input]),
                    &device,
                );
                // [N, D]
                let fractions = (positions.to_owned() - voxel_mins) / grid_sizes;
                // [N, 2^D]
                let corner_weights = corner_weights(fractions);
                // [N * 2^D]
                let indices = Tensor::<B, 1, Int>::from_data(
                    TensorData::new(indices.concat(), [point_count * corner_count])
                        .convert::<B::IntElem>(),
                    &device,
                );

                // [N, 2^D, F]
                let corner_features = self.tables[level]
                    .val()
                    .select(0, indices)
                    .reshape([point_count, corner_count, feature_count]);

                // [N, F]
                (corner_features * corner_weights.unsqueeze_dim::<3>(2))
                    .sum_dim(1)
                    .reshape([point_count, feature_count])
            })
            .collect::<Vec<_>>();

        (Tensor::cat(features, 1), keep_mask)
    }
}

/// The table slot of a grid vertex.
///
/// The indexing is dense when all `(resolution + 1)^D` vertices fit in the
/// table, and hashed otherwise.
pub fn vertex_index(
    vertex: &[i64],
    resolution: usize,
    table_size_log2: u32,
) -> i64 {
    // T
    let table_size = 1_u64 << table_size_log2;
    let side = resolution as u64 + 1;
    let is_dense = side
        .checked_pow(vertex.len() as u32)
        .is_some_and(|vertex_count| vertex_count <= table_size);

    if is_dense {
        vertex
            .iter()
            .rev()
            .fold(0_u64, |index, &v| index * side + v as u64) as i64
    } else {
        (vertex
            .iter()
            .zip(HASH_PRIMES)
            .fold(0_u64, |hash, (&v, prime)| hash ^ (v as u64).wrapping_mul(prime))
            & (table_size - 1)) as i64
    }
}

/// Interpolation weights of the `2^D` cell corners.
///
/// The corner bit of dimension `d` is `(corner >> (D - 1 - d)) & 1`.
///
/// ## Shapes
///
/// * `fractions` - `[N, D]`
/// * `output` - `[N, 2^D]`
fn corner_weights<B: Backend>(fractions: Tensor<B, 2>) -> Tensor<B, 2> {
    let [point_count, dim_input] = fractions.dims();
    let mut weights = Tensor::ones([point_count, 1], &fractions.device());

    for dim in (0..dim_input).rev() {
        // [N, 1]
        let fraction = fractions.to_owned().narrow(1, dim, 1);
        weights = Tensor::cat(
            vec![
                weights.to_owned() * (-fraction.to_owned() + 1.0),
                weights * fraction,
            ],
            1,
        );
    }

    weights
}
