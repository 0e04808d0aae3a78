//! Hierarchical sample placement along rays.
//!
//! Depths are placed on the host. Only the weights of the coarse pass are read
//! back from the device, so no gradient flows through the placement.

use rayon::prelude::*;

/// The floor added to every weight before normalization.
pub const WEIGHT_FLOOR: f32 = 1e-5;

/// The coarse sample depths of every ray, `[R, S]`.
///
/// The depths are spaced linearly between the bounds, or linearly in inverse
/// depth if `is_lindisp` is set. With `uniforms` (`[R, S]` in `[0, 1)`), each
/// depth is moved within the interval bounded by the midpoints to its
/// neighbors. The first and last intervals end at the bounds.
pub fn sample_coarse(
    nears: &[f32],
    fars: &[f32],
    sample_count: usize,
    is_lindisp: bool,
    uniforms: Option<&[f32]>,
) -> Vec<f32> {
    debug_assert_eq!(nears.len(), fars.len());

    // [S]
    let steps = (0..sample_count)
        .map(|index| match sample_count {
            1 => 0.0,
            _ => index as f64 / (sample_count - 1) as f64,
        })
        .collect::<Vec<_>>();

    let mut depths = nears
        .par_iter()
        .zip(fars)
        .flat_map_iter(|(&near, &far)| {
            let (near, far) = (near as f64, far as f64);
            steps.iter().map(move |&step| {
                (if is_lindisp {
                    1.0 / (1.0 / near * (1.0 - step) + 1.0 / far * step)
                } else {
                    near * (1.0 - step) + far * step
                }) as f32
            })
        })
        .collect::<Vec<_>>();

    if let Some(uniforms) = uniforms {
        debug_assert_eq!(uniforms.len(), depths.len());

        depths
            .par_chunks_mut(sample_count.max(1))
            .zip(uniforms.par_chunks(sample_count.max(1)))
            .for_each(|(depths, uniforms)| {
                let anchors = depths.to_vec();
                let last = anchors.len() - 1;
                for (index, depth) in depths.iter_mut().enumerate() {
                    let lower = match index {
                        0 => anchors[0],
                        _ => 0.5 * (anchors[index - 1] + anchors[index]),
                    };
                    let upper = if index == last {
                        anchors[last]
                    } else {
                        0.5 * (anchors[index] + anchors[index + 1])
                    };
                    *depth = lower + (upper - lower) * uniforms[index];
                }
            });
    }

    depths
}

/// Draws depths from the piecewise-constant density of each ray, `[R, N]`.
///
/// `bins` (`[R, B]`) are the bin edges and `weights` (`[R, B - 1]`) the mass
/// of the bins. Every weight is raised by [`WEIGHT_FLOOR`] before
/// normalization, so rays without mass sample their bins uniformly.
///
/// Without `uniforms` (`[R, N]` in `[0, 1)`), the quantiles are spaced evenly
/// over `[0, 1]` and the output depends on the inputs only.
pub fn sample_fine(
    bins: &[f32],
    weights: &[f32],
    ray_count: usize,
    sample_count: usize,
    uniforms: Option<&[f32]>,
) -> Vec<f32> {
    if ray_count == 0 || sample_count == 0 {
        return Vec::new();
    }

    // B
    let bin_count = bins.len() / ray_count;
    // B - 1
    let weight_count = weights.len() / ray_count;
    debug_assert_eq!(weight_count + 1, bin_count);

    // [N]
    let quantiles = (0..sample_count)
        .map(|index| match sample_count {
            1 => 0.0,
            _ => index as f32 / (sample_count - 1) as f32,
        })
        .collect::<Vec<_>>();

    let mut samples = vec![0.0; ray_count * sample_count];
    samples
        .par_chunks_mut(sample_count)
        .enumerate()
        .for_each(|(ray_index, samples)| {
            let bins = &bins[ray_index * bin_count..][..bin_count];
            let weights = &weights[ray_index * weight_count..][..weight_count];
            let uniforms = match uniforms {
                Some(uniforms) => &uniforms[ray_index * sample_count..][..sample_count],
                None => quantiles.as_slice(),
            };
            let cdf = cumulative_distribution(weights);

            for (sample, &uniform) in samples.iter_mut().zip(uniforms) {
                *sample = sample_inverse(&cdf, bins, uniform);
            }
        });

    samples
}

/// Concatenates the depths of each ray and sorts them, `[R, S + N]`.
pub fn merge_sorted(
    coarse: &[f32],
    fine: &[f32],
    ray_count: usize,
) -> Vec<f32> {
    if ray_count == 0 {
        return Vec::new();
    }

    // S
    let coarse_count = coarse.len() / ray_count;
    // N
    let fine_count = fine.len() / ray_count;
    // S + N
    let sample_count = coarse_count + fine_count;

    let mut merged = vec![0.0; ray_count * sample_count];
    if sample_count == 0 {
        return merged;
    }
    merged
        .par_chunks_mut(sample_count)
        .enumerate()
        .for_each(|(ray_index, merged)| {
            let (merged_coarse, merged_fine) = merged.split_at_mut(coarse_count);
            merged_coarse
                .copy_from_slice(&coarse[ray_index * coarse_count..][..coarse_count]);
            merged_fine.copy_from_slice(&fine[ray_index * fine_count..][..fine_count]);
            merged.sort_unstable_by(f32::total_cmp);
        });

    merged
}

/// The population standard deviation of the depths of each ray, `[R]`.
pub fn standard_deviations(
    depths: &[f32],
    ray_count: usize,
) -> Vec<f32> {
    if ray_count == 0 {
        return Vec::new();
    }

    let sample_count = depths.len() / ray_count;
    if sample_count == 0 {
        return vec![0.0; ray_count];
    }

    depths
        .par_chunks(sample_count)
        .map(|depths| {
            let count = depths.len() as f64;
            let mean = depths.iter().map(|&d| d as f64).sum::<f64>() / count;
            let variance = depths
                .iter()
                .map(|&d| (d as f64 - mean).powi(2))
                .sum::<f64>()
                / count;
            variance.sqrt() as f32
        })
        .collect()
}

/// `[0, c_1, .., c_{B - 1}]`
fn cumulative_distribution(weights: &[f32]) -> Vec<f32> {
    let total = weights.iter().map(|w| w + WEIGHT_FLOOR).sum::<f32>();
    let mut cdf = Vec::with_capacity(weights.len() + 1);
    let mut state = 0.0;

    cdf.push(state);
    for weight in weights {
        state += (weight + WEIGHT_FLOOR) / total;
        cdf.push(state);
    }

    cdf
}

/// Inverts the linearly interpolated distribution at `uniform`.
fn sample_inverse(
    cdf: &[f32],
    bins: &[f32],
    uniform: f32,
) -> f32 {
    // The first edge whose mass exceeds the quantile
    let index = cdf.partition_point(|c| *c <= uniform);
    let below = index.saturating_sub(1);
    let above = index.min(cdf.len() - 1);

    let denominator = match cdf[above] - cdf[below] {
        d if d < 1e-5 => 1.0,
        d => d,
    };
    let t = (uniform - cdf[below]) / denominator;

    bins[below] + t * (bins[above] - bins[below])
}
