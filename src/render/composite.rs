//! Volume compositing of per-sample densities and colors.

pub use super::*;

use burn::tensor::{activation, Distribution};

/// The length of the last interval of every ray.
pub const FAR_DISTANCE: f32 = 1e10;

/// The per-ray results of compositing.
#[derive(Clone, Debug)]
pub struct CompositeOutput<B: Backend> {
    /// `[R, 3]`
    pub colors_rgb: Tensor<B, 2>,
    /// `[R]`
    pub disparities: Tensor<B, 1>,
    /// `[R]`
    pub opacities: Tensor<B, 1>,
    /// `[R, S]`
    pub weights: Tensor<B, 2>,
    /// `[R]`
    pub depths: Tensor<B, 1>,
    /// `[R]`
    pub sparsity_loss: Tensor<B, 1>,
}

/// Composites the raw field output along every ray.
///
/// ## Arguments
///
/// * `raw` - The logits `[r, g, b, sigma]` of every sample.
/// * `depths` - The ascending sample depths.
/// * `directions` - The unnormalized ray directions.
/// * `noise_std` - The standard deviation of the noise added to the density
///   logits. It is disabled at `0`.
/// * `is_white_background` - The transparent remainder of each ray is white.
///
/// ## Shapes
///
/// * `raw` - `[R, S, 4]` (extra channels are ignored)
/// * `depths` - `[R, S]`
/// * `directions` - `[R, 3]`
pub fn composite<B: Backend>(
    raw: Tensor<B, 3>,
    depths: Tensor<B, 2>,
    directions: Tensor<B, 2>,
    noise_std: f32,
    is_white_background: bool,
) -> CompositeOutput<B> {
    // (R, S)
    let [ray_count, sample_count] = depths.dims();
    let device = depths.device();

    // [R, S]
    let distances = {
        let far = Tensor::full([ray_count, 1], FAR_DISTANCE, &device);
        let distances = if sample_count > 1 {
            let gaps = depths.to_owned().narrow(1, 1, sample_count - 1)
                - depths.to_owned().narrow(1, 0, sample_count - 1);
            Tensor::cat(vec![gaps, far], 1)
        } else {
            far
        };
        // [R, 1]
        let direction_norms = directions.powf_scalar(2.0).sum_dim(1).sqrt();
        distances * direction_norms
    };

    // [R, S, 3]
    let colors = activation::sigmoid(raw.to_owned().narrow(2, 0, 3));

    // [R, S]
    let mut densities = raw.narrow(2, 3, 1).reshape([ray_count, sample_count]);
    if noise_std > 0.0 {
        densities = densities
            + Tensor::random(
                [ray_count, sample_count],
                Distribution::Normal(0.0, noise_std as f64),
                &device,
            );
    }

    // alpha = 1 - exp(-relu(sigma) * delta)
    let alphas = -(-activation::relu(densities) * distances).exp() + 1.0;
    // T_i = (1 - alpha_0 + eps) * .. * (1 - alpha_{i - 1} + eps)
    let transmittances =
        ((-alphas.to_owned() + 1.0) + 1e-10).prod_cumulative_exclusive(1);
    // [R, S]
    let weights = alphas * transmittances;

    // [R, 3]
    let mut colors_rgb = (weights.to_owned().unsqueeze_dim::<3>(2) * colors)
        .sum_dim(1)
        .reshape([ray_count, 3]);
    // [R, 1]
    let opacities = weights.to_owned().sum_dim(1);
    // [R, 1]
    let depths = (weights.to_owned() * depths).sum_dim(1);
    // [R, 1]
    let disparities = (depths.to_owned() / opacities.to_owned().clamp_min(1e-10))
        .clamp_min(1e-10)
        .recip();

    if is_white_background {
        colors_rgb = colors_rgb + (-opacities.to_owned() + 1.0);
    }

    // -sum(p * ln(p)) for p = w + 1e-5
    let sparsity_loss = {
        let probabilities = weights.to_owned() + 1e-5;
        let entropies =
            -(probabilities.to_owned() * probabilities.log()).sum_dim(1);
        let masks = opacities.to_owned().greater_elem(0.5).float();
        (entropies * masks).reshape([ray_count])
    };

    CompositeOutput {
        colors_rgb,
        disparities: disparities.reshape([ray_count]),
        opacities: opacities.reshape([ray_count]),
        weights,
        depths: depths.reshape([ray_count]),
        sparsity_loss,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn raw_constant(
        ray_count: usize,
        sample_count: usize,
        logits: [f32; 4],
    ) -> Tensor<B, 3> {
        let device = &Default::default();
        Tensor::<B, 1>::from_floats(logits, device)
            .reshape([1, 1, 4])
            .repeat_dim(0, ray_count)
            .repeat_dim(1, sample_count)
    }

    fn depths_linear(
        ray_count: usize,
        sample_count: usize,
        near: f32,
        far: f32,
    ) -> Tensor<B, 2> {
        let device = &Default::default();
        let step = (far - near) / (sample_count - 1) as f32;
        let depths = (0..sample_count)
            .map(|index| near + index as f32 * step)
            .collect::<Vec<_>>();
        Tensor::<B, 2>::from_data(TensorData::new(depths, [1, sample_count]), device)
            .repeat_dim(0, ray_count)
    }

    #[test]
    fn composite_opaque() {
        let device = &Default::default();
        let output = composite(
            raw_constant(2, 16, [30.0, -30.0, -30.0, 50.0]),
            depths_linear(2, 16, 2.0, 6.0),
            Tensor::from_floats([[0.0, 0.0, -1.0], [0.0, 0.6, -0.8]], device),
            0.0,
            false,
        );

        output.opacities.into_data().assert_approx_eq_diff(
            &TensorData::from([1.0f32, 1.0]),
            1e-5,
        );
        output.colors_rgb.into_data().assert_approx_eq_diff(
            &TensorData::from([[1.0f32, 0.0, 0.0], [1.0, 0.0, 0.0]]),
            1e-5,
        );
        // All mass is on the first sample.
        output
            .depths
            .into_data()
            .assert_approx_eq_diff(&TensorData::from([2.0f32, 2.0]), 1e-4);
        output
            .disparities
            .into_data()
            .assert_approx_eq_diff(&TensorData::from([0.5f32, 0.5]), 1e-4);
    }

    #[test]
    fn composite_weights_are_bounded() {
        let device = &Default::default();
        let raw = Tensor::<B, 3>::random(
            [8, 12, 4],
            Distribution::Normal(0.0, 2.0),
            device,
        );
        let output = composite(
            raw,
            depths_linear(8, 12, 0.5, 3.0),
            Tensor::random([8, 3], Distribution::Uniform(-1.0, 1.0), device),
            1.0,
            false,
        );

        let weights = output.weights.into_host_vec();
        assert!(weights.iter().all(|w| *w >= 0.0), "{weights:?}");
        weights.chunks(12).for_each(|weights| {
            assert!(weights.iter().sum::<f32>() <= 1.0 + 1e-5, "{weights:?}");
        });
    }

    #[test]
    fn composite_empty_white_background() {
        let device = &Default::default();
        let output = composite(
            raw_constant(3, 8, [1.0, 2.0, -3.0, 0.0]),
            depths_linear(3, 8, 2.0, 6.0),
            Tensor::ones([3, 3], device),
            0.0,
            true,
        );

        output
            .opacities
            .into_data()
            .assert_eq(&TensorData::from([0.0f32, 0.0, 0.0]), true);
        output.colors_rgb.into_data().assert_approx_eq_diff(
            &TensorData::from([[1.0f32, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, 1.0]]),
            1e-6,
        );
        let disparities = output.disparities.into_host_vec();
        assert!(disparities.iter().all(|d| d.is_finite()), "{disparities:?}");
        output
            .sparsity_loss
            .into_data()
            .assert_eq(&TensorData::from([0.0f32, 0.0, 0.0]), true);
    }

    #[test]
    fn composite_sparsity_loss_masking() {
        let device = &Default::default();
        // The first ray is nearly opaque, the second nearly empty.
        let raw = Tensor::cat(
            vec![
                raw_constant(1, 4, [0.0, 0.0, 0.0, 1.0]),
                raw_constant(1, 4, [0.0, 0.0, 0.0, -1.0]),
            ],
            0,
        );
        let output = composite(
            raw,
            depths_linear(2, 4, 0.0, 3.0),
            Tensor::from_floats([[0.0, 0.0, 1.0], [0.0, 0.0, 1.0]], device),
            0.0,
            false,
        );

        let opacities = output.opacities.into_host_vec();
        let weights = output.weights.into_host_vec();
        let losses = output.sparsity_loss.into_host_vec();
        assert!(opacities[0] > 0.5 && opacities[1] <= 0.5, "{opacities:?}");

        let entropy = weights[..4]
            .iter()
            .map(|w| -(w + 1e-5) * (w + 1e-5).ln())
            .sum::<f32>();
        assert!((losses[0] - entropy).abs() < 1e-4, "{losses:?}");
        assert_eq!(losses[1], 0.0);
    }

    #[test]
    fn composite_single_sample() {
        let device = &Default::default();
        let output = composite(
            raw_constant(1, 1, [0.0, 0.0, 0.0, 1.0]),
            Tensor::from_floats([[3.0]], device),
            Tensor::from_floats([[1.0, 0.0, 0.0]], device),
            0.0,
            false,
        );

        output
            .opacities
            .into_data()
            .assert_approx_eq_diff(&TensorData::from([1.0f32]), 1e-6);
        output
            .colors_rgb
            .into_data()
            .assert_approx_eq_diff(&TensorData::from([[0.5f32, 0.5, 0.5]]), 1e-6);
    }
}
