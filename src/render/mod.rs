//! Volumetric rendering of ray batches.
//!
//! A render call samples depths along every ray, queries a field at the
//! samples and composites the outputs. With fine samples, a coarse pass places
//! them where the coarse weights are, and a fine pass composites the merged
//! samples.

pub mod batch;
pub mod composite;
pub mod query;
pub mod sample;

pub use crate::{
    camera::{Camera, Ray, RayBatch, RayBundle, RayTensors},
    encoder::Encoder,
    error::Error,
    field::TemporalField,
    function::TensorFloatExtension,
};
pub use batch::*;
pub use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor, TensorData},
};
pub use composite::*;
pub use query::*;
pub use sample::*;

use batch::impl_batch_for_fields;
use humansize::{format_size, BINARY};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::fmt;

/// Rendering options threaded through a render call.
#[derive(Config, Debug)]
pub struct RenderOptions {
    /// The maximum number of rays rendered at once.
    #[config(default = "Some(1024 * 32)")]
    pub ray_chunk_size: Option<usize>,
    /// The maximum number of points queried at once.
    #[config(default = "Some(1024 * 64)")]
    pub point_chunk_size: Option<usize>,
    /// The coarse samples per ray.
    #[config(default = 64)]
    pub sample_count_coarse: usize,
    /// The fine samples per ray. The fine pass is skipped at `0`.
    #[config(default = 0)]
    pub sample_count_fine: usize,
    /// Stratified sampling.
    #[config(default = true)]
    pub is_perturbed: bool,
    /// Sampling linearly in inverse depth.
    #[config(default = false)]
    pub is_lindisp: bool,
    /// Rays are mapped into normalized device coordinates.
    #[config(default = false)]
    pub is_ndc: bool,
    #[config(default = false)]
    pub is_view_direction_used: bool,
    #[config(default = false)]
    pub is_white_background: bool,
    /// The standard deviation of the noise on density logits.
    #[config(default = 0.0)]
    pub noise_std: f32,
    /// The raw field output is kept in [`RenderOutput::raw`].
    #[config(default = false)]
    pub is_raw_kept: bool,
    /// Non-finite outputs are reported.
    #[config(default = false)]
    pub is_debug: bool,
    /// The seed of the host random generator.
    pub seed: Option<u64>,
}

/// What to render.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderRequest {
    pub camera: Camera,
    /// Rays to render instead of the camera rays.
    pub rays: Option<RayBundle>,
    /// The pose casting the rays while the view directions still come from
    /// [`camera`](Self::camera).
    pub camera_to_world_static: Option<[[f64; 4]; 3]>,
    pub near: f32,
    pub far: f32,
    pub time: f32,
}

/// Renders ray batches with one or two fields.
///
/// With [`field_fine`](Self::field_fine), the coarse pass is composited and
/// trained on its own. Otherwise the coarse pass of `field_coarse` only places
/// the fine samples, and its output is detached.
pub struct Renderer<'a, B: Backend, F> {
    pub field_coarse: &'a F,
    pub field_fine: Option<&'a F>,
    pub query: &'a FieldQuery<B>,
    pub options: &'a RenderOptions,
}

/// The per-ray outputs of a render call.
///
/// `S` is the sample count of the last pass.
#[derive(Clone)]
pub struct RenderOutput<B: Backend> {
    /// `[R, 3]`
    pub colors_rgb: Tensor<B, 2>,
    /// `[R]`
    pub disparities: Tensor<B, 1>,
    /// `[R]`
    pub opacities: Tensor<B, 1>,
    /// `[R]`
    pub depths: Tensor<B, 1>,
    /// `[R, S]`
    pub weights: Tensor<B, 2>,
    /// `[R, S]`
    pub sample_depths: Tensor<B, 2>,
    /// `[R]`
    pub sparsity_loss: Tensor<B, 1>,
    /// `[R, S, 3]`
    pub positions_delta: Tensor<B, 3>,
    /// `[R, S, 4]`
    pub raw: Option<Tensor<B, 3>>,
    /// Present if there are fine samples.
    pub coarse: Option<CoarseRenderOutput<B>>,
}

/// The outputs of the coarse pass.
#[derive(Clone, Debug)]
pub struct CoarseRenderOutput<B: Backend> {
    /// `[R]`
    pub sparsity_loss: Tensor<B, 1>,
    /// The standard deviation of the fine sample depths, `[R]`.
    pub z_std: Tensor<B, 1>,
    /// Present if the coarse pass has its own field.
    pub composited: Option<CoarseComposite<B>>,
}

#[derive(Clone, Debug)]
pub struct CoarseComposite<B: Backend> {
    /// `[R, 3]`
    pub colors_rgb: Tensor<B, 2>,
    /// `[R]`
    pub disparities: Tensor<B, 1>,
    /// `[R]`
    pub opacities: Tensor<B, 1>,
    /// `[R, S_c, 3]`
    pub positions_delta: Tensor<B, 3>,
}

/// The output of one pass over a ray chunk.
struct RenderPass<B: Backend> {
    samples: FieldSamples<B>,
    composite: CompositeOutput<B>,
    /// `[R, S]`
    sample_depths: Tensor<B, 2>,
}

impl RenderOptions {
    /// Disables stratified sampling and density noise.
    pub fn for_evaluation(&self) -> Self {
        self.to_owned()
            .with_is_perturbed(false)
            .with_noise_std(0.0)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.ray_chunk_size == Some(0) {
            return Err(Error::Validation(
                "ray_chunk_size".into(),
                "positive or unset".into(),
            ));
        }
        if self.point_chunk_size == Some(0) {
            return Err(Error::Validation(
                "point_chunk_size".into(),
                "positive or unset".into(),
            ));
        }
        if self.sample_count_coarse == 0 {
            return Err(Error::Validation(
                "sample_count_coarse".into(),
                "positive".into(),
            ));
        }
        if self.sample_count_fine != 0 && self.sample_count_coarse < 3 {
            return Err(Error::Validation(
                format!("sample_count_coarse ({})", self.sample_count_coarse),
                "at least 3 with fine samples".into(),
            ));
        }
        if !(self.noise_std >= 0.0 && self.noise_std.is_finite()) {
            return Err(Error::Validation(
                format!("noise_std ({})", self.noise_std),
                "finite and non-negative".into(),
            ));
        }

        Ok(())
    }
}

impl<'a, B: Backend, F: TemporalField<B>> Renderer<'a, B, F> {
    /// Renders the rays of the request.
    pub fn render(
        &self,
        request: RenderRequest,
        device: &B::Device,
    ) -> Result<RenderOutput<B>, Error> {
        let options = self.options;
        let camera = &request.camera;

        // Camera rays and NDC both read the image size.
        if (request.rays.is_none() || options.is_ndc)
            && (camera.image_width == 0 || camera.image_height == 0)
        {
            return Err(Error::Validation(
                format!(
                    "image size ({} x {})",
                    camera.image_width, camera.image_height
                ),
                "positive".into(),
            ));
        }
        if options.is_ndc
            && !(camera.focal_length().is_finite() && camera.focal_length() != 0.0)
        {
            return Err(Error::Validation(
                format!("focal length ({})", camera.focal_length()),
                "finite and non-zero with NDC".into(),
            ));
        }

        let mut rays = request.rays.unwrap_or_else(|| camera.rays());
        rays.validate()?;
        let view_directions =
            options.is_view_direction_used.then(|| rays.view_directions());

        if let Some(camera_to_world_static) = request
            .camera_to_world_static
            .filter(|_| options.is_view_direction_used)
        {
            rays = camera.with_camera_to_world(camera_to_world_static).rays();
        }

        if options.is_ndc {
            rays = rays.into_ndc(
                camera.image_width,
                camera.image_height,
                camera.focal_length(),
                1.0,
            );
        }

        self.render_rays(
            RayBatch::new(
                rays,
                request.near,
                request.far,
                request.time,
                view_directions,
            ),
            device,
        )
    }

    /// Renders the ray batch chunk by chunk.
    pub fn render_rays(
        &self,
        rays: RayBatch,
        device: &B::Device,
    ) -> Result<RenderOutput<B>, Error> {
        let options = self.options;
        self.validate(&rays)?;

        #[cfg(debug_assertions)]
        log::debug!(
            target: "tempo_nerf_renderer::render",
            "render_rays > ray_count ({}), ray_chunk_size ({:?})",
            rays.len(),
            options.ray_chunk_size,
        );

        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let output = batchify(rays, options.ray_chunk_size, |rays| {
            self.render_chunk(rays, &mut rng, device)
        });

        if options.is_debug {
            output.warn_non_finite();
        }

        Ok(output)
    }

    fn validate(
        &self,
        rays: &RayBatch,
    ) -> Result<(), Error> {
        self.options.validate()?;
        rays.validate()?;

        if rays.is_empty() {
            return Err(Error::Validation("ray count".into(), "positive".into()));
        }
        if self.options.is_view_direction_used {
            if self.query.view_encoder.is_none() {
                return Err(Error::Validation(
                    "FieldQuery::view_encoder".into(),
                    "set if view directions are used".into(),
                ));
            }
            if rays.view_directions.is_none() {
                return Err(Error::Validation(
                    "RayBatch::view_directions".into(),
                    "set if view directions are used".into(),
                ));
            }
        }

        Ok(())
    }

    fn render_chunk(
        &self,
        rays: RayBatch,
        rng: &mut StdRng,
        device: &B::Device,
    ) -> RenderOutput<B> {
        let options = self.options;
        // R
        let ray_count = rays.len();
        // S_c
        let sample_count_coarse = options.sample_count_coarse;
        // S_f
        let sample_count_fine = options.sample_count_fine;

        #[cfg(debug_assertions)]
        log::debug!(
            target: "tempo_nerf_renderer::render",
            "render_chunk > ray_count ({ray_count}), size ({})",
            format_size(
                ray_count * std::mem::size_of::<Ray>(),
                BINARY.decimal_places(1)
            ),
        );

        let uniforms = options
            .is_perturbed
            .then(|| draw_uniforms(rng, ray_count * sample_count_coarse));
        // [R * S_c]
        let depths_coarse = sample_coarse(
            &rays.nears(),
            &rays.fars(),
            sample_count_coarse,
            options.is_lindisp,
            uniforms.as_deref(),
        );
        let rays = rays.to_tensors::<B>(device);

        if sample_count_fine == 0 {
            let pass = self.render_pass(
                self.field_coarse,
                &rays,
                depths_coarse,
                false,
                device,
            );
            return self.output(pass, None);
        }

        let is_two_model = self.field_fine.is_some();
        let pass_coarse = self.render_pass(
            self.field_coarse,
            &rays,
            depths_coarse.to_owned(),
            !is_two_model,
            device,
        );

        // [R * (S_c - 1)]
        let bins = depths_coarse
            .chunks_exact(sample_count_coarse)
            .flat_map(|depths| depths.windows(2).map(|pair| 0.5 * (pair[0] + pair[1])))
            .collect::<Vec<_>>();
        // [R * (S_c - 2)]
        let weights = pass_coarse
            .composite
            .weights
            .to_owned()
            .narrow(1, 1, sample_count_coarse - 2)
            .into_host_vec();
        let uniforms = options
            .is_perturbed
            .then(|| draw_uniforms(rng, ray_count * sample_count_fine));
        // [R * S_f]
        let depths_fine = sample_fine(
            &bins,
            &weights,
            ray_count,
            sample_count_fine,
            uniforms.as_deref(),
        );
        let z_std = Tensor::from_data(
            TensorData::new(
                standard_deviations(&depths_fine, ray_count),
                [ray_count],
            ),
            device,
        );
        // [R * (S_c + S_f)]
        let depths = merge_sorted(&depths_coarse, &depths_fine, ray_count);

        let coarse = CoarseRenderOutput {
            sparsity_loss: pass_coarse.composite.sparsity_loss,
            z_std,
            composited: is_two_model.then(|| CoarseComposite {
                colors_rgb: pass_coarse.composite.colors_rgb,
                disparities: pass_coarse.composite.disparities,
                opacities: pass_coarse.composite.opacities,
                positions_delta: pass_coarse.samples.positions_delta,
            }),
        };

        let pass_fine = self.render_pass(
            self.field_fine.unwrap_or(self.field_coarse),
            &rays,
            depths,
            false,
            device,
        );

        self.output(pass_fine, Some(coarse))
    }

    /// Queries `field` at the sample depths and composites the output.
    fn render_pass(
        &self,
        field: &F,
        rays: &RayTensors<B>,
        sample_depths: Vec<f32>,
        is_detached: bool,
        device: &B::Device,
    ) -> RenderPass<B> {
        let options = self.options;
        // (R, 3)
        let [ray_count, _] = rays.origins.dims();
        // S
        let sample_count = sample_depths.len() / ray_count;

        #[cfg(debug_assertions)]
        log::debug!(
            target: "tempo_nerf_renderer::render",
            "render_pass > sample_count ({sample_count}), is_detached ({is_detached})",
        );

        // [R, S]
        let sample_depths = Tensor::<B, 2>::from_data(
            TensorData::new(sample_depths, [ray_count, sample_count]),
            device,
        );
        // [R, S, 3]
        let positions = rays.origins.to_owned().unsqueeze_dim::<3>(1)
            + rays.directions.to_owned().unsqueeze_dim::<3>(1)
                * sample_depths.to_owned().unsqueeze_dim::<3>(2);

        let mut samples = self.query.query(
            field,
            positions,
            rays.times.to_owned(),
            rays.view_directions
                .to_owned()
                .filter(|_| options.is_view_direction_used),
            options.point_chunk_size,
        );
        if is_detached {
            samples.raw = samples.raw.detach();
            samples.positions_delta = samples.positions_delta.detach();
        }

        let composite = composite(
            samples.raw.to_owned(),
            sample_depths.to_owned(),
            rays.directions.to_owned(),
            options.noise_std,
            options.is_white_background,
        );

        RenderPass {
            samples,
            composite,
            sample_depths,
        }
    }

    fn output(
        &self,
        pass: RenderPass<B>,
        coarse: Option<CoarseRenderOutput<B>>,
    ) -> RenderOutput<B> {
        let RenderPass {
            samples,
            composite,
            sample_depths,
        } = pass;

        RenderOutput {
            colors_rgb: composite.colors_rgb,
            disparities: composite.disparities,
            opacities: composite.opacities,
            depths: composite.depths,
            weights: composite.weights,
            sample_depths,
            sparsity_loss: composite.sparsity_loss,
            positions_delta: samples.positions_delta,
            raw: self.options.is_raw_kept.then_some(samples.raw),
            coarse,
        }
    }
}

impl<B: Backend> RenderOutput<B> {
    /// `[H, W, 3]`
    pub fn colors_rgb_image(
        &self,
        image_height: u32,
        image_width: u32,
    ) -> Tensor<B, 3> {
        self.colors_rgb.to_owned().reshape([
            image_height as usize,
            image_width as usize,
            3,
        ])
    }

    /// `[H, W]`
    pub fn disparities_image(
        &self,
        image_height: u32,
        image_width: u32,
    ) -> Tensor<B, 2> {
        self.disparities
            .to_owned()
            .reshape([image_height as usize, image_width as usize])
    }

    /// `[H, W]`
    pub fn opacities_image(
        &self,
        image_height: u32,
        image_width: u32,
    ) -> Tensor<B, 2> {
        self.opacities
            .to_owned()
            .reshape([image_height as usize, image_width as usize])
    }

    /// `[H, W]`
    pub fn depths_image(
        &self,
        image_height: u32,
        image_width: u32,
    ) -> Tensor<B, 2> {
        self.depths
            .to_owned()
            .reshape([image_height as usize, image_width as usize])
    }

    /// Logs a warning for every output holding NaN or infinity.
    pub fn warn_non_finite(&self) {
        let mut outputs = vec![
            ("colors_rgb", self.colors_rgb.to_owned().into_host_vec()),
            ("disparities", self.disparities.to_owned().into_host_vec()),
            ("opacities", self.opacities.to_owned().into_host_vec()),
            ("depths", self.depths.to_owned().into_host_vec()),
            ("weights", self.weights.to_owned().into_host_vec()),
            ("sample_depths", self.sample_depths.to_owned().into_host_vec()),
            ("sparsity_loss", self.sparsity_loss.to_owned().into_host_vec()),
            ("positions_delta", self.positions_delta.to_owned().into_host_vec()),
        ];
        if let Some(raw) = &self.raw {
            outputs.push(("raw", raw.to_owned().into_host_vec()));
        }
        if let Some(coarse) = &self.coarse {
            outputs.push((
                "coarse.sparsity_loss",
                coarse.sparsity_loss.to_owned().into_host_vec(),
            ));
            outputs.push(("coarse.z_std", coarse.z_std.to_owned().into_host_vec()));
            if let Some(composited) = &coarse.composited {
                outputs.push((
                    "coarse.colors_rgb",
                    composited.colors_rgb.to_owned().into_host_vec(),
                ));
                outputs.push((
                    "coarse.disparities",
                    composited.disparities.to_owned().into_host_vec(),
                ));
                outputs.push((
                    "coarse.opacities",
                    composited.opacities.to_owned().into_host_vec(),
                ));
            }
        }

        for (name, values) in outputs {
            let count = values.iter().filter(|value| !value.is_finite()).count();
            if count != 0 {
                log::warn!(
                    target: "tempo_nerf_renderer::render",
                    "{name} contains {count} non-finite values",
                );
            }
        }
    }
}

impl_batch_for_fields!(RenderOutput {
    colors_rgb,
    disparities,
    opacities,
    depths,
    weights,
    sample_depths,
    sparsity_loss,
    positions_delta,
    raw,
    coarse,
});

impl_batch_for_fields!(CoarseRenderOutput {
    sparsity_loss,
    z_std,
    composited,
});

impl_batch_for_fields!(CoarseComposite {
    colors_rgb,
    disparities,
    opacities,
    positions_delta,
});

impl<B: Backend> fmt::Debug for RenderOutput<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct(&format!("RenderOutput<{}>", B::name()))
            .field("colors_rgb.dims()", &self.colors_rgb.dims())
            .field("weights.dims()", &self.weights.dims())
            .field("raw.is_some()", &self.raw.is_some())
            .field("coarse.is_some()", &self.coarse.is_some())
            .finish()
    }
}

impl<'a, B: Backend, F> fmt::Debug for Renderer<'a, B, F> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct(&format!("Renderer<{}>", B::name()))
            .field("field_fine.is_some()", &self.field_fine.is_some())
            .field("options", self.options)
            .finish()
    }
}

impl Default for RenderOptions {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// `[count]` in `[0, 1)`
fn draw_uniforms(
    rng: &mut StdRng,
    count: usize,
) -> Vec<f32> {
    rng.sample_iter(rand_distr::Standard).take(count).collect()
}
