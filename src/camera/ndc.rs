//! Normalized device coordinates for forward-facing captures.
//!
//! Depth along a ray in NDC is linear in disparity. It should not be used
//! for captures with full 3D camera coverage.

pub use super::RayBundle;

/// Maps a ray into normalized device coordinates.
///
/// The origin is first moved along the ray onto the plane `z = -near`.
pub fn ndc_ray(
    image_width: u32,
    image_height: u32,
    focal_length: f64,
    near: f64,
    origin: [f32; 3],
    direction: [f32; 3],
) -> ([f32; 3], [f32; 3]) {
    let o = origin.map(|c| c as f64);
    let d = direction.map(|c| c as f64);
    // -2 * f / I_x
    let scale_x = -2.0 * focal_length / image_width as f64;
    // -2 * f / I_y
    let scale_y = -2.0 * focal_length / image_height as f64;

    let t = -(near + o[2]) / d[2];
    let o = [0, 1, 2].map(|i| o[i] + t * d[i]);

    let origin_ndc = [
        scale_x * o[0] / o[2],
        scale_y * o[1] / o[2],
        1.0 + 2.0 * near / o[2],
    ];
    let direction_ndc = [
        scale_x * (d[0] / d[2] - o[0] / o[2]),
        scale_y * (d[1] / d[2] - o[1] / o[2]),
        -2.0 * near / o[2],
    ];

    (origin_ndc.map(|c| c as f32), direction_ndc.map(|c| c as f32))
}

/// Maps a ray in normalized device coordinates back into camera space.
///
/// The origin lies on the plane `z = -near`. The direction is recovered up to
/// scale and is returned with `z = -1`.
pub fn ndc_ray_inverse(
    image_width: u32,
    image_height: u32,
    focal_length: f64,
    near: f64,
    origin_ndc: [f32; 3],
    direction_ndc: [f32; 3],
) -> ([f32; 3], [f32; 3]) {
    let o = origin_ndc.map(|c| c as f64);
    let d = direction_ndc.map(|c| c as f64);
    let scale_x = -2.0 * focal_length / image_width as f64;
    let scale_y = -2.0 * focal_length / image_height as f64;

    let origin_z = 2.0 * near / (o[2] - 1.0);
    let origin = [
        o[0] * origin_z / scale_x,
        o[1] * origin_z / scale_y,
        origin_z,
    ];
    // d_x / d_z, d_y / d_z
    let slope_x = d[0] / scale_x + origin[0] / origin[2];
    let slope_y = d[1] / scale_y + origin[1] / origin[2];
    let direction = [-slope_x, -slope_y, -1.0];

    (origin.map(|c| c as f32), direction.map(|c| c as f32))
}

impl RayBundle {
    /// Maps every ray into normalized device coordinates.
    pub fn into_ndc(
        self,
        image_width: u32,
        image_height: u32,
        focal_length: f64,
        near: f64,
    ) -> Self {
        let (origins, directions) = self
            .origins
            .into_iter()
            .zip(self.directions)
            .map(|(origin, direction)| {
                ndc_ray(
                    image_width,
                    image_height,
                    focal_length,
                    near,
                    origin,
                    direction,
                )
            })
            .unzip();

        Self {
            origins,
            directions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(
        output: [f32; 3],
        target: [f32; 3],
    ) {
        output.iter().zip(target).for_each(|(o, t)| {
            assert!((o - t).abs() < 1e-5, "{output:?} != {target:?}")
        });
    }

    #[test]
    fn round_trip() {
        let origin = [0.1, -0.2, -1.0];
        let direction = [0.3, 0.1, -1.0];

        let (origin_ndc, direction_ndc) =
            ndc_ray(400, 300, 350.0, 1.0, origin, direction);
        let (origin_output, direction_output) = ndc_ray_inverse(
            400,
            300,
            350.0,
            1.0,
            origin_ndc,
            direction_ndc,
        );

        assert_close(origin_output, origin);
        assert_close(direction_output, direction);
    }

    #[test]
    fn origin_moves_to_near_plane() {
        let origin = [0.0, 0.0, 0.0];
        let direction = [0.5, 0.25, -2.0];

        let (origin_ndc, direction_ndc) =
            ndc_ray(200, 200, 100.0, 1.0, origin, direction);
        let (origin_output, direction_output) = ndc_ray_inverse(
            200,
            200,
            100.0,
            1.0,
            origin_ndc,
            direction_ndc,
        );

        assert_close(origin_output, [0.25, 0.125, -1.0]);
        assert_close(direction_output, [0.25, 0.125, -1.0]);
        // The near plane maps to -1
        assert!((origin_ndc[2] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn bundle_into_ndc() {
        let bundle = RayBundle {
            origins: vec![[0.1, -0.2, -1.0]; 2],
            directions: vec![[0.3, 0.1, -1.0], [0.0, 0.0, -1.0]],
        };
        let output = bundle.to_owned().into_ndc(400, 300, 350.0, 1.0);

        assert_eq!(output.len(), 2);
        assert_eq!(
            output.origins[0],
            ndc_ray(400, 300, 350.0, 1.0, bundle.origins[0], bundle.directions[0]).0
        );
    }
}
