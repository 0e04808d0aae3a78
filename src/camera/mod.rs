//! Pinhole cameras and the rays they cast.

pub mod ndc;
pub mod rays;

pub use ndc::*;
pub use rays::*;

use rayon::prelude::*;

/// A pinhole camera in world space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Camera {
    /// Image height.
    pub image_height: u32,
    /// Image width.
    pub image_width: u32,
    /// Intrinsic matrix.
    ///
    /// It is in **row-major order**, i.e., `K[row][col]`.
    ///
    /// # Format
    ///
    /// ```plaintext
    /// [f_x 0   c_x]
    /// [0   f_y c_y]
    /// [0   0   1  ]
    /// ```
    pub intrinsics: [[f64; 3]; 3],
    /// Affine transformation from camera space to world space.
    ///
    /// It is in **row-major order**, i.e., `M[row][col]`.
    ///
    /// # Format
    ///
    /// ```plaintext
    /// [R_c | T_c]
    /// ```
    pub camera_to_world: [[f64; 4]; 3],
}

/// Linear transformations.
impl Camera {
    /// Returns the intrinsic matrix whose principal point is the image center.
    pub fn intrinsics_from_focal(
        image_width: u32,
        image_height: u32,
        focal_length: f64,
    ) -> [[f64; 3]; 3] {
        [
            [focal_length, 0.0, 0.5 * image_width as f64],
            [0.0, focal_length, 0.5 * image_height as f64],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Returns the camera-to-world transformation matrix.
    ///
    /// It is in **row-major order**, i.e., `M[row][col]`.
    #[inline]
    pub const fn transform(
        rotation: &[[f64; 3]; 3],
        translation: &[f64; 3],
    ) -> [[f64; 4]; 3] {
        let r = rotation;
        let t = translation;
        [
            [r[0][0], r[0][1], r[0][2], t[0]],
            [r[1][0], r[1][1], r[1][2], t[1]],
            [r[2][0], r[2][1], r[2][2], t[2]],
        ]
    }

    /// Returns the same camera placed at another pose.
    #[inline]
    pub const fn with_camera_to_world(
        mut self,
        camera_to_world: [[f64; 4]; 3],
    ) -> Self {
        self.camera_to_world = camera_to_world;
        self
    }
}

/// Dimension operations
impl Camera {
    /// `f_x`
    #[inline]
    pub const fn focal_length(&self) -> f64 {
        self.intrinsics[0][0]
    }

    /// `I_y * I_x`
    #[inline]
    pub const fn pixel_count(&self) -> usize {
        self.image_height as usize * self.image_width as usize
    }
}

/// Ray generation
impl Camera {
    /// Casts one ray through every pixel, row by row.
    ///
    /// The origins are the camera position in world space. The directions are
    /// not normalized, so that their `z` component in camera space is `-1`.
    pub fn rays(&self) -> RayBundle {
        let k = &self.intrinsics;
        let m = &self.camera_to_world;
        let image_width = self.image_width as usize;
        let origin = [m[0][3] as f32, m[1][3] as f32, m[2][3] as f32];

        let directions = (0..self.pixel_count())
            .into_par_iter()
            .map(|index| {
                let x = (index % image_width) as f64;
                let y = (index / image_width) as f64;
                let d = [(x - k[0][2]) / k[0][0], -(y - k[1][2]) / k[1][1], -1.0];
                [0, 1, 2].map(|row| {
                    (m[row][0] * d[0] + m[row][1] * d[1] + m[row][2] * d[2])
                        as f32
                })
            })
            .collect::<Vec<_>>();
        let origins = vec![origin; directions.len()];

        RayBundle {
            origins,
            directions,
        }
    }
}
