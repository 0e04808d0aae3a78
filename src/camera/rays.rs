//! Ray records.

pub use burn::tensor::{backend::Backend, Tensor, TensorData};

use crate::error::Error;
use bytemuck::{cast_slice, Pod, Zeroable};

/// Ray origins and directions in world space.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RayBundle {
    /// `[R, 3]`
    pub origins: Vec<[f32; 3]>,
    /// `[R, 3]`
    pub directions: Vec<[f32; 3]>,
}

/// A ray with its bounds and time.
///
/// It is laid out as `[o_x, o_y, o_z, d_x, d_y, d_z, near, far, time]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Ray {
    pub origin: [f32; 3],
    pub direction: [f32; 3],
    pub near: f32,
    pub far: f32,
    pub time: f32,
}

/// Rays to render in one call.
///
/// All rays in one batch should share the same time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RayBatch {
    /// `[R]`
    pub rays: Vec<Ray>,
    /// `[R, 3]`, normalized.
    pub view_directions: Option<Vec<[f32; 3]>>,
}

/// Device-side view of a [`RayBatch`].
#[derive(Clone, Debug)]
pub struct RayTensors<B: Backend> {
    /// `[R, 3]`
    pub origins: Tensor<B, 2>,
    /// `[R, 3]`
    pub directions: Tensor<B, 2>,
    /// `[R, 1]`
    pub times: Tensor<B, 2>,
    /// `[R, 3]`
    pub view_directions: Option<Tensor<B, 2>>,
}

impl RayBundle {
    /// `R`
    #[inline]
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// Normalized directions.
    pub fn view_directions(&self) -> Vec<[f32; 3]> {
        self.directions.iter().copied().map(normalize).collect()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.directions.len() != self.origins.len() {
            return Err(Error::Validation(
                "directions.len()".into(),
                format!("{} (origins.len())", self.origins.len()),
            ));
        }

        Ok(())
    }
}

impl Ray {
    /// The number of `f32` in a ray record.
    pub const CHANNEL_COUNT: usize = 9;
}

impl RayBatch {
    /// Attaches the same bounds and time to every ray in the bundle.
    pub fn new(
        bundle: RayBundle,
        near: f32,
        far: f32,
        time: f32,
        view_directions: Option<Vec<[f32; 3]>>,
    ) -> Self {
        let rays = bundle
            .origins
            .into_iter()
            .zip(bundle.directions)
            .map(|(origin, direction)| Ray {
                origin,
                direction,
                near,
                far,
                time,
            })
            .collect();

        Self {
            rays,
            view_directions,
        }
    }

    /// `R`
    #[inline]
    pub fn len(&self) -> usize {
        self.rays.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rays.is_empty()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if let Some(view_directions) = &self.view_directions {
            if view_directions.len() != self.len() {
                return Err(Error::Validation(
                    "view_directions.len()".into(),
                    format!("{} (rays.len())", self.len()),
                ));
            }
        }

        if let Some(ray) = self.rays.iter().find(|ray| {
            !(ray.near.is_finite() && ray.far.is_finite() && ray.near <= ray.far)
        }) {
            return Err(Error::Validation(
                format!("near bound {} and far bound {}", ray.near, ray.far),
                "finite and ordered".into(),
            ));
        }

        Ok(())
    }

    pub fn nears(&self) -> Vec<f32> {
        self.rays.iter().map(|ray| ray.near).collect()
    }

    pub fn fars(&self) -> Vec<f32> {
        self.rays.iter().map(|ray| ray.far).collect()
    }

    pub fn to_tensors<B: Backend>(
        &self,
        device: &B::Device,
    ) -> RayTensors<B> {
        // R
        let ray_count = self.len();

        // [R, 9]
        let rays = Tensor::<B, 2>::from_data(
            TensorData::new(
                cast_slice::<Ray, f32>(&self.rays).to_vec(),
                [ray_count, Ray::CHANNEL_COUNT],
            ),
            device,
        );

        // [R, 3]
        let origins = rays.to_owned().narrow(1, 0, 3);
        // [R, 3]
        let directions = rays.to_owned().narrow(1, 3, 3);
        // [R, 1]
        let times = rays.narrow(1, 8, 1);

        // [R, 3]
        let view_directions = self.view_directions.as_ref().map(|view_directions| {
            Tensor::from_data(
                TensorData::new(
                    cast_slice::<[f32; 3], f32>(view_directions).to_vec(),
                    [ray_count, 3],
                ),
                device,
            )
        });

        RayTensors {
            origins,
            directions,
            times,
            view_directions,
        }
    }
}

#[inline]
fn normalize(v: [f32; 3]) -> [f32; 3] {
    let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    v.map(|c| c / norm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> RayBatch {
        RayBatch::new(
            RayBundle {
                origins: vec![[0.0, 0.0, 0.0], [1.0, 2.0, 3.0]],
                directions: vec![[0.0, 0.0, -2.0], [3.0, 0.0, 4.0]],
            },
            2.0,
            6.0,
            0.25,
            None,
        )
    }

    #[test]
    fn view_directions_are_normalized() {
        let bundle = RayBundle {
            origins: vec![[0.0; 3]; 2],
            directions: vec![[0.0, 0.0, -2.0], [3.0, 0.0, 4.0]],
        };

        assert_eq!(
            bundle.view_directions(),
            vec![[0.0, 0.0, -1.0], [0.6, 0.0, 0.8]]
        );
    }

    #[test]
    fn bundle_validate_lengths() {
        let mut bundle = RayBundle {
            origins: vec![[0.0; 3]; 2],
            directions: vec![[0.0, 0.0, -1.0]; 2],
        };
        assert!(bundle.validate().is_ok());

        bundle.directions.push([1.0, 0.0, 0.0]);
        assert!(matches!(bundle.validate(), Err(Error::Validation(..))));
    }

    #[test]
    fn to_tensors_columns() {
        use burn::backend::NdArray;

        let device = &Default::default();
        let tensors = batch().to_tensors::<NdArray<f32>>(device);

        tensors.origins.into_data().assert_eq(
            &TensorData::from([[0.0f32, 0.0, 0.0], [1.0, 2.0, 3.0]]),
            true,
        );
        tensors.directions.into_data().assert_eq(
            &TensorData::from([[0.0f32, 0.0, -2.0], [3.0, 0.0, 4.0]]),
            true,
        );
        tensors
            .times
            .into_data()
            .assert_eq(&TensorData::from([[0.25f32], [0.25]]), true);
        assert!(tensors.view_directions.is_none());
    }

    #[test]
    fn validate() {
        let mut rays = batch();
        assert!(rays.validate().is_ok());

        rays.view_directions = Some(vec![[0.0, 0.0, 1.0]]);
        assert!(rays.validate().is_err());

        rays.view_directions = None;
        rays.rays[0].near = 7.0;
        assert!(rays.validate().is_err());
    }
}
