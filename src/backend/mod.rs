//! Backends to render fields on.
//!
//! Any [`Backend`] renders. Wrapping it in [`Autodiff`] lets the render
//! output be differentiated back into the field parameters.

pub use burn::{
    backend::wgpu::{WgpuDevice, WgpuRuntime},
    tensor::backend::{AutodiffBackend, Backend},
};

use burn::backend::autodiff;

/// The backend for training fields through a render call.
pub type Autodiff<B> = autodiff::Autodiff<B>;

/// The GPU backend with `f32` floats and `i32` integers.
pub type Wgpu = burn_jit::JitBackend<WgpuRuntime, f32, i32>;
