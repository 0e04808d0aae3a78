#![allow(clippy::excessive_precision)]
#![allow(missing_docs)]

pub mod backend;
pub mod camera;
pub mod encoder;
pub mod error;
pub mod field;
pub mod function;
pub mod loss;
pub mod render;
