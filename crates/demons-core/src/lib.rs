//! Core building blocks for demons registration: tensor-backed volumes and
//! displacement fields, interpolation, filters, free-form transformations and
//! volume utilities.

pub mod filter;
pub mod image;
pub mod interpolation;
pub mod transform;
pub mod utils;

pub use image::{ScalarVolume, VectorField, VolumeGeometry};
pub use interpolation::InterpolationMode;
pub use transform::{FreeFormTransformation3D, MultiLevelFreeFormTransformation, Transform};
