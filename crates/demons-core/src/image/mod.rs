//! Volumes, displacement fields and their grid geometry.

pub mod field;
pub mod geometry;
pub mod volume;

pub use field::VectorField;
pub use geometry::{voxel_grid, VolumeGeometry};
pub use volume::ScalarVolume;
