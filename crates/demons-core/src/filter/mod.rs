//! Image filters.

pub mod gaussian;
pub mod gradient;
pub mod pyramid;
pub mod resample;

pub use gaussian::GaussianFilter;
pub use gradient::{gradient, partial_derivative};
pub use pyramid::{ImagePyramid, PyramidBuilder};
pub use resample::ResampleImageFilter;
