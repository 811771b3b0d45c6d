//! Interpolator trait for sampling volumes at continuous voxel indices.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Samples a `[Z, Y, X]` volume at continuous voxel indices.
///
/// Indices outside the grid are clamped to the border; use
/// [`domain_mask`](super::domain_mask) to find out which samples were inside.
///
/// # Type Parameters
/// * `B` - The burn backend
pub trait Interpolator<B: Backend> {
    /// Interpolate values of `data` at `indices`.
    ///
    /// # Arguments
    /// * `data` - Volume `[Z, Y, X]`
    /// * `indices` - Continuous indices `[N, 3]`, columns (x, y, z)
    ///
    /// # Returns
    /// Sampled values `[N]`
    fn interpolate(&self, data: &Tensor<B, 3>, indices: Tensor<B, 2>) -> Tensor<B, 1>;
}
