//! Transform trait for mapping world points.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Maps world points (mm) of one space to another.
///
/// # Type Parameters
/// * `B` - The burn backend
pub trait Transform<B: Backend> {
    /// Apply the transform to a batch of points.
    ///
    /// # Arguments
    /// * `points` - `[N, 3]` world points, columns (x, y, z)
    ///
    /// # Returns
    /// `[N, 3]` transformed points
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2>;
}
