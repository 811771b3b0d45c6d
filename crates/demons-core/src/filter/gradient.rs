//! Image gradient by finite differences.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use nalgebra::Matrix3;

use crate::image::{VectorField, VolumeGeometry};

/// Derivative of a `[Z, Y, X]` tensor along a voxel axis (0 = x, 1 = y,
/// 2 = z), in intensity per mm.
///
/// Central differences inside the grid, one-sided differences on the two
/// border planes and zero along an axis of length one.
pub fn partial_derivative<B: Backend>(data: &Tensor<B, 3>, axis: usize, spacing: f64) -> Tensor<B, 3> {
    let dim = 2 - axis;
    let n = data.dims()[dim];
    if n < 2 {
        return data.zeros_like();
    }
    let h = spacing as f32;
    let plane = |start: usize, len: usize| data.clone().narrow(dim, start, len);

    let first = (plane(1, 1) - plane(0, 1)) / h;
    let last = (plane(n - 1, 1) - plane(n - 2, 1)) / h;
    if n == 2 {
        return Tensor::cat(vec![first, last], dim);
    }
    let interior = (plane(2, n - 2) - plane(0, n - 2)) / (2.0 * h);
    Tensor::cat(vec![first, interior, last], dim)
}

/// Gradient of a volume frame in world axes (mm⁻¹ scaled intensities).
pub fn gradient<B: Backend>(data: &Tensor<B, 3>, geometry: &VolumeGeometry) -> VectorField<B> {
    let spacing = geometry.spacing();
    let voxel_axes = VectorField::new(
        partial_derivative(data, 0, spacing.x),
        partial_derivative(data, 1, spacing.y),
        partial_derivative(data, 2, spacing.z),
        *geometry,
    );
    if *geometry.direction() == Matrix3::identity() {
        return voxel_axes;
    }
    // world gradient = D^-T * per-axis gradient
    voxel_axes.rotate(&geometry.inverse_direction().transpose())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_gradient_of_ramp() {
        let device = Default::default();
        // f = 3x + z with spacing (2, 1, 0.5)
        let mut values = Vec::new();
        for z in 0..3 {
            for _y in 0..2 {
                for x in 0..4 {
                    values.push((3 * x + z) as f32);
                }
            }
        }
        let data = Tensor::<TestBackend, 3>::from_data(TensorData::new(values, [3, 2, 4]), &device);
        let geometry = VolumeGeometry::from_spacing([2.0, 1.0, 0.5]);
        let grad = gradient(&data, &geometry);
        for v in grad.component_values(0) {
            assert!((v - 1.5).abs() < 1e-5);
        }
        for v in grad.component_values(1) {
            assert!(v.abs() < 1e-6);
        }
        for v in grad.component_values(2) {
            assert!((v - 2.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_single_plane_axis_has_zero_derivative() {
        let device = Default::default();
        let data = Tensor::<TestBackend, 3>::from_floats([[[1.0, 2.0, 4.0]]], &device);
        let dz: Vec<f32> = partial_derivative(&data, 2, 1.0).into_data().iter::<f32>().collect();
        assert_eq!(dz, vec![0.0, 0.0, 0.0]);
        let dx: Vec<f32> = partial_derivative(&data, 0, 1.0).into_data().iter::<f32>().collect();
        assert_eq!(dx, vec![1.0, 1.5, 2.0]);
    }
}
