//! Demons force.
//!
//! For every voxel the force is
//! `step * diff * g / (|g|^2 + diff^2)` with `diff = T - S(warped)` and `g`
//! an image gradient. Voxels whose denominator is below [`DENOMINATOR_FLOOR`]
//! or whose mask is 0 get no force.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use demons_core::VectorField;

/// Smallest denominator for which a force is computed.
pub const DENOMINATOR_FLOOR: f64 = 1e-9;

/// Demons force of one gradient.
///
/// # Arguments
/// * `target` - target intensities `[Z, Y, X]`
/// * `warped` - source intensities at the warped positions `[Z, Y, X]`
/// * `gradient` - intensity gradient (per mm, world axes) driving the force
/// * `mask` - 1 where a force may be computed
/// * `step` - step size
pub fn demons_force<B: Backend>(
    target: &Tensor<B, 3>,
    warped: &Tensor<B, 3>,
    gradient: &VectorField<B>,
    mask: &Tensor<B, 3>,
    step: f64,
) -> VectorField<B> {
    let diff = target.clone() - warped.clone();
    let denominator = gradient.magnitude().powf_scalar(2.0) + diff.clone().powf_scalar(2.0);
    let valid = denominator.clone().greater_elem(DENOMINATOR_FLOOR).float() * mask.clone();
    let factor = diff * step / denominator.clamp_min(DENOMINATOR_FLOOR) * valid;
    gradient.map_components(|g| g * factor.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use demons_core::VolumeGeometry;

    type TestBackend = NdArray<f32>;

    fn tensor(values: Vec<f32>) -> Tensor<TestBackend, 3> {
        let device = Default::default();
        let n = values.len();
        Tensor::<TestBackend, 1>::from_floats(values.as_slice(), &device).reshape([1, 1, n])
    }

    fn gradient_x(values: Vec<f32>) -> VectorField<TestBackend> {
        let zero = tensor(vec![0.0; values.len()]);
        VectorField::new(tensor(values), zero.clone(), zero, VolumeGeometry::default())
    }

    #[test]
    fn test_zero_where_images_agree() {
        let target = tensor(vec![1.0, 2.0, 3.0, 4.0]);
        let gradient = gradient_x(vec![1.0, 1.0, 1.0, 1.0]);
        let mask = tensor(vec![1.0; 4]);
        let force = demons_force(&target, &target, &gradient, &mask, 1.0);
        for axis in 0..3 {
            assert!(force.component_values(axis).iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_force_formula() {
        // diff = 1, g = (2, 0, 0): f = 1 * 2 / (4 + 1)
        let target = tensor(vec![3.0, 3.0]);
        let warped = tensor(vec![2.0, 2.0]);
        let gradient = gradient_x(vec![2.0, 2.0]);
        let mask = tensor(vec![1.0, 0.0]);
        let force = demons_force(&target, &warped, &gradient, &mask, 0.5);
        let x = force.component_values(0);
        assert!((x[0] - 0.2).abs() < 1e-6);
        assert_eq!(x[1], 0.0);
    }

    #[test]
    fn test_flat_region_has_no_force() {
        let target = tensor(vec![0.0]);
        let warped = tensor(vec![0.0]);
        let gradient = gradient_x(vec![0.0]);
        let mask = tensor(vec![1.0]);
        let force = demons_force(&target, &warped, &gradient, &mask, 1.0);
        assert!(force.component_values(0)[0].is_finite());
        assert_eq!(force.component_values(0)[0], 0.0);
    }
}
