//! Trilinear interpolation.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

use super::trait_::Interpolator;
use super::split_columns;

/// Trilinear interpolation of the eight surrounding voxels.
///
/// Neighbours outside the grid are replaced by the nearest border voxel, so a
/// sample exactly on the last voxel plane is still exact.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearInterpolator;

impl LinearInterpolator {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Interpolator<B> for LinearInterpolator {
    fn interpolate(&self, data: &Tensor<B, 3>, indices: Tensor<B, 2>) -> Tensor<B, 1> {
        let [nz, ny, nx] = data.dims();
        let [x, y, z] = split_columns(indices);

        let x0 = x.clone().floor();
        let y0 = y.clone().floor();
        let z0 = z.clone().floor();

        // weights of the upper neighbour per axis
        let wx = x - x0.clone();
        let wy = y - y0.clone();
        let wz = z - z0.clone();

        let (x_lo, x_hi) = corner_indices(x0, nx);
        let (y_lo, y_hi) = corner_indices(y0, ny);
        let (z_lo, z_hi) = corner_indices(z0, nz);

        let flat = data.clone().reshape([nz * ny * nx]);
        let fetch = |xi: &Tensor<B, 1, Int>, yi: &Tensor<B, 1, Int>, zi: &Tensor<B, 1, Int>| {
            let idx = zi.clone() * (ny * nx) as i32 + yi.clone() * nx as i32 + xi.clone();
            flat.clone().gather(0, idx)
        };

        let lerp = |a: Tensor<B, 1>, b: Tensor<B, 1>, w: &Tensor<B, 1>| {
            a.clone() + (b - a) * w.clone()
        };

        let c00 = lerp(fetch(&x_lo, &y_lo, &z_lo), fetch(&x_hi, &y_lo, &z_lo), &wx);
        let c10 = lerp(fetch(&x_lo, &y_hi, &z_lo), fetch(&x_hi, &y_hi, &z_lo), &wx);
        let c01 = lerp(fetch(&x_lo, &y_lo, &z_hi), fetch(&x_hi, &y_lo, &z_hi), &wx);
        let c11 = lerp(fetch(&x_lo, &y_hi, &z_hi), fetch(&x_hi, &y_hi, &z_hi), &wx);

        let c0 = lerp(c00, c10, &wy);
        let c1 = lerp(c01, c11, &wy);
        lerp(c0, c1, &wz)
    }
}

fn corner_indices<B: Backend>(floor: Tensor<B, 1>, size: usize) -> (Tensor<B, 1, Int>, Tensor<B, 1, Int>) {
    let max = (size - 1) as f64;
    let lo = floor.clone().clamp(0.0, max).int();
    let hi = (floor + 1.0).clamp(0.0, max).int();
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_linear_reproduces_affine_function() {
        let device = Default::default();
        // f(x, y, z) = x + 2y + 3z on a 3x3x3 grid
        let mut values = Vec::new();
        for z in 0..3 {
            for y in 0..3 {
                for x in 0..3 {
                    values.push((x + 2 * y + 3 * z) as f32);
                }
            }
        }
        let data = Tensor::<TestBackend, 3>::from_data(
            burn::tensor::TensorData::new(values, [3, 3, 3]),
            &device,
        );
        let indices = Tensor::<TestBackend, 2>::from_floats(
            [[0.5, 0.5, 0.5], [1.25, 0.0, 1.75], [2.0, 2.0, 2.0]],
            &device,
        );
        let sampled: Vec<f32> = LinearInterpolator::new()
            .interpolate(&data, indices)
            .into_data()
            .iter::<f32>()
            .collect();
        assert!((sampled[0] - 3.0).abs() < 1e-5);
        assert!((sampled[1] - 6.5).abs() < 1e-5);
        assert!((sampled[2] - 12.0).abs() < 1e-5);
    }

    #[test]
    fn test_linear_clamps_outside() {
        let device = Default::default();
        let data = Tensor::<TestBackend, 3>::from_floats([[[1.0, 3.0]]], &device);
        let indices = Tensor::<TestBackend, 2>::from_floats([[-2.0, 0.0, 0.0], [5.0, 0.0, 0.0]], &device);
        let sampled: Vec<f32> = LinearInterpolator::new()
            .interpolate(&data, indices)
            .into_data()
            .iter::<f32>()
            .collect();
        assert_eq!(sampled, vec![1.0, 3.0]);
    }
}
