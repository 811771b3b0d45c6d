//! Nearest neighbour interpolation.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::trait_::Interpolator;
use super::split_columns;

/// Rounds every index to the nearest voxel.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighborInterpolator;

impl NearestNeighborInterpolator {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Interpolator<B> for NearestNeighborInterpolator {
    fn interpolate(&self, data: &Tensor<B, 3>, indices: Tensor<B, 2>) -> Tensor<B, 1> {
        let [nz, ny, nx] = data.dims();
        let [x, y, z] = split_columns(indices);

        let xi = x.round().clamp(0.0, (nx - 1) as f64).int();
        let yi = y.round().clamp(0.0, (ny - 1) as f64).int();
        let zi = z.round().clamp(0.0, (nz - 1) as f64).int();

        let flat = zi * (ny * nx) as i32 + yi * nx as i32 + xi;
        data.clone().reshape([nz * ny * nx]).gather(0, flat)
    }
}
