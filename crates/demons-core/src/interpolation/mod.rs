//! Interpolation types and operations.
//!
//! Interpolators sample a `[Z, Y, X]` volume at continuous voxel indices
//! given as `[N, 3]` tensors with (x, y, z) columns.

pub mod linear;
pub mod nearest;
pub mod trait_;

use std::fmt;
use std::str::FromStr;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

pub use linear::LinearInterpolator;
pub use nearest::NearestNeighborInterpolator;
pub use trait_::Interpolator;

/// Interpolation used to sample the source and its gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterpolationMode {
    NearestNeighbor,
    #[default]
    Linear,
}

impl fmt::Display for InterpolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpolationMode::NearestNeighbor => write!(f, "NN"),
            InterpolationMode::Linear => write!(f, "Linear"),
        }
    }
}

impl FromStr for InterpolationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "NN" | "NearestNeighbor" | "Nearest" => Ok(InterpolationMode::NearestNeighbor),
            "Linear" => Ok(InterpolationMode::Linear),
            other => Err(format!("unknown interpolation mode '{}'", other)),
        }
    }
}

/// Boxed interpolator for `mode`.
pub fn create_interpolator<B: Backend>(mode: InterpolationMode) -> Box<dyn Interpolator<B>> {
    match mode {
        InterpolationMode::NearestNeighbor => Box::new(NearestNeighborInterpolator::new()),
        InterpolationMode::Linear => Box::new(LinearInterpolator::new()),
    }
}

/// Float mask `[N]`: 1 where a continuous index lies inside a grid of
/// `[nx, ny, nz]` voxels (`0 <= i <= n - 1` on every axis), 0 elsewhere.
pub fn domain_mask<B: Backend>(indices: Tensor<B, 2>, dims: [usize; 3]) -> Tensor<B, 1> {
    let [x, y, z] = split_columns(indices);
    axis_inside(x, dims[0]) * axis_inside(y, dims[1]) * axis_inside(z, dims[2])
}

/// Sample `data` at `indices` using only the voxels where `mask` is 1.
///
/// # Returns
/// `(values, valid)`, both `[N]`. A sample is valid when it lies inside the
/// grid and its nearest voxel is unmasked; its value is then
/// `interp(data · mask) / interp(mask)`. Without a mask every sample inside
/// the grid is valid and values are plain interpolation.
pub fn sample_masked<B: Backend>(
    interpolator: &dyn Interpolator<B>,
    data: &Tensor<B, 3>,
    mask: Option<&Tensor<B, 3>>,
    indices: Tensor<B, 2>,
) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let [nz, ny, nx] = data.dims();
    let inside = domain_mask(indices.clone(), [nx, ny, nz]);
    match mask {
        Some(mask) => {
            let nearest = NearestNeighborInterpolator::new().interpolate(mask, indices.clone());
            let weight = interpolator.interpolate(mask, indices.clone()).clamp_min(1e-6);
            let values = interpolator.interpolate(&(data.clone() * mask.clone()), indices) / weight;
            (values, inside * nearest)
        }
        None => (interpolator.interpolate(data, indices), inside),
    }
}

fn axis_inside<B: Backend>(column: Tensor<B, 1>, size: usize) -> Tensor<B, 1> {
    // tolerance keeps exact border samples inside despite float round-off
    column.clone().greater_equal_elem(-1e-4).float()
        * column.lower_equal_elem(size as f64 - 1.0 + 1e-4).float()
}

pub(crate) fn split_columns<B: Backend>(indices: Tensor<B, 2>) -> [Tensor<B, 1>; 3] {
    let n = indices.dims()[0];
    [
        indices.clone().narrow(1, 0, 1).reshape([n]),
        indices.clone().narrow(1, 1, 1).reshape([n]),
        indices.narrow(1, 2, 1).reshape([n]),
    ]
}
