//! Merging updates into the global field and fitting the lattice to it.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use demons_core::image::voxel_grid;
use demons_core::interpolation::LinearInterpolator;
use demons_core::{FreeFormTransformation3D, VectorField};
use nalgebra::{Point3, Vector3};
use tracing::debug;

use crate::error::{RegistrationError, Result};

/// `d'(v) = d(v) + u(v)`.
pub fn add_fields<B: Backend>(field: &VectorField<B>, update: &VectorField<B>) -> VectorField<B> {
    field.add(update)
}

/// `d'(v) = d(v + u(v)) + u(v)`.
///
/// The field is sampled trilinearly; positions leaving the grid take the
/// border value.
pub fn compose_fields<B: Backend>(field: &VectorField<B>, update: &VectorField<B>) -> VectorField<B> {
    let dims = field.dims();
    let geometry = *field.geometry();
    let offsets = update.to_flat();
    let indices = voxel_grid::<B>(dims, &field.device()) + geometry.offset_to_voxel_tensor(offsets.clone());
    let sampled = field.sample(&LinearInterpolator::new(), indices);
    VectorField::from_flat(sampled + offsets, dims, geometry)
}

/// Fit `ffd` to `field` at the voxels where `mask` is 1.
///
/// # Returns
/// The RMS fitting error (mm).
///
/// # Errors
/// `ShapeMismatch` if the mask does not cover the field grid.
pub fn fit_lattice<B: Backend>(
    ffd: &mut FreeFormTransformation3D,
    field: &VectorField<B>,
    mask: &Tensor<B, 3>,
) -> Result<f64> {
    let [nx, ny, nz] = field.dims();
    if mask.dims() != [nz, ny, nx] {
        return Err(RegistrationError::ShapeMismatch {
            expected: vec![nz, ny, nx],
            actual: mask.dims().to_vec(),
        });
    }

    let mask: Vec<f32> = mask.clone().into_data().iter::<f32>().collect();
    let [dx, dy, dz] = [0, 1, 2].map(|axis| field.component_values(axis));
    let geometry = field.geometry();

    let mut points = Vec::new();
    let mut displacements = Vec::new();
    for (index, &m) in mask.iter().enumerate() {
        if m <= 0.5 {
            continue;
        }
        let x = index % nx;
        let y = (index / nx) % ny;
        let z = index / (nx * ny);
        points.push(geometry.voxel_to_world(&Point3::new(x as f64, y as f64, z as f64)));
        displacements.push(Vector3::new(dx[index] as f64, dy[index] as f64, dz[index] as f64));
    }

    let error = ffd.approximate(&points, &displacements);
    debug!("Fitted lattice to {} voxel(s), RMS error {:.6} mm", points.len(), error);
    Ok(error)
}
