//! Free-form deformation on a regular control-point lattice.
//!
//! Each control point carries a displacement vector (mm, world axes). The
//! displacement at a world point is the trilinear blend of the eight
//! surrounding control points; outside the lattice the missing neighbours
//! contribute nothing.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::trait_::Transform;
use crate::image::{VectorField, VolumeGeometry};

/// Whether a control point may be changed by a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControlPointStatus {
    #[default]
    Active,
    Passive,
}

/// Single-level free-form transformation with a trilinear basis.
#[derive(Debug, Clone)]
pub struct FreeFormTransformation3D {
    dims: [usize; 3],
    lattice: VolumeGeometry,
    displacements: Vec<Vector3<f64>>,
    status: Vec<ControlPointStatus>,
}

impl FreeFormTransformation3D {
    /// Zero lattice of `dims` control points placed by `lattice`.
    ///
    /// # Panics
    /// Panics if a lattice dimension is zero.
    pub fn new(dims: [usize; 3], lattice: VolumeGeometry) -> Self {
        assert!(dims.iter().all(|&d| d > 0), "lattice dimensions must be positive");
        let n = dims.iter().product();
        Self {
            dims,
            lattice,
            displacements: vec![Vector3::zeros(); n],
            status: vec![ControlPointStatus::Active; n],
        }
    }

    /// Lattice covering a volume grid with control points `spacing` mm apart.
    ///
    /// The lattice shares the orientation and centre of the grid and spans its
    /// extent; the spacing per axis is adjusted so that control points fall on
    /// both ends. A spacing equal to the voxel spacing puts one control point
    /// on every voxel.
    pub fn over_volume(geometry: &VolumeGeometry, dims: [usize; 3], spacing: f64) -> Self {
        let mut lattice_dims = [1usize; 3];
        let mut lattice_spacing = Vector3::new(spacing, spacing, spacing);
        for axis in 0..3 {
            let extent = (dims[axis] as f64 - 1.0) * geometry.spacing()[axis];
            if extent <= 0.0 {
                continue;
            }
            let intervals = (extent / spacing).round().max(1.0);
            lattice_dims[axis] = intervals as usize + 1;
            lattice_spacing[axis] = extent / intervals;
        }
        let lattice = geometry.resampled(dims, lattice_dims, lattice_spacing);
        Self::new(lattice_dims, lattice)
    }

    /// Number of control points along (x, y, z).
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn number_of_control_points(&self) -> usize {
        self.displacements.len()
    }

    pub fn lattice_geometry(&self) -> &VolumeGeometry {
        &self.lattice
    }

    /// Linear index of control point `(i, j, k)`.
    ///
    /// # Panics
    /// Panics if the control point is outside the lattice.
    pub fn lattice_to_index(&self, i: usize, j: usize, k: usize) -> usize {
        let [nx, ny, nz] = self.dims;
        assert!(
            i < nx && j < ny && k < nz,
            "control point ({}, {}, {}) outside lattice {:?}",
            i,
            j,
            k,
            self.dims
        );
        (k * ny + j) * nx + i
    }

    /// Lattice coordinates of a linear control-point index.
    pub fn index_to_lattice(&self, index: usize) -> (usize, usize, usize) {
        let [nx, ny, _] = self.dims;
        assert!(index < self.displacements.len(), "control point index {} out of range", index);
        (index % nx, (index / nx) % ny, index / (nx * ny))
    }

    /// World position of control point `(i, j, k)`.
    pub fn lattice_to_world(&self, i: usize, j: usize, k: usize) -> Point3<f64> {
        self.lattice.voxel_to_world(&Point3::new(i as f64, j as f64, k as f64))
    }

    /// Continuous lattice coordinates of a world point.
    pub fn world_to_lattice(&self, point: &Point3<f64>) -> Point3<f64> {
        self.lattice.world_to_voxel(point)
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> Vector3<f64> {
        self.displacements[self.lattice_to_index(i, j, k)]
    }

    pub fn put(&mut self, i: usize, j: usize, k: usize, displacement: Vector3<f64>) {
        let index = self.lattice_to_index(i, j, k);
        self.displacements[index] = displacement;
    }

    pub fn get_status(&self, i: usize, j: usize, k: usize) -> ControlPointStatus {
        self.status[self.lattice_to_index(i, j, k)]
    }

    pub fn put_status(&mut self, i: usize, j: usize, k: usize, status: ControlPointStatus) {
        let index = self.lattice_to_index(i, j, k);
        self.status[index] = status;
    }

    /// Number of active control points.
    pub fn number_of_active(&self) -> usize {
        self.status
            .iter()
            .filter(|&&s| s == ControlPointStatus::Active)
            .count()
    }

    /// Voxel region `(min, max)` (inclusive) of a grid influenced by control
    /// point `index`, or `None` if the support misses the grid.
    pub fn bounding_box(
        &self,
        index: usize,
        geometry: &VolumeGeometry,
        dims: [usize; 3],
    ) -> Option<([usize; 3], [usize; 3])> {
        let (i, j, k) = self.index_to_lattice(index);
        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for corner in 0..8 {
            let lattice = Point3::new(
                i as f64 + if corner & 1 == 0 { -1.0 } else { 1.0 },
                j as f64 + if corner & 2 == 0 { -1.0 } else { 1.0 },
                k as f64 + if corner & 4 == 0 { -1.0 } else { 1.0 },
            );
            let voxel = geometry.world_to_voxel(&self.lattice.voxel_to_world(&lattice));
            for axis in 0..3 {
                lo[axis] = lo[axis].min(voxel[axis]);
                hi[axis] = hi[axis].max(voxel[axis]);
            }
        }

        let mut min = [0usize; 3];
        let mut max = [0usize; 3];
        for axis in 0..3 {
            let upper = dims[axis] as f64 - 1.0;
            let first = lo[axis].ceil().max(0.0);
            let last = hi[axis].floor().min(upper);
            if first > last {
                return None;
            }
            min[axis] = first as usize;
            max[axis] = last as usize;
        }
        Some((min, max))
    }

    /// Displacement (mm) at a world point.
    pub fn displacement_at(&self, point: &Point3<f64>) -> Vector3<f64> {
        self.basis(point)
            .into_iter()
            .fold(Vector3::zeros(), |acc, (index, weight)| acc + self.displacements[index] * weight)
    }

    /// Displacement at every voxel of a grid.
    pub fn displacement_field<B: Backend>(
        &self,
        geometry: &VolumeGeometry,
        dims: [usize; 3],
        device: &B::Device,
    ) -> VectorField<B> {
        displacement_field_of(geometry, dims, device, |p| self.displacement_at(p))
    }

    /// Fit the lattice to scattered displacements.
    ///
    /// The residual between the target displacements and the current lattice
    /// is approximated with the scattered-data scheme of Lee, Wolberg and Shin
    /// and added to the active control points. Passive control points are
    /// left unchanged.
    ///
    /// # Returns
    /// The RMS fitting error (mm) after the update.
    pub fn approximate(&mut self, points: &[Point3<f64>], displacements: &[Vector3<f64>]) -> f64 {
        assert_eq!(
            points.len(),
            displacements.len(),
            "point and displacement counts differ"
        );
        if points.is_empty() {
            return 0.0;
        }

        let n = self.displacements.len();
        let mut numerator = vec![Vector3::<f64>::zeros(); n];
        let mut denominator = vec![0.0f64; n];

        for (point, target) in points.iter().zip(displacements) {
            let basis = self.basis(point);
            let norm: f64 = basis.iter().map(|(_, w)| w * w).sum();
            if norm <= 0.0 {
                continue;
            }
            let residual = target - self.displacement_at(point);
            for (index, weight) in basis {
                let w2 = weight * weight;
                // phi = w * residual / norm, accumulated with weight w^2
                numerator[index] += residual * (w2 * weight / norm);
                denominator[index] += w2;
            }
        }

        for index in 0..n {
            if self.status[index] == ControlPointStatus::Passive || denominator[index] <= 0.0 {
                continue;
            }
            self.displacements[index] += numerator[index] / denominator[index];
        }

        let squared: f64 = points
            .iter()
            .zip(displacements)
            .map(|(p, d)| (d - self.displacement_at(p)).norm_squared())
            .sum();
        (squared / points.len() as f64).sqrt()
    }

    /// Largest control-point difference to another lattice of the same shape.
    pub fn max_difference(&self, other: &Self) -> f64 {
        assert_eq!(self.dims, other.dims, "lattices differ in shape");
        self.displacements
            .iter()
            .zip(&other.displacements)
            .map(|(a, b)| (a - b).norm())
            .fold(0.0, f64::max)
    }

    /// Set every control point to zero and mark it active.
    pub fn reset(&mut self) {
        self.displacements.iter_mut().for_each(|d| *d = Vector3::zeros());
        self.status.iter_mut().for_each(|s| *s = ControlPointStatus::Active);
    }

    // (linear index, weight) of the control points whose support holds the point
    fn basis(&self, point: &Point3<f64>) -> Vec<(usize, f64)> {
        let u = self.world_to_lattice(point);
        let mut weights = Vec::with_capacity(8);
        let base = [u.x.floor(), u.y.floor(), u.z.floor()];
        for corner in 0..8usize {
            let offset = [corner & 1, (corner >> 1) & 1, (corner >> 2) & 1];
            let mut weight = 1.0;
            let mut lattice = [0usize; 3];
            let mut inside = true;
            for axis in 0..3 {
                let c = base[axis] + offset[axis] as f64;
                if c < 0.0 || c > (self.dims[axis] - 1) as f64 {
                    inside = false;
                    break;
                }
                weight *= 1.0 - (u[axis] - c).abs();
                lattice[axis] = c as usize;
            }
            if inside && weight > 0.0 {
                weights.push((self.lattice_to_index(lattice[0], lattice[1], lattice[2]), weight));
            }
        }
        weights
    }
}

impl<B: Backend> Transform<B> for FreeFormTransformation3D {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        displace_points(points, |p| self.displacement_at(p))
    }
}

pub(crate) fn displace_points<B, F>(points: Tensor<B, 2>, displacement: F) -> Tensor<B, 2>
where
    B: Backend,
    F: Fn(&Point3<f64>) -> Vector3<f64> + Sync,
{
    let device = points.device();
    let n = points.dims()[0];
    let values: Vec<f32> = points.into_data().iter::<f32>().collect();
    let out: Vec<f32> = values
        .par_chunks_exact(3)
        .flat_map_iter(|p| {
            let point = Point3::new(p[0] as f64, p[1] as f64, p[2] as f64);
            let moved = point + displacement(&point);
            [moved.x as f32, moved.y as f32, moved.z as f32]
        })
        .collect();
    Tensor::from_data(TensorData::new(out, [n, 3]), &device)
}

pub(crate) fn displacement_field_of<B, F>(
    geometry: &VolumeGeometry,
    dims: [usize; 3],
    device: &B::Device,
    displacement: F,
) -> VectorField<B>
where
    B: Backend,
    F: Fn(&Point3<f64>) -> Vector3<f64> + Sync,
{
    let [nx, ny, nz] = dims;
    // one slice per task, in memory order
    let out: Vec<f32> = (0..nz)
        .into_par_iter()
        .flat_map_iter(|z| {
            let mut slice = Vec::with_capacity(nx * ny * 3);
            for y in 0..ny {
                for x in 0..nx {
                    let point = geometry.voxel_to_world(&Point3::new(x as f64, y as f64, z as f64));
                    let d = displacement(&point);
                    slice.extend([d.x as f32, d.y as f32, d.z as f32]);
                }
            }
            slice
        })
        .collect();
    let offsets = Tensor::<B, 2>::from_data(TensorData::new(out, [nx * ny * nz, 3]), device);
    VectorField::from_flat(offsets, dims, *geometry)
}
