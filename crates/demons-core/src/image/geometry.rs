//! Physical geometry of a voxel grid.
//!
//! A `VolumeGeometry` maps voxel indices to world coordinates (mm):
//! `world = origin + direction * (index ∘ spacing)`.
//! All vectors are in (x, y, z) order, while tensors store voxels as
//! `[Z, Y, X]` with x varying fastest.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use nalgebra::{Matrix3, Point3, Vector3};

/// Origin, spacing and orientation of a voxel grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeGeometry {
    origin: Point3<f64>,
    spacing: Vector3<f64>,
    direction: Matrix3<f64>,
    inverse_direction: Matrix3<f64>,
}

impl VolumeGeometry {
    /// Create a geometry.
    ///
    /// # Panics
    /// Panics if a spacing component is not strictly positive or if the
    /// direction matrix is singular.
    pub fn new(origin: Point3<f64>, spacing: Vector3<f64>, direction: Matrix3<f64>) -> Self {
        assert!(
            spacing.iter().all(|&s| s > 0.0),
            "voxel spacing must be positive, got {:?}",
            spacing
        );
        let inverse_direction = direction
            .try_inverse()
            .expect("direction matrix must be invertible");
        Self {
            origin,
            spacing,
            direction,
            inverse_direction,
        }
    }

    /// Axis-aligned geometry with its first voxel at the world origin.
    pub fn from_spacing(spacing: [f64; 3]) -> Self {
        Self::new(Point3::origin(), Vector3::from(spacing), Matrix3::identity())
    }

    pub fn origin(&self) -> &Point3<f64> {
        &self.origin
    }

    pub fn spacing(&self) -> &Vector3<f64> {
        &self.spacing
    }

    pub fn direction(&self) -> &Matrix3<f64> {
        &self.direction
    }

    pub fn inverse_direction(&self) -> &Matrix3<f64> {
        &self.inverse_direction
    }

    /// Continuous voxel index to world point.
    pub fn voxel_to_world(&self, index: &Point3<f64>) -> Point3<f64> {
        self.origin + self.direction * index.coords.component_mul(&self.spacing)
    }

    /// World point to continuous voxel index.
    pub fn world_to_voxel(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from((self.inverse_direction * (point - self.origin)).component_div(&self.spacing))
    }

    /// A world-space displacement expressed in voxel units.
    pub fn world_offset_to_voxel(&self, offset: &Vector3<f64>) -> Vector3<f64> {
        (self.inverse_direction * offset).component_div(&self.spacing)
    }

    /// World position of the centre of a grid with `dims` voxels.
    pub fn centre(&self, dims: [usize; 3]) -> Point3<f64> {
        let half = Point3::new(
            (dims[0] as f64 - 1.0) / 2.0,
            (dims[1] as f64 - 1.0) / 2.0,
            (dims[2] as f64 - 1.0) / 2.0,
        );
        self.voxel_to_world(&half)
    }

    /// Geometry of a grid with `new_dims` voxels of `new_spacing` that shares
    /// the centre and orientation of this grid (with `dims` voxels).
    pub fn resampled(&self, dims: [usize; 3], new_dims: [usize; 3], new_spacing: Vector3<f64>) -> Self {
        let centre = self.centre(dims);
        let half_extent = Vector3::new(
            (new_dims[0] as f64 - 1.0) / 2.0 * new_spacing.x,
            (new_dims[1] as f64 - 1.0) / 2.0 * new_spacing.y,
            (new_dims[2] as f64 - 1.0) / 2.0 * new_spacing.z,
        );
        let origin = centre - self.direction * half_extent;
        Self::new(origin, new_spacing, self.direction)
    }

    /// Batch transform world points `[N, 3]` to continuous voxel indices `[N, 3]`.
    pub fn world_to_voxel_tensor<B: Backend>(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = points.device();
        let origin = Tensor::<B, 1>::from_floats(
            [self.origin.x as f32, self.origin.y as f32, self.origin.z as f32],
            &device,
        )
        .reshape([1, 3]);
        (points - origin).matmul(self.offset_matrix(&device))
    }

    /// Batch transform continuous voxel indices `[N, 3]` to world points `[N, 3]`.
    pub fn voxel_to_world_tensor<B: Backend>(&self, indices: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = indices.device();
        // P = O + I @ M, M_rc = S_r * D_cr
        let mut m_data = Vec::with_capacity(9);
        for r in 0..3 {
            for c in 0..3 {
                m_data.push((self.spacing[r] * self.direction[(c, r)]) as f32);
            }
        }
        let m = Tensor::<B, 2>::from_data(TensorData::new(m_data, [3, 3]), &device);
        let origin = Tensor::<B, 1>::from_floats(
            [self.origin.x as f32, self.origin.y as f32, self.origin.z as f32],
            &device,
        )
        .reshape([1, 3]);
        indices.matmul(m) + origin
    }

    /// Batch transform world displacements `[N, 3]` to voxel offsets `[N, 3]`.
    pub fn offset_to_voxel_tensor<B: Backend>(&self, offsets: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = offsets.device();
        offsets.matmul(self.offset_matrix(&device))
    }

    // T = (S^-1 * D^-1)^T, so that I = (P - O) @ T
    fn offset_matrix<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let mut t_data = Vec::with_capacity(9);
        for r in 0..3 {
            for c in 0..3 {
                t_data.push((self.inverse_direction[(c, r)] / self.spacing[c]) as f32);
            }
        }
        Tensor::<B, 2>::from_data(TensorData::new(t_data, [3, 3]), device)
    }
}

impl Default for VolumeGeometry {
    fn default() -> Self {
        Self::from_spacing([1.0, 1.0, 1.0])
    }
}

/// Integer voxel indices of a `[nx, ny, nz]` grid as a float tensor `[N, 3]`
/// with columns (x, y, z), in the memory order of a `[Z, Y, X]` tensor.
pub fn voxel_grid<B: Backend>(dims: [usize; 3], device: &B::Device) -> Tensor<B, 2> {
    let [nx, ny, nz] = dims;
    let n = nx * ny * nz;

    let z_range = Tensor::<B, 1, Int>::arange(0..nz as i64, device);
    let y_range = Tensor::<B, 1, Int>::arange(0..ny as i64, device);
    let x_range = Tensor::<B, 1, Int>::arange(0..nx as i64, device);

    let z_grid = z_range.reshape([nz, 1, 1]).repeat(&[1, ny, nx]).reshape([n]).float();
    let y_grid = y_range.reshape([1, ny, 1]).repeat(&[nz, 1, nx]).reshape([n]).float();
    let x_grid = x_range.reshape([1, 1, nx]).repeat(&[nz, ny, 1]).reshape([n]).float();

    Tensor::cat(
        vec![
            x_grid.unsqueeze_dim(1),
            y_grid.unsqueeze_dim(1),
            z_grid.unsqueeze_dim(1),
        ],
        1,
    )
}
