//! Dense displacement field.
//!
//! A `VectorField` holds the x, y and z components of a displacement (in mm,
//! world axes) for every voxel of a reference grid.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};
use nalgebra::Matrix3;

use super::geometry::{voxel_grid, VolumeGeometry};
use crate::interpolation::{Interpolator, LinearInterpolator};

/// Three co-registered `[Z, Y, X]` component tensors on one voxel grid.
#[derive(Debug, Clone)]
pub struct VectorField<B: Backend> {
    x: Tensor<B, 3>,
    y: Tensor<B, 3>,
    z: Tensor<B, 3>,
    geometry: VolumeGeometry,
}

impl<B: Backend> VectorField<B> {
    /// # Panics
    /// Panics if the components do not share identical dimensions.
    pub fn new(x: Tensor<B, 3>, y: Tensor<B, 3>, z: Tensor<B, 3>, geometry: VolumeGeometry) -> Self {
        assert!(
            x.dims() == y.dims() && y.dims() == z.dims(),
            "field components must share dimensions: {:?} {:?} {:?}",
            x.dims(),
            y.dims(),
            z.dims()
        );
        Self { x, y, z, geometry }
    }

    /// Zero displacement over a grid of `[nx, ny, nz]` voxels.
    pub fn zeros(dims: [usize; 3], geometry: VolumeGeometry, device: &B::Device) -> Self {
        let [nx, ny, nz] = dims;
        let zero = Tensor::<B, 3>::zeros([nz, ny, nx], device);
        Self::new(zero.clone(), zero.clone(), zero, geometry)
    }

    /// Field from per-voxel offsets `[N, 3]` in memory order of the grid.
    pub fn from_flat(offsets: Tensor<B, 2>, dims: [usize; 3], geometry: VolumeGeometry) -> Self {
        let [nx, ny, nz] = dims;
        let component = |c: usize| offsets.clone().narrow(1, c, 1).reshape([nz, ny, nx]);
        Self::new(component(0), component(1), component(2), geometry)
    }

    /// Dimensions `[nx, ny, nz]`.
    pub fn dims(&self) -> [usize; 3] {
        let [nz, ny, nx] = self.x.dims();
        [nx, ny, nz]
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn device(&self) -> B::Device {
        self.x.device()
    }

    pub fn x(&self) -> &Tensor<B, 3> {
        &self.x
    }

    pub fn y(&self) -> &Tensor<B, 3> {
        &self.y
    }

    pub fn z(&self) -> &Tensor<B, 3> {
        &self.z
    }

    pub fn components(&self) -> [&Tensor<B, 3>; 3] {
        [&self.x, &self.y, &self.z]
    }

    pub fn into_components(self) -> [Tensor<B, 3>; 3] {
        [self.x, self.y, self.z]
    }

    /// Apply `f` to every component.
    pub fn map_components<F>(&self, mut f: F) -> Self
    where
        F: FnMut(Tensor<B, 3>) -> Tensor<B, 3>,
    {
        Self::new(f(self.x.clone()), f(self.y.clone()), f(self.z.clone()), self.geometry)
    }

    /// Component-wise sum.
    pub fn add(&self, other: &Self) -> Self {
        assert_eq!(self.dims(), other.dims(), "cannot add fields of different dimensions");
        Self::new(
            self.x.clone() + other.x.clone(),
            self.y.clone() + other.y.clone(),
            self.z.clone() + other.z.clone(),
            self.geometry,
        )
    }

    pub fn scale(&self, factor: f32) -> Self {
        self.map_components(|c| c * factor)
    }

    /// Multiply every component by a `[Z, Y, X]` mask.
    pub fn masked(&self, mask: &Tensor<B, 3>) -> Self {
        self.map_components(|c| c * mask.clone())
    }

    /// Express each vector in another frame: `v' = m * v`.
    pub fn rotate(&self, m: &Matrix3<f64>) -> Self {
        let row = |r: usize| {
            self.x.clone() * m[(r, 0)] as f32 + self.y.clone() * m[(r, 1)] as f32 + self.z.clone() * m[(r, 2)] as f32
        };
        Self::new(row(0), row(1), row(2), self.geometry)
    }

    /// Euclidean length per voxel.
    pub fn magnitude(&self) -> Tensor<B, 3> {
        (self.x.clone().powf_scalar(2.0) + self.y.clone().powf_scalar(2.0) + self.z.clone().powf_scalar(2.0)).sqrt()
    }

    /// Largest vector length, optionally restricted to voxels where `mask` is 1.
    pub fn max_magnitude(&self, mask: Option<&Tensor<B, 3>>) -> f32 {
        let magnitude = match mask {
            Some(mask) => self.magnitude() * mask.clone(),
            None => self.magnitude(),
        };
        magnitude.max().into_scalar().elem::<f32>()
    }

    /// Offsets `[N, 3]` in memory order of the grid, columns (x, y, z).
    pub fn to_flat(&self) -> Tensor<B, 2> {
        let n = self.x.dims().iter().product::<usize>();
        Tensor::cat(
            vec![
                self.x.clone().reshape([n, 1]),
                self.y.clone().reshape([n, 1]),
                self.z.clone().reshape([n, 1]),
            ],
            1,
        )
    }

    /// Sample the field at continuous voxel indices `[N, 3]` of its own grid.
    ///
    /// Returns displacements `[N, 3]`.
    pub fn sample(&self, interpolator: &dyn Interpolator<B>, indices: Tensor<B, 2>) -> Tensor<B, 2> {
        let n = indices.dims()[0];
        let columns: Vec<Tensor<B, 2>> = self
            .components()
            .into_iter()
            .map(|c| interpolator.interpolate(c, indices.clone()).reshape([n, 1]))
            .collect();
        Tensor::cat(columns, 1)
    }

    /// Resample onto another grid with trilinear interpolation.
    ///
    /// Used to carry a field from a coarse pyramid level to a finer one; the
    /// displacement values (mm) are unchanged, points outside this grid take
    /// the nearest border value.
    pub fn resample_to(&self, geometry: &VolumeGeometry, dims: [usize; 3]) -> Self {
        let device = self.device();
        let world = geometry.voxel_to_world_tensor(voxel_grid::<B>(dims, &device));
        let indices = self.geometry.world_to_voxel_tensor(world);
        let offsets = self.sample(&LinearInterpolator::new(), indices);
        Self::from_flat(offsets, dims, *geometry)
    }

    /// One component as values, x fastest.
    pub fn component_values(&self, axis: usize) -> Vec<f32> {
        self.components()[axis].clone().into_data().iter::<f32>().collect()
    }
}
