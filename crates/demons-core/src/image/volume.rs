//! Scalar volume with physical metadata.
//!
//! This module provides `ScalarVolume`, the image type consumed by every
//! stage of the registration. It stores a 4D tensor `[T, Z, Y, X]` on the
//! chosen burn backend together with the geometry of the spatial grid and an
//! optional padding threshold.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor, TensorData};
use nalgebra::{Point3, Vector3};

use super::geometry::{voxel_grid, VolumeGeometry};

/// Volumetric scalar image.
///
/// # Coordinate Systems
/// * **Index Space**: voxel indices (x, y, z, t); x varies fastest in memory
/// * **Physical Space**: world coordinates in mm, see [`VolumeGeometry`]
///
/// A voxel whose intensity is less than or equal to the padding value is a
/// padding voxel and carries no image information.
#[derive(Debug, Clone)]
pub struct ScalarVolume<B: Backend> {
    /// Voxel data `[T, Z, Y, X]`.
    data: Tensor<B, 4>,
    geometry: VolumeGeometry,
    padding: Option<f32>,
}

impl<B: Backend> ScalarVolume<B> {
    /// Create a volume from a `[T, Z, Y, X]` tensor.
    ///
    /// # Panics
    /// Panics if any dimension of `data` is zero.
    pub fn new(data: Tensor<B, 4>, geometry: VolumeGeometry) -> Self {
        assert!(
            data.dims().iter().all(|&d| d > 0),
            "volume dimensions must be positive, got {:?}",
            data.dims()
        );
        Self {
            data,
            geometry,
            padding: None,
        }
    }

    /// Create a single-frame volume from a `[Z, Y, X]` tensor.
    pub fn from_frame(frame: Tensor<B, 3>, geometry: VolumeGeometry) -> Self {
        Self::new(frame.unsqueeze_dim(0), geometry)
    }

    /// Create a volume from voxel values ordered with x fastest, then y, z and t.
    ///
    /// # Arguments
    /// * `values` - `nx * ny * nz * nt` intensities
    /// * `dims` - `[nx, ny, nz, nt]`
    /// * `geometry` - spatial geometry of the grid
    /// * `device` - device holding the tensor
    pub fn from_values(
        values: Vec<f32>,
        dims: [usize; 4],
        geometry: VolumeGeometry,
        device: &B::Device,
    ) -> Self {
        let [nx, ny, nz, nt] = dims;
        assert_eq!(
            values.len(),
            nx * ny * nz * nt,
            "value count does not match dimensions {:?}",
            dims
        );
        let data = Tensor::<B, 4>::from_data(TensorData::new(values, [nt, nz, ny, nx]), device);
        Self::new(data, geometry)
    }

    /// Volume of zeros.
    pub fn zeros(dims: [usize; 4], geometry: VolumeGeometry, device: &B::Device) -> Self {
        let [nx, ny, nz, nt] = dims;
        Self::new(Tensor::zeros([nt, nz, ny, nx], device), geometry)
    }

    /// Set the padding threshold.
    pub fn with_padding(mut self, padding: f32) -> Self {
        self.padding = Some(padding);
        self
    }

    pub fn set_padding(&mut self, padding: Option<f32>) {
        self.padding = padding;
    }

    pub fn padding(&self) -> Option<f32> {
        self.padding
    }

    /// Voxel data `[T, Z, Y, X]`.
    pub fn data(&self) -> &Tensor<B, 4> {
        &self.data
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn spacing(&self) -> &Vector3<f64> {
        self.geometry.spacing()
    }

    pub fn device(&self) -> B::Device {
        self.data.device()
    }

    /// Dimensions `[nx, ny, nz, nt]`.
    pub fn dims(&self) -> [usize; 4] {
        let [nt, nz, ny, nx] = self.data.dims();
        [nx, ny, nz, nt]
    }

    /// Spatial dimensions `[nx, ny, nz]`.
    pub fn spatial_dims(&self) -> [usize; 3] {
        let [nx, ny, nz, _] = self.dims();
        [nx, ny, nz]
    }

    pub fn number_of_voxels(&self) -> usize {
        self.dims().iter().product()
    }

    /// One time frame as a `[Z, Y, X]` tensor.
    ///
    /// # Panics
    /// Panics if `t` is out of range.
    pub fn frame(&self, t: usize) -> Tensor<B, 3> {
        let [nx, ny, nz, nt] = self.dims();
        assert!(t < nt, "frame {} out of range (volume has {} frames)", t, nt);
        self.data.clone().narrow(0, t, 1).reshape([nz, ny, nx])
    }

    /// Intensity of a single voxel.
    pub fn get(&self, x: usize, y: usize, z: usize, t: usize) -> f32 {
        let [nx, ny, nz, nt] = self.dims();
        assert!(
            x < nx && y < ny && z < nz && t < nt,
            "voxel ({}, {}, {}, {}) outside volume {:?}",
            x,
            y,
            z,
            t,
            self.dims()
        );
        self.data
            .clone()
            .slice([t..t + 1, z..z + 1, y..y + 1, x..x + 1])
            .into_scalar()
            .elem::<f32>()
    }

    /// All intensities, x fastest.
    pub fn to_values(&self) -> Vec<f32> {
        self.data.clone().into_data().iter::<f32>().collect()
    }

    /// A volume with the same geometry and padding holding `values`.
    pub fn with_values(&self, values: Vec<f32>) -> Self {
        let device = self.device();
        let mut volume = Self::from_values(values, self.dims(), self.geometry, &device);
        volume.padding = self.padding;
        volume
    }

    /// A single-frame volume with the same geometry and padding holding `frame`.
    pub fn with_frame(&self, frame: Tensor<B, 3>) -> Self {
        let mut volume = Self::from_frame(frame, self.geometry);
        volume.padding = self.padding;
        volume
    }

    /// A volume with the same geometry and padding whose data is `f(data)`.
    pub fn map_data<F>(&self, f: F) -> Self
    where
        F: FnOnce(Tensor<B, 4>) -> Tensor<B, 4>,
    {
        let data = f(self.data.clone());
        assert_eq!(data.dims(), self.data.dims(), "mapping must keep the volume shape");
        Self {
            data,
            geometry: self.geometry,
            padding: self.padding,
        }
    }

    /// Validity mask of frame `t` as floats `[Z, Y, X]` (1 = image, 0 = padding).
    ///
    /// Without a padding value every voxel is valid.
    pub fn validity_mask(&self, t: usize) -> Tensor<B, 3> {
        let frame = self.frame(t);
        match self.padding {
            Some(padding) => frame.greater_elem(padding).float(),
            None => frame.ones_like(),
        }
    }

    /// Minimum and maximum intensity over all frames.
    pub fn intensity_range(&self) -> (f32, f32) {
        let min = self.data.clone().min().into_scalar().elem::<f32>();
        let max = self.data.clone().max().into_scalar().elem::<f32>();
        (min, max)
    }

    /// World coordinates of voxel `(x, y, z)`.
    pub fn voxel_to_world(&self, x: f64, y: f64, z: f64) -> Point3<f64> {
        self.geometry.voxel_to_world(&Point3::new(x, y, z))
    }

    /// Integer voxel indices of the spatial grid `[N, 3]` in memory order.
    pub fn voxel_grid(&self) -> Tensor<B, 2> {
        voxel_grid(self.spatial_dims(), &self.device())
    }
}
