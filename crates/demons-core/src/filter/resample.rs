//! Resample image filter.
//!
//! Maps every voxel of an output grid through an optional transform into the
//! input volume and interpolates there. Padding voxels of the input never leak
//! into valid output voxels: values are interpolated from valid voxels only
//! and an output voxel is padding when its nearest input voxel is padding or
//! when it falls outside the input grid.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use nalgebra::Vector3;

use crate::image::{voxel_grid, ScalarVolume, VolumeGeometry};
use crate::interpolation::{create_interpolator, sample_masked, InterpolationMode, Interpolator};
use crate::transform::Transform;

/// Resample image filter.
///
/// The transform maps output world points to input world points.
pub struct ResampleImageFilter<'t, B: Backend> {
    dims: [usize; 3],
    geometry: VolumeGeometry,
    transform: Option<&'t dyn Transform<B>>,
    interpolator: Box<dyn Interpolator<B>>,
    default_value: f32,
}

impl<'t, B: Backend> ResampleImageFilter<'t, B> {
    /// Resample onto a grid of `dims` voxels (x, y, z) placed by `geometry`.
    pub fn new(dims: [usize; 3], geometry: VolumeGeometry) -> Self {
        Self {
            dims,
            geometry,
            transform: None,
            interpolator: create_interpolator(InterpolationMode::Linear),
            default_value: 0.0,
        }
    }

    /// Resample onto the grid of `reference`.
    pub fn from_reference(reference: &ScalarVolume<B>) -> Self {
        Self::new(reference.spatial_dims(), *reference.geometry())
    }

    /// Grid with isotropic `resolution` mm spanning the extent of `volume` and
    /// sharing its centre.
    pub fn isotropic(volume: &ScalarVolume<B>, resolution: f64) -> Self {
        Self::with_spacing(volume, Vector3::new(resolution, resolution, resolution))
    }

    /// Grid of voxel size `spacing` spanning the extent of `volume` and
    /// sharing its centre.
    pub fn with_spacing(volume: &ScalarVolume<B>, spacing: Vector3<f64>) -> Self {
        let dims = volume.spatial_dims();
        let mut new_dims = [1usize; 3];
        for axis in 0..3 {
            let extent = (dims[axis] as f64 - 1.0) * volume.spacing()[axis];
            new_dims[axis] = (extent / spacing[axis]).round() as usize + 1;
        }
        let geometry = volume.geometry().resampled(dims, new_dims, spacing);
        Self::new(new_dims, geometry)
    }

    pub fn with_transform(mut self, transform: &'t dyn Transform<B>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_interpolation(mut self, mode: InterpolationMode) -> Self {
        self.interpolator = create_interpolator(mode);
        self
    }

    /// Value for output voxels outside the input when the input has no padding.
    pub fn with_default_value(mut self, value: f32) -> Self {
        self.default_value = value;
        self
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    /// Apply the filter to every frame of `input`.
    pub fn apply(&self, input: &ScalarVolume<B>) -> ScalarVolume<B> {
        let device = input.device();
        let [nx, ny, nz] = self.dims;
        let [_, _, _, nt] = input.dims();

        let indices = self.input_indices(input, &device);

        let frames: Vec<Tensor<B, 4>> = (0..nt)
            .map(|t| {
                let mask = input.padding().map(|_| input.validity_mask(t));
                let (values, valid) =
                    sample_masked(self.interpolator.as_ref(), &input.frame(t), mask.as_ref(), indices.clone());
                let fill = input.padding().unwrap_or(self.default_value);
                let values = values * valid.clone() + (valid.neg() + 1.0) * fill;
                values.reshape([1, nz, ny, nx])
            })
            .collect();

        let mut output = ScalarVolume::new(Tensor::cat(frames, 0), self.geometry);
        output.set_padding(input.padding());
        output
    }

    fn input_indices(&self, input: &ScalarVolume<B>, device: &B::Device) -> Tensor<B, 2> {
        let world = self.geometry.voxel_to_world_tensor(voxel_grid::<B>(self.dims, device));
        let mapped = match self.transform {
            Some(transform) => transform.transform_points(world),
            None => world,
        };
        input.geometry().world_to_voxel_tensor(mapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::FreeFormTransformation3D;
    use burn_ndarray::NdArray;
    use nalgebra::Point3;

    type TestBackend = NdArray<f32>;

    fn line(values: Vec<f32>) -> ScalarVolume<TestBackend> {
        let device = Default::default();
        let n = values.len();
        ScalarVolume::from_values(values, [n, 1, 1, 1], VolumeGeometry::default(), &device)
    }

    #[test]
    fn test_identity_resample() {
        let input = line(vec![1.0, 2.0, 3.0, 4.0]);
        let output = ResampleImageFilter::from_reference(&input).apply(&input);
        assert_eq!(output.to_values(), input.to_values());
    }

    #[test]
    fn test_translation_through_transform() {
        let input = line(vec![0.0, 10.0, 20.0, 30.0]);
        // output point p samples input at p + 1
        let mut ffd = FreeFormTransformation3D::over_volume(&VolumeGeometry::default(), [4, 1, 1], 1.0);
        for i in 0..4 {
            ffd.put(i, 0, 0, Vector3::new(1.0, 0.0, 0.0));
        }
        let output = ResampleImageFilter::from_reference(&input)
            .with_transform(&ffd)
            .with_default_value(-1.0)
            .apply(&input);
        assert_eq!(output.to_values(), vec![10.0, 20.0, 30.0, -1.0]);
        assert!((ffd.displacement_at(&Point3::new(2.5, 0.0, 0.0)).x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_padding_is_preserved() {
        // padding at x = 0, valid ramp elsewhere
        let input = line(vec![-1.0, 10.0, 20.0, 30.0]).with_padding(0.0);
        let geometry = VolumeGeometry::from_spacing([0.5, 1.0, 1.0]);
        let output = ResampleImageFilter::new([7, 1, 1], geometry).apply(&input);
        let values = output.to_values();
        // x = 0.0 is the padding voxel
        assert_eq!(values[0], 0.0);
        // x = 1.0 is exactly voxel 1
        assert!((values[2] - 10.0).abs() < 1e-5);
        // x = 1.5 blends voxels 1 and 2 only
        assert!((values[3] - 15.0).abs() < 1e-4);
        assert_eq!(output.padding(), Some(0.0));
    }

    #[test]
    fn test_isotropic_grid() {
        let device = Default::default();
        let input = ScalarVolume::<TestBackend>::zeros(
            [5, 5, 3, 1],
            VolumeGeometry::from_spacing([1.0, 1.0, 2.0]),
            &device,
        );
        let filter = ResampleImageFilter::isotropic(&input, 2.0);
        assert_eq!(filter.dims(), [3, 3, 3]);
    }
}
