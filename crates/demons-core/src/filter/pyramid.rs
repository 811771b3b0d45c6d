//! Multi-resolution pyramid.
//!
//! Level 0 is the input at its own resolution; level `i` is the input blurred
//! with `blurring * factor^i` mm and resampled to `spacing * factor^i`,
//! keeping the centre of the volume fixed. Levels are ordered from fine to
//! coarse. An axis of a single voxel (a 2D image) is neither blurred nor
//! reduced.

use burn::tensor::backend::Backend;
use nalgebra::Vector3;
use tracing::{debug, warn};

use super::gaussian::GaussianFilter;
use super::resample::ResampleImageFilter;
use crate::image::ScalarVolume;
use crate::interpolation::InterpolationMode;

/// Builds the pyramid of a single volume.
#[derive(Debug, Clone, Copy)]
pub struct PyramidBuilder {
    levels: usize,
    reduction_factor: f64,
    blurring: f64,
    interpolation: InterpolationMode,
}

impl PyramidBuilder {
    /// # Panics
    /// Panics if `reduction_factor` is not greater than one.
    pub fn new(levels: usize, reduction_factor: f64) -> Self {
        assert!(reduction_factor > 1.0, "reduction factor must exceed 1, got {}", reduction_factor);
        Self {
            levels,
            reduction_factor,
            blurring: 0.0,
            interpolation: InterpolationMode::Linear,
        }
    }

    /// Gaussian blurring (mm) of level 0.
    pub fn with_blurring(mut self, blurring: f64) -> Self {
        self.blurring = blurring;
        self
    }

    pub fn with_interpolation(mut self, mode: InterpolationMode) -> Self {
        self.interpolation = mode;
        self
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    /// Voxel counts of `level` for an input of `dims`, or `None` when an axis
    /// would shrink below one voxel.
    pub fn level_dims(&self, dims: [usize; 3], level: usize) -> Option<[usize; 3]> {
        let scale = self.reduction_factor.powi(level as i32);
        let mut out = [1usize; 3];
        for axis in 0..3 {
            if dims[axis] <= 1 {
                continue;
            }
            let n = (dims[axis] as f64 / scale).round();
            if n < 1.0 {
                return None;
            }
            out[axis] = n as usize;
        }
        Some(out)
    }

    /// Voxel size of `level` for an input of `dims` and `spacing`.
    pub fn level_spacing(&self, dims: [usize; 3], spacing: &Vector3<f64>, level: usize) -> Vector3<f64> {
        let scale = self.reduction_factor.powi(level as i32);
        let mut out = *spacing;
        for axis in 0..3 {
            if dims[axis] > 1 {
                out[axis] *= scale;
            }
        }
        out
    }

    /// Smoothing applied to the input before it is reduced to `level`.
    ///
    /// The kernel spans three standard deviations however coarse the level.
    pub fn level_filter<B: Backend>(
        &self,
        dims: [usize; 3],
        spacing: &Vector3<f64>,
        level: usize,
    ) -> GaussianFilter<B> {
        let sigma = self.blurring * self.reduction_factor.powi(level as i32);
        let mut sigmas = [0.0; 3];
        let mut width = 1;
        for axis in 0..3 {
            if dims[axis] <= 1 {
                continue;
            }
            sigmas[axis] = sigma;
            let radius = (3.0 * sigma / spacing[axis]).ceil() as usize;
            width = width.max(2 * radius + 1);
        }
        GaussianFilter::with_sigmas(sigmas).with_max_kernel_width(width)
    }

    /// Build up to `levels` volumes, finest first.
    ///
    /// Stops early, with a warning, at the first level that would be
    /// degenerate.
    pub fn build<B: Backend>(&self, input: &ScalarVolume<B>) -> Vec<ScalarVolume<B>> {
        let dims = input.spatial_dims();
        let mut pyramid = Vec::with_capacity(self.levels);
        for level in 0..self.levels {
            let Some(level_dims) = self.level_dims(dims, level) else {
                warn!(
                    "Pyramid level {} of a {:?} volume would be empty, using {} level(s)",
                    level,
                    dims,
                    pyramid.len()
                );
                break;
            };
            let blurred = self.level_filter(dims, input.spacing(), level).apply(input);
            if level == 0 {
                pyramid.push(blurred);
                continue;
            }
            let spacing = self.level_spacing(dims, input.spacing(), level);
            let geometry = input.geometry().resampled(dims, level_dims, spacing);
            debug!("Pyramid level {}: {:?} voxels of {:?} mm", level, level_dims, spacing.as_slice());
            pyramid.push(
                ResampleImageFilter::new(level_dims, geometry)
                    .with_interpolation(self.interpolation)
                    .apply(&blurred),
            );
        }
        pyramid
    }
}

/// Paired target and source pyramids with a common number of levels.
#[derive(Debug, Clone)]
pub struct ImagePyramid<B: Backend> {
    target: Vec<ScalarVolume<B>>,
    source: Vec<ScalarVolume<B>>,
}

impl<B: Backend> ImagePyramid<B> {
    /// Build both pyramids and keep the levels they have in common.
    pub fn build(
        target: &ScalarVolume<B>,
        target_builder: &PyramidBuilder,
        source: &ScalarVolume<B>,
        source_builder: &PyramidBuilder,
    ) -> Self {
        let mut target = target_builder.build(target);
        let mut source = source_builder.build(source);
        let levels = target.len().min(source.len());
        target.truncate(levels);
        source.truncate(levels);
        Self { target, source }
    }

    /// Achieved number of levels.
    pub fn levels(&self) -> usize {
        self.target.len()
    }

    /// Target and source of `level` (0 = finest).
    pub fn level(&self, level: usize) -> (&ScalarVolume<B>, &ScalarVolume<B>) {
        (&self.target[level], &self.source[level])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::VolumeGeometry;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_level_dims() {
        let builder = PyramidBuilder::new(4, 2.0);
        assert_eq!(builder.level_dims([16, 8, 4], 0), Some([16, 8, 4]));
        assert_eq!(builder.level_dims([16, 8, 4], 2), Some([4, 2, 1]));
        assert_eq!(builder.level_dims([16, 8, 4], 4), None);
        assert_eq!(builder.level_dims([32, 32, 1], 3), Some([4, 4, 1]));
    }

    #[test]
    fn test_single_slice_keeps_its_thickness() {
        let device = Default::default();
        let volume = ScalarVolume::<TestBackend>::zeros(
            [32, 32, 1, 1],
            VolumeGeometry::from_spacing([1.0, 1.0, 5.0]),
            &device,
        );
        let pyramid = PyramidBuilder::new(4, 2.0).with_blurring(0.5).build(&volume);
        assert_eq!(pyramid.len(), 4);
        assert_eq!(pyramid[3].spatial_dims(), [4, 4, 1]);
        assert_eq!(pyramid[3].spacing().x, 8.0);
        assert_eq!(pyramid[3].spacing().z, 5.0);
        assert_eq!(pyramid[3].geometry().origin().z, 0.0);
    }

    #[test]
    fn test_coarse_level_kernel_is_not_truncated() {
        let builder = PyramidBuilder::new(5, 2.0).with_blurring(2.0);
        let spacing = Vector3::new(1.0, 1.0, 1.0);
        // sigma 32 mm at level 4
        let filter = builder.level_filter::<TestBackend>([128, 128, 1], &spacing, 4);
        assert_eq!(filter.sigmas(), [32.0, 32.0, 0.0]);
        assert_eq!(filter.max_kernel_width(), 193);
        assert_eq!(filter.kernel_radius(0, &spacing), 96);
        assert_eq!(filter.kernel_radius(2, &spacing), 0);
    }

    #[test]
    fn test_pyramid_stops_at_degenerate_level() {
        let device = Default::default();
        let volume = ScalarVolume::<TestBackend>::zeros([8, 8, 2, 1], VolumeGeometry::default(), &device);
        let pyramid = PyramidBuilder::new(5, 2.0).with_blurring(1.0).build(&volume);
        // 2 -> 1 -> 0.5 rounds to 1 at level 2, 0.25 at level 3
        assert_eq!(pyramid.len(), 3);
        assert_eq!(pyramid[0].dims(), [8, 8, 2, 1]);
        assert_eq!(pyramid[1].spacing().x, 2.0);
        assert_eq!(pyramid[2].spacing().x, 4.0);
    }
}
