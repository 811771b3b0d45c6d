//! Gaussian smoothing, plain and masked.
//!
//! Both variants use separable 1D convolutions whose kernel width follows the
//! physical spacing of the grid. The masked variant is a normalized
//! convolution `G*(f·m) / G*(m)`: padding voxels (mask 0) neither contribute
//! to nor receive smoothed values.

use std::marker::PhantomData;

use burn::tensor::backend::Backend;
use burn::tensor::ops::ConvOptions;
use burn::tensor::Tensor;
use nalgebra::Vector3;

use crate::image::{ScalarVolume, VectorField};

/// Gaussian smoothing filter for `[Z, Y, X]` tensors.
///
/// Sigmas are standard deviations in mm along (x, y, z).
#[derive(Debug, Clone)]
pub struct GaussianFilter<B: Backend> {
    sigmas: [f64; 3],
    max_kernel_width: usize,
    _b: PhantomData<B>,
}

impl<B: Backend> GaussianFilter<B> {
    /// Isotropic filter with standard deviation `sigma` mm.
    pub fn new(sigma: f64) -> Self {
        Self::with_sigmas([sigma; 3])
    }

    /// Filter with a standard deviation per axis (x, y, z) in mm.
    pub fn with_sigmas(sigmas: [f64; 3]) -> Self {
        Self {
            sigmas,
            max_kernel_width: 32,
            _b: PhantomData,
        }
    }

    /// Set the maximum kernel width (radius * 2 + 1).
    pub fn with_max_kernel_width(mut self, width: usize) -> Self {
        self.max_kernel_width = width.max(1);
        self
    }

    pub fn sigmas(&self) -> [f64; 3] {
        self.sigmas
    }

    pub fn max_kernel_width(&self) -> usize {
        self.max_kernel_width
    }

    /// Radius in voxels of the kernel used along `axis`; 0 when the axis is
    /// left untouched.
    pub fn kernel_radius(&self, axis: usize, spacing: &Vector3<f64>) -> usize {
        self.kernel(axis, spacing).map_or(0, |k| (k.len() - 1) / 2)
    }

    /// True when no axis would be smoothed.
    pub fn is_identity(&self) -> bool {
        self.sigmas.iter().all(|&s| s <= 1e-6)
    }

    /// Convolve with zero boundary conditions.
    pub fn apply_tensor(&self, input: Tensor<B, 3>, spacing: &Vector3<f64>) -> Tensor<B, 3> {
        let mut data = input;
        let device = data.device();
        for axis in 0..3 {
            let Some(kernel) = self.kernel(axis, spacing) else {
                continue;
            };
            let kernel = Tensor::<B, 1>::from_floats(kernel.as_slice(), &device);
            data = convolve_axis(data, kernel, axis);
        }
        data
    }

    /// Normalized convolution restricted to voxels where `mask` is 1.
    ///
    /// Voxels with mask 0 keep their input value.
    pub fn apply_masked(
        &self,
        input: Tensor<B, 3>,
        mask: &Tensor<B, 3>,
        spacing: &Vector3<f64>,
    ) -> Tensor<B, 3> {
        if self.is_identity() {
            return input;
        }
        let numerator = self.apply_tensor(input.clone() * mask.clone(), spacing);
        let denominator = self.apply_tensor(mask.clone(), spacing).clamp_min(1e-12);
        let smoothed = numerator / denominator;
        smoothed * mask.clone() + input * (mask.clone().neg() + 1.0)
    }

    /// Smooth every frame of a volume, ignoring its padding voxels.
    pub fn apply(&self, volume: &ScalarVolume<B>) -> ScalarVolume<B> {
        if self.is_identity() {
            return volume.clone();
        }
        let [_, _, _, nt] = volume.dims();
        let frames: Vec<Tensor<B, 4>> = (0..nt)
            .map(|t| {
                let mask = volume.validity_mask(t);
                self.apply_masked(volume.frame(t), &mask, volume.spacing())
                    .unsqueeze_dim(0)
            })
            .collect();
        let mut output = ScalarVolume::new(Tensor::cat(frames, 0), *volume.geometry());
        output.set_padding(volume.padding());
        output
    }

    /// Smooth each component of a displacement field with the masked operator.
    pub fn apply_field(&self, field: &VectorField<B>, mask: &Tensor<B, 3>) -> VectorField<B> {
        if self.is_identity() {
            return field.clone();
        }
        let spacing = *field.geometry().spacing();
        field.map_components(|component| self.apply_masked(component, mask, &spacing))
    }

    // None when the axis needs no smoothing
    fn kernel(&self, axis: usize, spacing: &Vector3<f64>) -> Option<Vec<f32>> {
        let sigma = self.sigmas[axis];
        if sigma <= 1e-6 {
            return None;
        }
        let voxel_sigma = sigma / spacing[axis];
        let radius = (3.0 * voxel_sigma).ceil() as usize;
        let width = (2 * radius + 1).min(self.max_kernel_width);
        let radius = (width - 1) / 2;
        if radius == 0 {
            return None;
        }
        Some(gaussian_kernel(voxel_sigma, radius))
    }
}

/// Normalized Gaussian kernel of `2 * radius + 1` taps.
pub fn gaussian_kernel(sigma: f64, radius: usize) -> Vec<f32> {
    let two_sigma2 = 2.0 * sigma * sigma;
    let weights: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-x * x / two_sigma2).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| (w / sum) as f32).collect()
}

// Axis 0 = x, 1 = y, 2 = z of a `[Z, Y, X]` tensor.
fn convolve_axis<B: Backend>(input: Tensor<B, 3>, kernel: Tensor<B, 1>, axis: usize) -> Tensor<B, 3> {
    let dim = 2 - axis;
    let moved = if dim == 2 { input } else { input.swap_dims(dim, 2) };
    let [a, b, len] = moved.dims();

    let taps = kernel.dims()[0];
    let options = ConvOptions::new([1], [taps / 2], [1], 1);
    let output = burn::tensor::module::conv1d(
        moved.reshape([a * b, 1, len]),
        kernel.reshape([1, 1, taps]),
        None,
        options,
    )
    .reshape([a, b, len]);

    if dim == 2 {
        output
    } else {
        output.swap_dims(dim, 2)
    }
}
