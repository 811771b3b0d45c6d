//! Validation of parameters and inputs, and convergence tests.

use burn::tensor::backend::Backend;
use burn::tensor::ElementConversion;
use demons_core::ScalarVolume;
use tracing::warn;

use crate::error::{RegistrationError, Result};
use crate::params::RegistrationParameters;

/// Check that parameters are usable for a run.
pub fn validate_parameters(params: &RegistrationParameters) -> Result<()> {
    if params.number_of_levels == 0 {
        return Err(RegistrationError::invalid_configuration(
            "Number of resolution levels must be positive",
        ));
    }
    validate_iterations(params.number_of_iterations)?;
    if !(params.reduction_factor > 1.0) {
        return Err(RegistrationError::invalid_configuration(format!(
            "Reduction factor must exceed 1, got {}",
            params.reduction_factor
        )));
    }
    if !(params.step_size > 0.0) {
        return Err(RegistrationError::invalid_configuration(format!(
            "Step size must be positive, got {}",
            params.step_size
        )));
    }
    for (name, value) in [
        ("Epsilon", params.epsilon),
        ("Smoothing", params.smoothing),
        ("Update smoothing", params.update_smoothing),
        ("Control point spacing", params.control_point_spacing),
        ("Target blurring", params.target_blurring),
        ("Source blurring", params.source_blurring),
        ("Target resolution", params.target_resolution),
        ("Source resolution", params.source_resolution),
    ] {
        validate_non_negative(name, value)?;
    }
    Ok(())
}

/// Validate iteration count.
pub fn validate_iterations(iterations: usize) -> Result<()> {
    if iterations == 0 {
        return Err(RegistrationError::invalid_configuration(
            "Iterations must be positive",
        ));
    }
    if iterations > 1_000_000 {
        return Err(RegistrationError::invalid_configuration(format!(
            "Iterations too large: {}",
            iterations
        )));
    }
    Ok(())
}

fn validate_non_negative(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(RegistrationError::invalid_configuration(format!(
            "{} must be finite and non-negative, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Check a single volume for non-finite intensities.
pub fn validate_volume<B: Backend>(volume: &ScalarVolume<B>, name: &str) -> Result<()> {
    let data = volume.data().clone();
    let nan = data.clone().is_nan().int().sum().into_scalar().elem::<i64>();
    let inf = data.is_inf().int().sum().into_scalar().elem::<i64>();
    if nan > 0 || inf > 0 {
        return Err(RegistrationError::image_validation(format!(
            "{} image holds {} NaN and {} infinite voxel(s)",
            name, nan, inf
        )));
    }
    Ok(())
}

/// Check a target/source pair.
///
/// Only the first frame takes part in the registration; extra frames are
/// reported with a warning.
pub fn validate_inputs<B: Backend>(target: &ScalarVolume<B>, source: &ScalarVolume<B>) -> Result<()> {
    validate_volume(target, "Target")?;
    validate_volume(source, "Source")?;
    let (target_frames, source_frames) = (target.dims()[3], source.dims()[3]);
    if target_frames != source_frames {
        return Err(RegistrationError::dimension_mismatch(format!(
            "target has {} frame(s), source has {}",
            target_frames, source_frames
        )));
    }
    if target_frames > 1 {
        warn!("Registering the first of {} frames only", target_frames);
    }
    Ok(())
}

/// Convergence tests of a pyramid level.
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceChecker {
    /// Threshold (mm) on the largest update and on the lattice change.
    pub epsilon: f64,
}

impl ConvergenceChecker {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    /// The largest update of an iteration fell below the threshold.
    pub fn update_converged(&self, max_update: f64) -> bool {
        max_update < self.epsilon
    }

    /// The largest control-point change between consecutive fits fell below
    /// the threshold.
    pub fn fit_converged(&self, max_change: f64) -> bool {
        max_change < self.epsilon
    }
}
