//! Registration parameters and their line-oriented text format.
//!
//! Each parameter is stored as `Key = Value` on its own line. Empty lines and
//! lines starting with `#` are skipped when reading; keys that are not
//! recognised are ignored with a warning.

use std::fmt;
use std::io::{BufRead, Write};
use std::str::FromStr;

use demons_core::utils::MIN_GREY;
use demons_core::InterpolationMode;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RegistrationError, Result};

/// How a per-iteration update is merged into the displacement field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DemonsMode {
    /// Target-gradient force, update added to the field.
    #[default]
    Additive,
    /// Warped-source-gradient force, update composed with the field.
    Compositive,
    /// Mean of target- and source-gradient forces, composed.
    Symmetric,
}

impl fmt::Display for DemonsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DemonsMode::Additive => "Additive",
            DemonsMode::Compositive => "Compositive",
            DemonsMode::Symmetric => "Symmetric",
        };
        f.write_str(name)
    }
}

impl FromStr for DemonsMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "Additive" => Ok(DemonsMode::Additive),
            "Compositive" => Ok(DemonsMode::Compositive),
            "Symmetric" => Ok(DemonsMode::Symmetric),
            other => Err(format!("unknown demons mode '{}'", other)),
        }
    }
}

/// Parameters of a demons registration.
///
/// Distances are in mm. A blurring or resolution of 0 means "not set" and a
/// padding value of [`MIN_GREY`] means "no padding".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationParameters {
    pub target_blurring: f64,
    pub target_resolution: f64,
    pub target_padding: i32,
    pub source_blurring: f64,
    pub source_resolution: f64,
    pub source_padding: i32,
    pub number_of_levels: usize,
    /// Maximum iterations per level.
    pub number_of_iterations: usize,
    pub reduction_factor: f64,
    pub step_size: f64,
    /// Convergence threshold on the largest update (mm).
    pub epsilon: f64,
    /// Gaussian sigma applied to the global field after every update.
    pub smoothing: f64,
    /// Gaussian sigma applied to each update before it is merged; 0 disables it.
    pub update_smoothing: f64,
    /// Control point spacing of the fitted lattice; 0 uses the target voxel size.
    pub control_point_spacing: f64,
    /// Fit the lattice every this many iterations; 0 fits only at the end of a level.
    pub fit_interval: usize,
    pub interpolation_mode: InterpolationMode,
    pub mode: DemonsMode,
}

impl Default for RegistrationParameters {
    fn default() -> Self {
        Self {
            target_blurring: 0.0,
            target_resolution: 0.0,
            target_padding: MIN_GREY,
            source_blurring: 0.0,
            source_resolution: 0.0,
            source_padding: MIN_GREY,
            number_of_levels: 3,
            number_of_iterations: 40,
            reduction_factor: 2.0,
            step_size: 1.0,
            epsilon: 0.001,
            smoothing: 1.0,
            update_smoothing: 0.0,
            control_point_spacing: 0.0,
            fit_interval: 0,
            interpolation_mode: InterpolationMode::Linear,
            mode: DemonsMode::Additive,
        }
    }
}

impl RegistrationParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_levels(mut self, levels: usize) -> Self {
        self.number_of_levels = levels;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.number_of_iterations = iterations;
        self
    }

    pub fn with_reduction_factor(mut self, factor: f64) -> Self {
        self.reduction_factor = factor;
        self
    }

    pub fn with_step_size(mut self, step: f64) -> Self {
        self.step_size = step;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_smoothing(mut self, sigma: f64) -> Self {
        self.smoothing = sigma;
        self
    }

    pub fn with_update_smoothing(mut self, sigma: f64) -> Self {
        self.update_smoothing = sigma;
        self
    }

    pub fn with_control_point_spacing(mut self, spacing: f64) -> Self {
        self.control_point_spacing = spacing;
        self
    }

    pub fn with_fit_interval(mut self, interval: usize) -> Self {
        self.fit_interval = interval;
        self
    }

    pub fn with_interpolation(mut self, mode: InterpolationMode) -> Self {
        self.interpolation_mode = mode;
        self
    }

    pub fn with_mode(mut self, mode: DemonsMode) -> Self {
        self.mode = mode;
        self
    }

    /// Blurring of both images.
    pub fn with_blurring(mut self, target: f64, source: f64) -> Self {
        self.target_blurring = target;
        self.source_blurring = source;
        self
    }

    /// Resampled resolution of both images.
    pub fn with_resolution(mut self, target: f64, source: f64) -> Self {
        self.target_resolution = target;
        self.source_resolution = source;
        self
    }

    /// Padding values of both images.
    pub fn with_padding(mut self, target: i32, source: i32) -> Self {
        self.target_padding = target;
        self.source_padding = source;
        self
    }

    /// Check that every value is usable for a run.
    pub fn validate(&self) -> Result<()> {
        crate::validation::validate_parameters(self)
    }
}

const TARGET_BLURRING: &str = "Target blurring (in mm)";
const TARGET_RESOLUTION: &str = "Target resolution (in mm)";
const TARGET_PADDING: &str = "Target padding value";
const SOURCE_BLURRING: &str = "Source blurring (in mm)";
const SOURCE_RESOLUTION: &str = "Source resolution (in mm)";
const SOURCE_PADDING: &str = "Source padding value";
const LEVELS: &str = "No. of resolution levels";
const ITERATIONS: &str = "No. of iterations";
const REDUCTION: &str = "Reduction factor";
const STEP: &str = "Step size";
const EPSILON: &str = "Epsilon";
const SMOOTHING: &str = "Smoothing (in mm)";
const UPDATE_SMOOTHING: &str = "Update smoothing (in mm)";
const CONTROL_POINT_SPACING: &str = "Control point spacing (in mm)";
const FIT_INTERVAL: &str = "Fit interval";
const INTERPOLATION: &str = "Interpolation mode";
const MODE: &str = "Demons mode";

/// Write every parameter as a `Key = Value` line.
pub fn serialize_parameters<W: Write>(writer: &mut W, params: &RegistrationParameters) -> Result<()> {
    let mut line = |key: &str, value: &dyn fmt::Display| writeln!(writer, "{:<34}= {}", key, value);

    line(TARGET_BLURRING, &params.target_blurring)?;
    line(TARGET_RESOLUTION, &params.target_resolution)?;
    line(TARGET_PADDING, &params.target_padding)?;
    line(SOURCE_BLURRING, &params.source_blurring)?;
    line(SOURCE_RESOLUTION, &params.source_resolution)?;
    line(SOURCE_PADDING, &params.source_padding)?;
    line(LEVELS, &params.number_of_levels)?;
    line(ITERATIONS, &params.number_of_iterations)?;
    line(REDUCTION, &params.reduction_factor)?;
    line(STEP, &params.step_size)?;
    line(EPSILON, &params.epsilon)?;
    line(SMOOTHING, &params.smoothing)?;
    line(UPDATE_SMOOTHING, &params.update_smoothing)?;
    line(CONTROL_POINT_SPACING, &params.control_point_spacing)?;
    line(FIT_INTERVAL, &params.fit_interval)?;
    line(INTERPOLATION, &params.interpolation_mode)?;
    line(MODE, &params.mode)?;
    Ok(())
}

/// Read `Key = Value` lines into `params`.
///
/// Parameters missing from the input keep their current value.
///
/// # Errors
/// `ParameterSyntax` for a line without `=`, `InvalidParameterValue` for a
/// known key whose value does not parse.
pub fn deserialize_parameters<R: BufRead>(reader: R, params: &mut RegistrationParameters) -> Result<()> {
    for entry in ParameterLines::new(reader) {
        let (key, value) = entry?;
        apply_parameter(params, &key, &value)?;
    }
    Ok(())
}

/// Set the parameter named `key` from its text `value`.
///
/// # Returns
/// Whether the key was recognised.
pub fn apply_parameter(params: &mut RegistrationParameters, key: &str, value: &str) -> Result<bool> {
    match key {
        TARGET_BLURRING => params.target_blurring = parse(key, value)?,
        TARGET_RESOLUTION => params.target_resolution = parse(key, value)?,
        TARGET_PADDING => params.target_padding = parse(key, value)?,
        SOURCE_BLURRING => params.source_blurring = parse(key, value)?,
        SOURCE_RESOLUTION => params.source_resolution = parse(key, value)?,
        SOURCE_PADDING => params.source_padding = parse(key, value)?,
        LEVELS => params.number_of_levels = parse(key, value)?,
        ITERATIONS => params.number_of_iterations = parse(key, value)?,
        REDUCTION => params.reduction_factor = parse(key, value)?,
        STEP => params.step_size = parse(key, value)?,
        EPSILON => params.epsilon = parse(key, value)?,
        SMOOTHING => params.smoothing = parse(key, value)?,
        UPDATE_SMOOTHING => params.update_smoothing = parse(key, value)?,
        CONTROL_POINT_SPACING => params.control_point_spacing = parse(key, value)?,
        FIT_INTERVAL => params.fit_interval = parse(key, value)?,
        INTERPOLATION => params.interpolation_mode = parse(key, value)?,
        MODE => params.mode = parse(key, value)?,
        _ => {
            warn!("Ignoring unknown parameter '{}'", key);
            return Ok(false);
        }
    }
    Ok(true)
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| RegistrationError::invalid_value(key, value))
}

/// Iterator over the `(key, value)` pairs of a parameter text.
///
/// Keys and values are trimmed; comment and blank lines are skipped.
pub struct ParameterLines<R> {
    lines: std::io::Lines<R>,
    line_number: usize,
}

impl<R: BufRead> ParameterLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }
}

impl<R: BufRead> Iterator for ParameterLines<R> {
    type Item = Result<(String, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_number += 1;

            let text = line.trim_end_matches('\r');
            if text.trim().is_empty() || text.trim_start().starts_with('#') {
                continue;
            }
            return Some(match text.split_once('=') {
                Some((key, value)) => Ok((key.trim().to_string(), value.trim().to_string())),
                None => Err(RegistrationError::parameter_syntax(self.line_number, text)),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_mode_names() {
        for mode in [DemonsMode::Additive, DemonsMode::Compositive, DemonsMode::Symmetric] {
            assert_eq!(mode.to_string().parse::<DemonsMode>(), Ok(mode));
        }
        assert!("Fluid".parse::<DemonsMode>().is_err());
    }

    #[test]
    fn test_roundtrip_in_memory() {
        let params = RegistrationParameters::new()
            .with_levels(4)
            .with_step_size(0.75)
            .with_epsilon(1e-4)
            .with_padding(0, -1)
            .with_blurring(1.25, 0.5)
            .with_mode(DemonsMode::Symmetric)
            .with_interpolation(InterpolationMode::NearestNeighbor);

        let mut buffer = Vec::new();
        serialize_parameters(&mut buffer, &params).unwrap();
        let mut read = RegistrationParameters::default();
        deserialize_parameters(Cursor::new(buffer), &mut read).unwrap();
        assert_eq!(read, params);
    }

    #[test]
    fn test_comments_blank_and_unknown_lines() {
        let text = "# demons\n\r\n\nStep size = 2.5\nFavourite colour = blue\r\nNo. of iterations=7\n";
        let mut params = RegistrationParameters::default();
        deserialize_parameters(Cursor::new(text), &mut params).unwrap();
        assert_eq!(params.step_size, 2.5);
        assert_eq!(params.number_of_iterations, 7);
        assert_eq!(params.smoothing, RegistrationParameters::default().smoothing);
    }

    #[test]
    fn test_missing_equals_reports_line() {
        let text = "Step size = 1\n\nEpsilon 0.1\n";
        let mut params = RegistrationParameters::default();
        let err = deserialize_parameters(Cursor::new(text), &mut params).unwrap_err();
        match err {
            RegistrationError::ParameterSyntax { line, content } => {
                assert_eq!(line, 3);
                assert_eq!(content, "Epsilon 0.1");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_bad_value() {
        let mut params = RegistrationParameters::default();
        let err = deserialize_parameters(Cursor::new("Reduction factor = two\n"), &mut params).unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidParameterValue { .. }));
    }
}
