//! Multi-resolution demons registration driver.
//!
//! The driver registers a source volume onto a target volume level by level,
//! from the coarsest pyramid level to the finest. Every level iterates
//! force, update smoothing, merge, field smoothing and re-warp until the
//! largest update falls below `epsilon` or the iteration budget is spent.
//! The dense field is approximated by a control-point lattice that is pushed
//! onto the caller's multi-level transformation when the run completes.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use burn::tensor::backend::Backend;
use demons_core::filter::{GaussianFilter, ImagePyramid, PyramidBuilder, ResampleImageFilter};
use demons_core::utils::{
    guess_padding, guess_resolution, guess_resolution_2d, mark_passive_control_points, MIN_GREY,
};
use demons_core::{FreeFormTransformation3D, MultiLevelFreeFormTransformation, ScalarVolume, VectorField};
use nalgebra::Vector3;
use tracing::{debug, info};

use crate::accumulate::fit_lattice;
use crate::error::{RegistrationError, Result};
use crate::level::LevelBuffers;
use crate::params::{deserialize_parameters, serialize_parameters, RegistrationParameters};
use crate::progress::{ProgressCallback, ProgressInfo, ProgressTracker};
use crate::strategy::{strategy_for, DemonsStrategy};
use crate::validation::{validate_inputs, ConvergenceChecker};

/// Where the driver is in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Uninitialized,
    InitializedLevel(usize),
    Iterating { level: usize, iteration: usize },
    Converged(usize),
    MaxIterationsReached(usize),
    FinalizedLevel(usize),
    Done,
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::InitializedLevel(level) => write!(f, "InitializedLevel({})", level),
            Self::Iterating { level, iteration } => write!(f, "Iterating({}, {})", level, iteration),
            Self::Converged(level) => write!(f, "Converged({})", level),
            Self::MaxIterationsReached(level) => write!(f, "MaxIterationsReached({})", level),
            Self::FinalizedLevel(level) => write!(f, "FinalizedLevel({})", level),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// Outcome of one pyramid level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSummary {
    pub level: usize,
    pub iterations: usize,
    pub converged: bool,
    /// MSD before the first iteration.
    pub initial_msd: f64,
    pub final_msd: f64,
    /// Largest update of the last iteration (mm).
    pub max_update: f64,
    /// RMS lattice fitting error at the end of the level (mm).
    pub fit_error: f64,
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct RegistrationSummary {
    /// Levels in the order they ran, coarsest first.
    pub levels: Vec<LevelSummary>,
    pub control_points: usize,
    pub active_control_points: usize,
    /// RMS fitting error of the final fit (mm).
    pub fit_error: f64,
    pub elapsed: Duration,
}

impl RegistrationSummary {
    pub fn total_iterations(&self) -> usize {
        self.levels.iter().map(|l| l.iterations).sum()
    }
}

/// Demons registration of a source volume onto a target volume.
pub struct DemonsRegistration<'a, B: Backend> {
    target: Option<&'a ScalarVolume<B>>,
    source: Option<&'a ScalarVolume<B>>,
    params: RegistrationParameters,
    strategy: Box<dyn DemonsStrategy<B>>,
    pyramid: Option<ImagePyramid<B>>,
    ffd: Option<FreeFormTransformation3D>,
    previous_fit: Option<FreeFormTransformation3D>,
    // transformation supplied by the caller, fixed for the whole run
    initial: MultiLevelFreeFormTransformation,
    initial_field: Option<VectorField<B>>,
    // field carried from one level to the next
    field: Option<VectorField<B>>,
    buffers: Option<LevelBuffers<B>>,
    state: RegistrationState,
    tracker: ProgressTracker,
    summaries: Vec<LevelSummary>,
    fit_error: f64,
}

impl<'a, B: Backend> Default for DemonsRegistration<'a, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, B: Backend> DemonsRegistration<'a, B> {
    pub fn new() -> Self {
        let params = RegistrationParameters::default();
        Self {
            target: None,
            source: None,
            strategy: strategy_for(params.mode),
            params,
            pyramid: None,
            ffd: None,
            previous_fit: None,
            initial: MultiLevelFreeFormTransformation::new(),
            initial_field: None,
            field: None,
            buffers: None,
            state: RegistrationState::Uninitialized,
            tracker: ProgressTracker::new(),
            summaries: Vec::new(),
            fit_error: 0.0,
        }
    }

    pub fn with_parameters(mut self, params: RegistrationParameters) -> Self {
        self.params = params;
        self
    }

    pub fn parameters(&self) -> &RegistrationParameters {
        &self.params
    }

    pub fn parameters_mut(&mut self) -> &mut RegistrationParameters {
        &mut self.params
    }

    /// Set the volumes to register. They must outlive the driver.
    pub fn set_input(&mut self, target: &'a ScalarVolume<B>, source: &'a ScalarVolume<B>) {
        self.target = Some(target);
        self.source = Some(source);
    }

    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.tracker.add_callback(callback);
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    /// Copy the parameters of another driver.
    pub fn set_parameter(&mut self, other: &DemonsRegistration<'_, B>) {
        self.params = other.params.clone();
    }

    /// Read parameters from a `Key = Value` file.
    pub fn read(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::open(path)?;
        deserialize_parameters(BufReader::new(file), &mut self.params)?;
        debug!("Read parameters from {}", path.display());
        Ok(())
    }

    /// Write parameters to a `Key = Value` file.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serialize_parameters(&mut writer, &self.params)?;
        writer.flush()?;
        Ok(())
    }

    /// Fill unset resolution, blurring and padding values from the inputs.
    ///
    /// Resolution is the coarsest voxel size (in-plane for a single slice),
    /// blurring half the resolution and padding the value shared by the
    /// eight corners.
    pub fn guess_parameter(&mut self) -> Result<()> {
        let (target, source) = self.inputs()?;
        let params = &mut self.params;
        guess_image_parameters(
            target,
            &mut params.target_resolution,
            &mut params.target_blurring,
            &mut params.target_padding,
        );
        guess_image_parameters(
            source,
            &mut params.source_resolution,
            &mut params.source_blurring,
            &mut params.source_padding,
        );
        info!(
            "Guessed target resolution {} mm, blurring {} mm, padding {}",
            params.target_resolution, params.target_blurring, params.target_padding
        );
        info!(
            "Guessed source resolution {} mm, blurring {} mm, padding {}",
            params.source_resolution, params.source_blurring, params.source_padding
        );
        Ok(())
    }

    /// Register the inputs and push the fitted lattice onto `output`.
    ///
    /// The displacement already held by `output` initialises the coarsest
    /// level.
    pub fn run(&mut self, output: &mut MultiLevelFreeFormTransformation) -> Result<RegistrationSummary> {
        self.tracker.start();
        let result = self.run_pyramid(output);
        match &result {
            Ok(summary) => info!(
                "Registration finished: {} level(s), {} iteration(s), fit error {:.6} mm",
                summary.levels.len(),
                summary.total_iterations(),
                summary.fit_error
            ),
            Err(e) => self.tracker.error(&e.to_string()),
        }
        result
    }

    fn run_pyramid(&mut self, output: &mut MultiLevelFreeFormTransformation) -> Result<RegistrationSummary> {
        self.initial = output.clone();
        self.initialize()?;
        let pyramid = self
            .pyramid
            .take()
            .ok_or_else(|| RegistrationError::invalid_configuration("pyramid was not built"))?;
        for level in (0..pyramid.levels()).rev() {
            let (target, source) = pyramid.level(level);
            self.run_level(target, source, level)?;
        }
        self.finalize(output)
    }

    /// Validate, prepare the inputs, build the pyramid and the lattice.
    pub fn initialize(&mut self) -> Result<()> {
        self.params.validate()?;
        let (target, source) = self.inputs()?;
        validate_inputs(target, source)?;
        let params = &self.params;

        let target = prepare_input(target, params.target_padding, params.target_resolution, params);
        let source = prepare_input(source, params.source_padding, params.source_resolution, params);

        let target_builder = PyramidBuilder::new(params.number_of_levels, params.reduction_factor)
            .with_blurring(params.target_blurring)
            .with_interpolation(params.interpolation_mode);
        let source_builder = PyramidBuilder::new(params.number_of_levels, params.reduction_factor)
            .with_blurring(params.source_blurring)
            .with_interpolation(params.interpolation_mode);
        let pyramid = ImagePyramid::build(&target, &target_builder, &source, &source_builder);
        if pyramid.levels() < params.number_of_levels {
            info!(
                "Using {} of {} requested resolution level(s)",
                pyramid.levels(),
                params.number_of_levels
            );
        }
        if pyramid.levels() == 0 {
            return Err(RegistrationError::image_validation("inputs are too small for a pyramid"));
        }

        self.strategy = strategy_for(params.mode);
        let (finest, _) = pyramid.level(0);
        self.ffd = Some(self.create_lattice(finest));
        self.previous_fit = self.ffd.clone();
        self.pyramid = Some(pyramid);
        self.field = None;
        self.summaries.clear();
        self.fit_error = 0.0;
        info!("Demons mode {}, {} level(s)", self.params.mode, self.params.number_of_levels);
        Ok(())
    }

    /// Run a single level on caller-supplied level volumes.
    pub fn run_level(
        &mut self,
        target: &ScalarVolume<B>,
        source: &ScalarVolume<B>,
        level: usize,
    ) -> Result<LevelSummary> {
        self.initialize_level(target, source, level)?;

        let step = self.params.step_size;
        let iterations = self.params.number_of_iterations;
        let checker = ConvergenceChecker::new(self.params.epsilon);
        let update_smoother = GaussianFilter::<B>::new(self.params.update_smoothing);
        let smoother = GaussianFilter::<B>::new(self.params.smoothing);
        let initial_msd = self.level_buffers()?.msd();

        let mut converged = false;
        let mut last = ProgressInfo::new(level, 0, Some(iterations), 0.0, initial_msd, Duration::ZERO);
        for iteration in 0..iterations {
            self.set_state(RegistrationState::Iterating { level, iteration });
            let strategy = &self.strategy;
            let buffers = self
                .buffers
                .as_mut()
                .ok_or_else(|| RegistrationError::invalid_configuration("level buffers missing"))?;

            let force = strategy.force(buffers, step);
            let update = strategy.force2(buffers, step, force);
            let update = update_smoother.apply_field(&update, buffers.target_mask());
            let max_update = update.max_magnitude(Some(&buffers.force_mask())) as f64;
            let field = strategy.add(buffers, &update);
            let field = smoother.apply_field(&field, buffers.target_mask());
            buffers.set_field(field);

            last = self.tracker.update(level, iteration + 1, iterations, max_update, buffers.msd());

            if self.params.fit_interval > 0 && (iteration + 1) % self.params.fit_interval == 0 {
                let change = self.fit()?;
                if checker.fit_converged(change) {
                    debug!("Lattice change {:.6} mm below epsilon", change);
                    converged = true;
                    break;
                }
            }
            if checker.update_converged(max_update) {
                converged = true;
                break;
            }
        }

        self.set_state(if converged {
            RegistrationState::Converged(level)
        } else {
            RegistrationState::MaxIterationsReached(level)
        });
        self.tracker.complete_level(level, &last);
        self.finalize_level(level, &last, initial_msd, converged)
    }

    /// Allocate the level buffers and set the starting field.
    ///
    /// The field is the previous level's field resampled onto this level,
    /// or the displacement of the initial transformation on the first level.
    pub fn initialize_level(
        &mut self,
        target: &ScalarVolume<B>,
        source: &ScalarVolume<B>,
        level: usize,
    ) -> Result<()> {
        self.params.validate()?;
        validate_inputs(target, source)?;
        if self.strategy.mode() != self.params.mode {
            self.strategy = strategy_for(self.params.mode);
        }
        if self.ffd.is_none() {
            self.ffd = Some(self.create_lattice(target));
            self.previous_fit = self.ffd.clone();
        }

        let dims = target.spatial_dims();
        let geometry = target.geometry();
        let device = target.device();
        let initial_field = self.initial.displacement_field::<B>(geometry, dims, &device);
        let field = match self.field.take() {
            Some(previous) => previous.resample_to(geometry, dims),
            None => initial_field.clone(),
        };

        info!(
            "Level {}: target {:?} voxels of {:?} mm",
            level,
            dims,
            geometry.spacing().as_slice()
        );
        self.buffers = Some(LevelBuffers::new(
            level,
            target,
            source,
            field,
            self.params.interpolation_mode,
            self.strategy.needs_source_gradient(),
        ));
        self.initial_field = Some(initial_field);
        self.tracker.start_level();
        self.set_state(RegistrationState::InitializedLevel(level));
        Ok(())
    }

    /// Fit the lattice, release the level buffers and keep the field.
    pub fn finalize_level(
        &mut self,
        level: usize,
        last: &ProgressInfo,
        initial_msd: f64,
        converged: bool,
    ) -> Result<LevelSummary> {
        let change = self.fit()?;
        debug!("Level {} lattice change {:.6} mm", level, change);
        let buffers = self
            .buffers
            .take()
            .ok_or_else(|| RegistrationError::invalid_configuration("level buffers missing"))?;
        let summary = LevelSummary {
            level,
            iterations: last.iteration,
            converged,
            initial_msd,
            final_msd: last.msd,
            max_update: last.max_update,
            fit_error: self.fit_error,
        };
        self.field = Some(buffers.into_field());
        self.initial_field = None;
        self.summaries.push(summary.clone());
        self.set_state(RegistrationState::FinalizedLevel(level));
        Ok(summary)
    }

    /// Push the fitted lattice onto `output` and release the run buffers.
    pub fn finalize(&mut self, output: &mut MultiLevelFreeFormTransformation) -> Result<RegistrationSummary> {
        let ffd = self
            .ffd
            .take()
            .ok_or_else(|| RegistrationError::invalid_configuration("no lattice to finalize"))?;
        let summary = RegistrationSummary {
            levels: std::mem::take(&mut self.summaries),
            control_points: ffd.number_of_control_points(),
            active_control_points: ffd.number_of_active(),
            fit_error: self.fit_error,
            elapsed: self.tracker.complete(),
        };
        output.push_local(ffd);
        self.previous_fit = None;
        self.field = None;
        self.pyramid = None;
        self.set_state(RegistrationState::Done);
        Ok(summary)
    }

    // Fit the increment over the initial transformation; returns the largest
    // control-point change since the previous fit.
    fn fit(&mut self) -> Result<f64> {
        let buffers = self
            .buffers
            .as_ref()
            .ok_or_else(|| RegistrationError::invalid_configuration("level buffers missing"))?;
        let ffd = self
            .ffd
            .as_mut()
            .ok_or_else(|| RegistrationError::invalid_configuration("lattice missing"))?;
        let increment = match &self.initial_field {
            Some(initial) => buffers.field().add(&initial.scale(-1.0)),
            None => buffers.field().clone(),
        };
        self.fit_error = fit_lattice(ffd, &increment, buffers.target_mask())?;
        let change = match &self.previous_fit {
            Some(previous) => ffd.max_difference(previous),
            None => 0.0,
        };
        self.previous_fit = Some(ffd.clone());
        debug!(
            "Lattice fit error {:.6} mm, change {:.6} mm",
            self.fit_error, change
        );
        Ok(change)
    }

    fn create_lattice(&self, target: &ScalarVolume<B>) -> FreeFormTransformation3D {
        let spacing = if self.params.control_point_spacing > 0.0 {
            self.params.control_point_spacing
        } else {
            target.spacing().min()
        };
        let mut ffd = FreeFormTransformation3D::over_volume(target.geometry(), target.spatial_dims(), spacing);
        if let Some(padding) = target.padding() {
            mark_passive_control_points(target, padding, &mut ffd);
        }
        info!(
            "Control point lattice {:?} with spacing {} mm",
            ffd.dims(),
            spacing
        );
        ffd
    }

    fn level_buffers(&self) -> Result<&LevelBuffers<B>> {
        self.buffers
            .as_ref()
            .ok_or_else(|| RegistrationError::invalid_configuration("level buffers missing"))
    }

    fn inputs(&self) -> Result<(&'a ScalarVolume<B>, &'a ScalarVolume<B>)> {
        let target = self
            .target
            .ok_or_else(|| RegistrationError::missing_input("target image not set"))?;
        let source = self
            .source
            .ok_or_else(|| RegistrationError::missing_input("source image not set"))?;
        Ok((target, source))
    }

    fn set_state(&mut self, state: RegistrationState) {
        debug!("{} -> {}", self.state, state);
        self.state = state;
    }
}

fn guess_image_parameters<B: Backend>(
    volume: &ScalarVolume<B>,
    resolution: &mut f64,
    blurring: &mut f64,
    padding: &mut i32,
) {
    if *resolution == 0.0 {
        let spacing = volume.spacing();
        *resolution = if is_single_slice(volume) {
            guess_resolution_2d(spacing.x, spacing.y)
        } else {
            guess_resolution(spacing.x, spacing.y, spacing.z)
        };
    }
    if *blurring == 0.0 {
        *blurring = *resolution / 2.0;
    }
    if *padding == MIN_GREY {
        *padding = guess_padding(volume);
    }
}

fn is_single_slice<B: Backend>(volume: &ScalarVolume<B>) -> bool {
    volume.spatial_dims()[2] == 1
}

// Apply the padding value and resample to an isotropic grid when asked for.
// A single slice keeps its thickness.
fn prepare_input<B: Backend>(
    volume: &ScalarVolume<B>,
    padding: i32,
    resolution: f64,
    params: &RegistrationParameters,
) -> ScalarVolume<B> {
    let mut volume = volume.clone();
    if padding != MIN_GREY {
        volume.set_padding(Some(padding as f32));
    }
    if resolution <= 0.0 {
        return volume;
    }
    let spacing = *volume.spacing();
    let target = if is_single_slice(&volume) {
        Vector3::new(resolution, resolution, spacing.z)
    } else {
        Vector3::new(resolution, resolution, resolution)
    };
    if (spacing - target).abs().max() > 1e-6 {
        let filter = ResampleImageFilter::with_spacing(&volume, target).with_interpolation(params.interpolation_mode);
        debug!("Resampling {:?} voxels to {:?} mm", volume.spatial_dims(), target.as_slice());
        volume = filter.apply(&volume);
    }
    volume
}
