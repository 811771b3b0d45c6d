use std::sync::Arc;

use burn_ndarray::NdArray;
use demons_core::filter::ResampleImageFilter;
use demons_core::{MultiLevelFreeFormTransformation, ScalarVolume, VolumeGeometry};
use demons_registration::{
    DemonsMode, DemonsRegistration, HistoryCallback, RegistrationParameters, RegistrationState,
};

type B = NdArray<f32>;

const SIZE: usize = 16;

// Gaussian blob of amplitude 100 centred at (7.5 + shift_x, 7.5, 7.5).
fn blob(shift_x: f32, offset: f32) -> ScalarVolume<B> {
    let device = Default::default();
    let sigma = 3.0f32;
    let centre = (SIZE as f32 - 1.0) / 2.0;
    let mut values = Vec::with_capacity(SIZE * SIZE * SIZE);
    for z in 0..SIZE {
        for y in 0..SIZE {
            for x in 0..SIZE {
                let dx = x as f32 - (centre + shift_x);
                let dy = y as f32 - centre;
                let dz = z as f32 - centre;
                let r2 = dx * dx + dy * dy + dz * dz;
                values.push(offset + 100.0 * (-r2 / (2.0 * sigma * sigma)).exp());
            }
        }
    }
    ScalarVolume::from_values(values, [SIZE, SIZE, SIZE, 1], VolumeGeometry::default(), &device)
}

// Single 32x32 slice, 1 mm in-plane and 5 mm thick, with the blob at x + shift_x.
fn slice_blob(shift_x: f32) -> ScalarVolume<B> {
    let device = Default::default();
    let n = 32;
    let centre = (n as f32 - 1.0) / 2.0;
    let mut values = Vec::with_capacity(n * n);
    for y in 0..n {
        for x in 0..n {
            let dx = x as f32 - (centre + shift_x);
            let dy = y as f32 - centre;
            values.push(100.0 * (-(dx * dx + dy * dy) / 32.0).exp());
        }
    }
    ScalarVolume::from_values(values, [n, n, 1, 1], VolumeGeometry::from_spacing([1.0, 1.0, 5.0]), &device)
}

fn msd(a: &ScalarVolume<B>, b: &ScalarVolume<B>) -> f64 {
    let (a, b) = (a.to_values(), b.to_values());
    a.iter()
        .zip(&b)
        .map(|(x, y)| ((x - y) as f64).powi(2))
        .sum::<f64>()
        / a.len() as f64
}

fn register(mode: DemonsMode) {
    let target = blob(0.0, 0.0);
    let source = blob(1.0, 0.0);
    let params = RegistrationParameters::new()
        .with_mode(mode)
        .with_levels(2)
        .with_iterations(40)
        .with_smoothing(1.0)
        .with_epsilon(1e-3);

    let mut registration = DemonsRegistration::new().with_parameters(params);
    registration.set_input(&target, &source);
    let mut output = MultiLevelFreeFormTransformation::new();
    let summary = registration.run(&mut output).unwrap();

    assert_eq!(registration.state(), RegistrationState::Done);
    assert_eq!(summary.levels.len(), 2);
    assert_eq!(summary.levels[0].level, 1);
    assert_eq!(summary.levels[1].level, 0);
    assert_eq!(output.number_of_levels(), 1);

    let warped = ResampleImageFilter::from_reference(&target)
        .with_transform(&output)
        .apply(&source);
    let before = msd(&target, &source);
    let after = msd(&target, &warped);
    assert!(after < 0.5 * before, "{}: MSD {} -> {}", mode, before, after);

    // the source lies at +x, so the displacement points to +x inside the blob
    let field = output.displacement_field::<B>(target.geometry(), target.spatial_dims(), &target.device());
    let intensities = target.to_values();
    let dx = field.component_values(0);
    let (sum, count) = intensities
        .iter()
        .zip(&dx)
        .filter(|(v, _)| **v > 10.0)
        .fold((0.0f64, 0usize), |(s, n), (_, &d)| (s + d as f64, n + 1));
    assert!(count > 0);
    assert!(sum / count as f64 > 0.0, "{}: mean dx {}", mode, sum / count as f64);
}

#[test]
fn test_additive_recovers_shift() {
    register(DemonsMode::Additive);
}

#[test]
fn test_compositive_recovers_shift() {
    register(DemonsMode::Compositive);
}

#[test]
fn test_symmetric_recovers_shift() {
    register(DemonsMode::Symmetric);
}

#[test]
fn test_identity_converges_to_zero_field() {
    // blob on a floor of 1 with a two-voxel slab of padding
    let device = Default::default();
    let mut values = blob(0.0, 1.0).to_values();
    for (i, v) in values.iter_mut().enumerate() {
        if i % SIZE < 2 {
            *v = 0.0;
        }
    }
    let image = ScalarVolume::<B>::from_values(values, [SIZE, SIZE, SIZE, 1], VolumeGeometry::default(), &device);

    let params = RegistrationParameters::new().with_levels(2).with_padding(0, 0);
    let mut registration = DemonsRegistration::new().with_parameters(params);
    registration.set_input(&image, &image);
    let mut output = MultiLevelFreeFormTransformation::new();
    let summary = registration.run(&mut output).unwrap();

    for level in &summary.levels {
        assert!(level.converged);
        assert_eq!(level.iterations, 1);
    }
    assert!(summary.active_control_points < summary.control_points);

    let field = output.displacement_field::<B>(image.geometry(), image.spatial_dims(), &device);
    for axis in 0..3 {
        assert!(field.component_values(axis).iter().all(|d| d.abs() < 1e-3));
    }
}

#[test]
fn test_progress_history() {
    let target = blob(0.0, 0.0);
    let source = blob(1.0, 0.0);
    let params = RegistrationParameters::new()
        .with_levels(1)
        .with_iterations(5)
        .with_epsilon(0.0);

    let history = Arc::new(HistoryCallback::new());
    let mut registration = DemonsRegistration::new().with_parameters(params);
    registration.add_callback(history.clone());
    registration.set_input(&target, &source);
    let mut output = MultiLevelFreeFormTransformation::new();
    let summary = registration.run(&mut output).unwrap();

    let records = history.get_history();
    assert_eq!(records.len(), 5);
    assert_eq!(summary.total_iterations(), 5);
    assert!(!summary.levels[0].converged);
    assert!(records.iter().enumerate().all(|(i, r)| r.level == 0 && r.iteration == i + 1));
    assert!(records[4].msd < summary.levels[0].initial_msd);
}

#[test]
fn test_run_level_on_supplied_volumes() {
    let target = blob(0.0, 0.0);
    let source = blob(1.0, 0.0);
    let mut registration = DemonsRegistration::new()
        .with_parameters(RegistrationParameters::new().with_iterations(10));

    let summary = registration.run_level(&target, &source, 0).unwrap();
    assert_eq!(registration.state(), RegistrationState::FinalizedLevel(0));
    assert!(summary.final_msd < summary.initial_msd);

    let mut output = MultiLevelFreeFormTransformation::new();
    registration.finalize(&mut output).unwrap();
    assert_eq!(output.number_of_levels(), 1);
    assert_eq!(registration.state(), RegistrationState::Done);
}

#[test]
fn test_existing_transformation_seeds_first_level() {
    let target = blob(0.0, 0.0);
    let source = blob(1.0, 0.0);
    let params = RegistrationParameters::new().with_levels(1).with_iterations(20);

    let mut first = DemonsRegistration::new().with_parameters(params.clone());
    first.set_input(&target, &source);
    let mut output = MultiLevelFreeFormTransformation::new();
    let first_summary = first.run(&mut output).unwrap();

    let mut second = DemonsRegistration::new().with_parameters(params);
    second.set_input(&target, &source);
    let second_summary = second.run(&mut output).unwrap();

    assert_eq!(output.number_of_levels(), 2);
    assert!(second_summary.levels[0].initial_msd < first_summary.levels[0].initial_msd);
}

#[test]
fn test_single_slice_registers_at_in_plane_resolution() {
    let target = slice_blob(0.0);
    let source = slice_blob(1.5);
    let params = RegistrationParameters::new().with_levels(3).with_iterations(20);

    let mut registration = DemonsRegistration::new().with_parameters(params);
    registration.set_input(&target, &source);
    registration.guess_parameter().unwrap();
    assert_eq!(registration.parameters().target_resolution, 1.0);

    let mut output = MultiLevelFreeFormTransformation::new();
    let summary = registration.run(&mut output).unwrap();
    assert_eq!(summary.levels.len(), 3);
    assert_eq!(summary.control_points, 32 * 32);

    let warped = ResampleImageFilter::from_reference(&target)
        .with_transform(&output)
        .apply(&source);
    assert!(msd(&target, &warped) < msd(&target, &source));
}
