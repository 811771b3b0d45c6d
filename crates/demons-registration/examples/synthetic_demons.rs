//! Synthetic Demons Registration Example
//!
//! Registers a sphere onto a locally dented copy of itself and reports the
//! recovered displacement. Parameters are read from the file given as the
//! first argument, otherwise they are guessed from the images.
//!
//! Usage:
//!   cargo run --example synthetic_demons [parameter file]

use std::sync::Arc;

use burn_ndarray::NdArray;
use demons_core::filter::ResampleImageFilter;
use demons_core::{MultiLevelFreeFormTransformation, ScalarVolume, VolumeGeometry};
use demons_registration::{ConsoleProgressCallback, DemonsMode, DemonsRegistration, RegistrationParameters};
use tracing_subscriber::EnvFilter;

type Backend = NdArray<f32>;

const SIZE: usize = 32;

// Sphere of radius 9 voxels on a background of 10, with the surface pushed
// outwards by up to `dent` voxels around +x.
fn sphere(dent: f32, device: &<Backend as burn::tensor::backend::Backend>::Device) -> ScalarVolume<Backend> {
    let centre = (SIZE as f32 - 1.0) / 2.0;
    let mut values = Vec::with_capacity(SIZE * SIZE * SIZE);
    for z in 0..SIZE {
        for y in 0..SIZE {
            for x in 0..SIZE {
                let p = [x as f32 - centre, y as f32 - centre, z as f32 - centre];
                let r = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
                let bulge = if r > 0.0 { dent * (p[0] / r).max(0.0).powi(2) } else { 0.0 };
                let radius = 9.0 + bulge;
                // soft edge one voxel wide
                let value = 10.0 + 90.0 / (1.0 + ((r - radius) * 2.0).exp());
                values.push(value);
            }
        }
    }
    ScalarVolume::from_values(
        values,
        [SIZE, SIZE, SIZE, 1],
        VolumeGeometry::from_spacing([1.5, 1.5, 1.5]),
        device,
    )
}

fn msd(a: &ScalarVolume<Backend>, b: &ScalarVolume<Backend>) -> f64 {
    let (a, b) = (a.to_values(), b.to_values());
    a.iter().zip(&b).map(|(x, y)| ((x - y) as f64).powi(2)).sum::<f64>() / a.len() as f64
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let device = Default::default();
    let target = sphere(0.0, &device);
    let source = sphere(3.0, &device);

    let mut registration = DemonsRegistration::new().with_parameters(
        RegistrationParameters::new()
            .with_levels(3)
            .with_iterations(50)
            .with_smoothing(1.5)
            .with_mode(DemonsMode::Symmetric),
    );
    registration.set_input(&target, &source);
    match std::env::args().nth(1) {
        Some(path) => registration.read(&path)?,
        None => registration.guess_parameter()?,
    }
    registration.add_callback(Arc::new(ConsoleProgressCallback::new(10)));

    let mut output = MultiLevelFreeFormTransformation::new();
    let summary = registration.run(&mut output)?;

    for level in &summary.levels {
        println!(
            "level {}: {} iteration(s), converged: {}, MSD {:.3} -> {:.3}, fit error {:.4} mm",
            level.level, level.iterations, level.converged, level.initial_msd, level.final_msd, level.fit_error
        );
    }
    println!(
        "{} of {} control points active, {:.2}s",
        summary.active_control_points,
        summary.control_points,
        summary.elapsed.as_secs_f64()
    );

    let warped = ResampleImageFilter::from_reference(&target)
        .with_transform(&output)
        .apply(&source);
    println!("MSD before {:.3}, after {:.3}", msd(&target, &source), msd(&target, &warped));

    let tip = target.voxel_to_world(SIZE as f64 / 2.0 + 9.0, SIZE as f64 / 2.0, SIZE as f64 / 2.0);
    let displacement = output.displacement_at(&tip);
    println!(
        "Displacement at the bulge: ({:.2}, {:.2}, {:.2}) mm",
        displacement.x, displacement.y, displacement.z
    );

    let path = std::env::temp_dir().join("synthetic_demons.param");
    registration.write(&path)?;
    println!("Parameters written to {}", path.display());
    Ok(())
}
