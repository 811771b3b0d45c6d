//! Demons variants.
//!
//! A strategy decides which gradient drives the force and how an update is
//! merged into the global field.

use burn::tensor::backend::Backend;
use demons_core::VectorField;

use crate::accumulate::{add_fields, compose_fields};
use crate::force::demons_force;
use crate::level::LevelBuffers;
use crate::params::DemonsMode;

/// One demons variant.
pub trait DemonsStrategy<B: Backend> {
    fn mode(&self) -> DemonsMode;

    /// Whether the level buffers must carry the warped source gradient.
    fn needs_source_gradient(&self) -> bool {
        false
    }

    /// First force contribution.
    fn force(&self, buffers: &LevelBuffers<B>, step: f64) -> VectorField<B>;

    /// Second force contribution, combined with the first.
    fn force2(&self, _buffers: &LevelBuffers<B>, _step: f64, force: VectorField<B>) -> VectorField<B> {
        force
    }

    /// Merge `update` into the global field of the level.
    fn add(&self, buffers: &LevelBuffers<B>, update: &VectorField<B>) -> VectorField<B>;
}

/// Target-gradient force, additive update.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdditiveDemons;

impl<B: Backend> DemonsStrategy<B> for AdditiveDemons {
    fn mode(&self) -> DemonsMode {
        DemonsMode::Additive
    }

    fn force(&self, buffers: &LevelBuffers<B>, step: f64) -> VectorField<B> {
        target_force(buffers, step)
    }

    fn add(&self, buffers: &LevelBuffers<B>, update: &VectorField<B>) -> VectorField<B> {
        add_fields(buffers.field(), update)
    }
}

/// Warped-source-gradient force, compositive update.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositiveDemons;

impl<B: Backend> DemonsStrategy<B> for CompositiveDemons {
    fn mode(&self) -> DemonsMode {
        DemonsMode::Compositive
    }

    fn needs_source_gradient(&self) -> bool {
        true
    }

    fn force(&self, buffers: &LevelBuffers<B>, step: f64) -> VectorField<B> {
        source_force(buffers, step)
    }

    fn add(&self, buffers: &LevelBuffers<B>, update: &VectorField<B>) -> VectorField<B> {
        compose_fields(buffers.field(), update)
    }
}

/// Mean of the target- and source-gradient forces, compositive update.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymmetricDemons;

impl<B: Backend> DemonsStrategy<B> for SymmetricDemons {
    fn mode(&self) -> DemonsMode {
        DemonsMode::Symmetric
    }

    fn needs_source_gradient(&self) -> bool {
        true
    }

    fn force(&self, buffers: &LevelBuffers<B>, step: f64) -> VectorField<B> {
        target_force(buffers, step)
    }

    fn force2(&self, buffers: &LevelBuffers<B>, step: f64, force: VectorField<B>) -> VectorField<B> {
        force.add(&source_force(buffers, step)).scale(0.5)
    }

    fn add(&self, buffers: &LevelBuffers<B>, update: &VectorField<B>) -> VectorField<B> {
        compose_fields(buffers.field(), update)
    }
}

/// Strategy implementing `mode`.
pub fn strategy_for<B: Backend>(mode: DemonsMode) -> Box<dyn DemonsStrategy<B>> {
    match mode {
        DemonsMode::Additive => Box::new(AdditiveDemons),
        DemonsMode::Compositive => Box::new(CompositiveDemons),
        DemonsMode::Symmetric => Box::new(SymmetricDemons),
    }
}

fn target_force<B: Backend>(buffers: &LevelBuffers<B>, step: f64) -> VectorField<B> {
    demons_force(
        buffers.target(),
        buffers.warped(),
        buffers.target_gradient(),
        &buffers.force_mask(),
        step,
    )
}

// falls back to the target gradient when the buffers hold no source gradient
fn source_force<B: Backend>(buffers: &LevelBuffers<B>, step: f64) -> VectorField<B> {
    let gradient = buffers
        .warped_source_gradient()
        .unwrap_or_else(|| buffers.target_gradient());
    demons_force(buffers.target(), buffers.warped(), gradient, &buffers.force_mask(), step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_strategy_for_mode() {
        for mode in [DemonsMode::Additive, DemonsMode::Compositive, DemonsMode::Symmetric] {
            let strategy = strategy_for::<TestBackend>(mode);
            assert_eq!(strategy.mode(), mode);
            assert_eq!(strategy.needs_source_gradient(), mode != DemonsMode::Additive);
        }
    }
}
