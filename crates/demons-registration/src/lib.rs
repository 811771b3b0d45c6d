//! Multi-resolution demons registration.
//!
//! [`DemonsRegistration`] estimates a dense displacement field that warps a
//! source volume onto a target volume and approximates it with a
//! free-form deformation lattice.

pub mod accumulate;
pub mod error;
pub mod force;
pub mod level;
pub mod params;
pub mod progress;
pub mod registration;
pub mod strategy;
pub mod validation;

pub use error::{RegistrationError, Result};
pub use level::LevelBuffers;
pub use params::{deserialize_parameters, serialize_parameters, DemonsMode, RegistrationParameters};
pub use progress::{ConsoleProgressCallback, HistoryCallback, ProgressCallback, ProgressInfo, ProgressTracker};
pub use registration::{DemonsRegistration, LevelSummary, RegistrationState, RegistrationSummary};
pub use strategy::{strategy_for, AdditiveDemons, CompositiveDemons, DemonsStrategy, SymmetricDemons};
pub use validation::ConvergenceChecker;
