//! Spatial transformations.

pub mod ffd;
pub mod multilevel;
pub mod trait_;

pub use ffd::{ControlPointStatus, FreeFormTransformation3D};
pub use multilevel::MultiLevelFreeFormTransformation;
pub use trait_::Transform;
