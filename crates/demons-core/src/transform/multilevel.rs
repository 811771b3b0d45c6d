//! Stack of free-form transformations whose displacements add.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use nalgebra::{Point3, Vector3};

use super::ffd::{displace_points, displacement_field_of, FreeFormTransformation3D};
use super::trait_::Transform;
use crate::image::{VectorField, VolumeGeometry};

/// Ordered list of local transformations.
///
/// An empty stack is the identity.
#[derive(Debug, Clone, Default)]
pub struct MultiLevelFreeFormTransformation {
    levels: Vec<FreeFormTransformation3D>,
}

impl MultiLevelFreeFormTransformation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a local transformation.
    pub fn push_local(&mut self, ffd: FreeFormTransformation3D) {
        self.levels.push(ffd);
    }

    pub fn number_of_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn is_identity(&self) -> bool {
        self.levels.is_empty()
    }

    /// Sum of the displacements of every level at a world point.
    pub fn displacement_at(&self, point: &Point3<f64>) -> Vector3<f64> {
        self.levels
            .iter()
            .fold(Vector3::zeros(), |acc, ffd| acc + ffd.displacement_at(point))
    }

    /// Displacement at every voxel of a grid.
    pub fn displacement_field<B: Backend>(
        &self,
        geometry: &VolumeGeometry,
        dims: [usize; 3],
        device: &B::Device,
    ) -> VectorField<B> {
        if self.is_identity() {
            return VectorField::zeros(dims, *geometry, device);
        }
        displacement_field_of(geometry, dims, device, |p| self.displacement_at(p))
    }
}

impl<B: Backend> Transform<B> for MultiLevelFreeFormTransformation {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        if self.is_identity() {
            return points;
        }
        displace_points(points, |p| self.displacement_at(p))
    }
}
