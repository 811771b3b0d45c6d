//! Working buffers of one pyramid level.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};
use demons_core::filter::gradient;
use demons_core::interpolation::{create_interpolator, sample_masked, Interpolator};
use demons_core::{InterpolationMode, ScalarVolume, VectorField, VolumeGeometry};

/// Images, masks, gradients and the global field of the level being
/// registered.
///
/// The source is kept on its own grid and warped onto the target grid by
/// the global field each time [`LevelBuffers::update`] runs.
pub struct LevelBuffers<B: Backend> {
    level: usize,
    dims: [usize; 3],
    target_geometry: VolumeGeometry,
    target: Tensor<B, 3>,
    target_mask: Tensor<B, 3>,
    target_gradient: VectorField<B>,
    source: Tensor<B, 3>,
    source_mask: Option<Tensor<B, 3>>,
    source_geometry: VolumeGeometry,
    source_gradient: Option<VectorField<B>>,
    // world coordinates of the target voxels [N, 3]
    target_world: Tensor<B, 2>,
    interpolator: Box<dyn Interpolator<B>>,
    field: VectorField<B>,
    warped: Tensor<B, 3>,
    warped_valid: Tensor<B, 3>,
    warped_gradient: Option<VectorField<B>>,
}

impl<B: Backend> LevelBuffers<B> {
    /// Allocate the buffers of a level and warp the source by `field`.
    ///
    /// # Panics
    /// Panics if `field` is not defined on the target grid.
    pub fn new(
        level: usize,
        target: &ScalarVolume<B>,
        source: &ScalarVolume<B>,
        field: VectorField<B>,
        interpolation: InterpolationMode,
        with_source_gradient: bool,
    ) -> Self {
        let dims = target.spatial_dims();
        assert_eq!(field.dims(), dims, "field must cover the target grid");

        let target_frame = target.frame(0);
        let target_gradient = gradient(&target_frame, target.geometry());
        let source_frame = source.frame(0);
        let source_gradient = with_source_gradient.then(|| gradient(&source_frame, source.geometry()));
        let source_mask = source.padding().map(|_| source.validity_mask(0));
        let target_world = target.geometry().voxel_to_world_tensor(target.voxel_grid());

        let mut buffers = Self {
            level,
            dims,
            target_geometry: *target.geometry(),
            target_mask: target.validity_mask(0),
            target: target_frame.clone(),
            target_gradient,
            source: source_frame.clone(),
            source_mask,
            source_geometry: *source.geometry(),
            source_gradient,
            target_world,
            interpolator: create_interpolator(interpolation),
            field,
            warped: target_frame.zeros_like(),
            warped_valid: target_frame.zeros_like(),
            warped_gradient: None,
        };
        buffers.update();
        buffers
    }

    /// Re-warp the source, its validity and its gradient by the current field.
    pub fn update(&mut self) {
        let [nx, ny, nz] = self.dims;
        let positions = self.target_world.clone() + self.field.to_flat();
        let indices = self.source_geometry.world_to_voxel_tensor(positions);

        let (values, valid) = sample_masked(
            self.interpolator.as_ref(),
            &self.source,
            self.source_mask.as_ref(),
            indices.clone(),
        );
        self.warped = values.reshape([nz, ny, nx]);
        self.warped_valid = valid.reshape([nz, ny, nx]);

        self.warped_gradient = self.source_gradient.as_ref().map(|g| {
            let sampled = g.sample(self.interpolator.as_ref(), indices);
            VectorField::from_flat(sampled, self.dims, self.target_geometry)
        });
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Target grid dimensions `[nx, ny, nz]`.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn target_geometry(&self) -> &VolumeGeometry {
        &self.target_geometry
    }

    pub fn target(&self) -> &Tensor<B, 3> {
        &self.target
    }

    pub fn target_mask(&self) -> &Tensor<B, 3> {
        &self.target_mask
    }

    pub fn target_gradient(&self) -> &VectorField<B> {
        &self.target_gradient
    }

    /// Source intensities at the warped target voxels.
    pub fn warped(&self) -> &Tensor<B, 3> {
        &self.warped
    }

    /// 1 where the warped position is inside the source and not padding.
    pub fn warped_valid(&self) -> &Tensor<B, 3> {
        &self.warped_valid
    }

    /// Source gradient at the warped target voxels, when it was requested.
    pub fn warped_source_gradient(&self) -> Option<&VectorField<B>> {
        self.warped_gradient.as_ref()
    }

    /// Voxels where a force may be computed.
    pub fn force_mask(&self) -> Tensor<B, 3> {
        self.target_mask.clone() * self.warped_valid.clone()
    }

    pub fn field(&self) -> &VectorField<B> {
        &self.field
    }

    /// Replace the global field and re-warp the source.
    pub fn set_field(&mut self, field: VectorField<B>) {
        assert_eq!(field.dims(), self.dims, "field must cover the target grid");
        self.field = field;
        self.update();
    }

    pub fn into_field(self) -> VectorField<B> {
        self.field
    }

    /// Mean squared intensity difference over the force mask.
    pub fn msd(&self) -> f64 {
        let mask = self.force_mask();
        let count = mask.clone().sum().into_scalar().elem::<f64>();
        if count <= 0.0 {
            return 0.0;
        }
        let diff = self.target.clone() - self.warped.clone();
        let total = (diff.powf_scalar(2.0) * mask).sum().into_scalar().elem::<f64>();
        total / count
    }
}
