use burn::tensor::Tensor;
use burn_ndarray::NdArray;
use demons_core::filter::gradient;
use demons_core::image::{ScalarVolume, VolumeGeometry};
use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use std::f64::consts::PI;

type Backend = NdArray<f32>;

fn rotated_geometry() -> VolumeGeometry {
    // 90 degrees around z: index x runs along world y
    let rotation = Rotation3::from_axis_angle(&Vector3::z_axis(), PI / 2.0);
    VolumeGeometry::new(Point3::origin(), Vector3::new(1.0, 1.0, 1.0), rotation.into_inner())
}

#[test]
fn test_rotated_world_to_voxel() {
    let device = Default::default();
    let geometry = rotated_geometry();

    let index = geometry.world_to_voxel(&Point3::new(1.0, 0.0, 0.0));
    assert!((index - Point3::new(0.0, -1.0, 0.0)).norm() < 1e-9, "got {:?}", index);

    let points = Tensor::<Backend, 2>::from_floats([[1.0, 0.0, 0.0]], &device);
    let indices: Vec<f32> = geometry
        .world_to_voxel_tensor(points)
        .into_data()
        .iter::<f32>()
        .collect();
    assert!(indices[0].abs() < 1e-5);
    assert!((indices[1] + 1.0).abs() < 1e-5);
    assert!(indices[2].abs() < 1e-5);
}

#[test]
fn test_anisotropic_offsets() {
    let device = Default::default();
    let geometry = VolumeGeometry::new(Point3::new(5.0, 5.0, 5.0), Vector3::new(2.0, 4.0, 0.5), Matrix3::identity());
    let offsets = Tensor::<Backend, 2>::from_floats([[2.0, 2.0, 2.0]], &device);
    let voxels: Vec<f32> = geometry.offset_to_voxel_tensor(offsets).into_data().iter::<f32>().collect();
    assert_eq!(voxels, vec![1.0, 0.5, 4.0]);
    let scalar = geometry.world_offset_to_voxel(&Vector3::new(2.0, 2.0, 2.0));
    assert!((scalar - Vector3::new(1.0, 0.5, 4.0)).norm() < 1e-12);
}

#[test]
fn test_gradient_follows_rotation() {
    let device = Default::default();
    // intensity grows along index x, which points along world y
    let mut values = Vec::new();
    for _z in 0..3 {
        for _y in 0..3 {
            for x in 0..4 {
                values.push(x as f32);
            }
        }
    }
    let volume = ScalarVolume::<Backend>::from_values(values, [4, 3, 3, 1], rotated_geometry(), &device);
    let grad = gradient(&volume.frame(0), volume.geometry());
    for v in grad.component_values(0) {
        assert!(v.abs() < 1e-5);
    }
    for v in grad.component_values(1) {
        assert!((v - 1.0).abs() < 1e-5);
    }
}
