use burn_ndarray::NdArray;
use demons_core::filter::{ImagePyramid, PyramidBuilder};
use demons_core::image::{ScalarVolume, VolumeGeometry};
use proptest::prelude::*;

type Backend = NdArray<f32>;

fn block(dims: [usize; 3], spacing: [f64; 3]) -> ScalarVolume<Backend> {
    let device = Default::default();
    let [nx, ny, nz] = dims;
    let mut values = Vec::with_capacity(nx * ny * nz);
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                // padding border of one voxel in x
                let v = if x == 0 || x == nx - 1 { -1.0 } else { (x + y + z) as f32 + 1.0 };
                values.push(v);
            }
        }
    }
    ScalarVolume::from_values(values, [nx, ny, nz, 1], VolumeGeometry::from_spacing(spacing), &device)
        .with_padding(0.0)
}

#[test]
fn test_levels_halve_and_keep_padding() {
    let volume = block([16, 12, 8], [1.0, 1.0, 2.0]);
    let pyramid = PyramidBuilder::new(3, 2.0).with_blurring(0.5).build(&volume);
    assert_eq!(pyramid.len(), 3);
    assert_eq!(pyramid[0].dims(), volume.dims());
    for level in 1..pyramid.len() {
        let previous = pyramid[level - 1].spacing();
        let current = pyramid[level].spacing();
        assert!((current - previous * 2.0).norm() < 1e-9);
        // padding survives and the centre stays fixed
        assert_eq!(pyramid[level].padding(), Some(0.0));
        let centre = pyramid[level].geometry().centre(pyramid[level].spatial_dims());
        let input_centre = volume.geometry().centre(volume.spatial_dims());
        assert!((centre - input_centre).norm() < 1e-9);
        let values = pyramid[level].to_values();
        assert!(values.iter().all(|&v| v == 0.0 || v >= 1.0 - 1e-4), "{:?}", values);
    }
}

#[test]
fn test_paired_pyramid_uses_common_levels() {
    let target = block([16, 16, 16], [1.0, 1.0, 1.0]);
    let source = block([16, 16, 4], [1.0, 1.0, 1.0]);
    let builder = PyramidBuilder::new(5, 2.0);
    let pyramid = ImagePyramid::build(&target, &builder, &source, &builder);
    // 4 -> 2 -> 1 -> 0.5 rounds to 1 -> 0.25
    assert_eq!(pyramid.levels(), 4);
    let (t, s) = pyramid.level(3);
    assert_eq!(t.spatial_dims(), [2, 2, 2]);
    assert_eq!(s.spatial_dims(), [2, 2, 1]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn level_count_never_exceeds_configuration(n in 1usize..12, levels in 1usize..6) {
        let volume = block([n.max(2), 3, 2], [1.0, 1.0, 1.0]);
        let pyramid = PyramidBuilder::new(levels, 2.0).build(&volume);
        prop_assert!(pyramid.len() <= levels);
        prop_assert!(!pyramid.is_empty());
        prop_assert_eq!(pyramid[0].dims(), volume.dims());
    }
}
