use burn_ndarray::NdArray;
use demons_core::image::{ScalarVolume, VolumeGeometry};
use demons_core::utils::{
    bin_layout, calculate_number_of_bins, calculate_number_of_bins_multi, guess_padding, guess_resolution,
    guess_resolution_2d, MIN_GREY,
};
use proptest::prelude::*;

type Backend = NdArray<f32>;

fn volume(values: Vec<f32>, dims: [usize; 4]) -> ScalarVolume<Backend> {
    let device = Default::default();
    ScalarVolume::from_values(values, dims, VolumeGeometry::default(), &device)
}

proptest! {
    #[test]
    fn resolution_is_the_largest_spacing(x in 0.1f64..10.0, y in 0.1f64..10.0, z in 0.1f64..10.0) {
        prop_assert_eq!(guess_resolution(x, y, z), x.max(y).max(z));
        prop_assert_eq!(guess_resolution_2d(x, y), x.max(y));
    }

    #[test]
    fn padding_is_the_shared_corner_value(
        background in -100i32..100,
        interior in -100i32..100,
        corner in 0usize..8,
        other in -100i32..100,
    ) {
        let (nx, ny, nz) = (3usize, 4usize, 2usize);
        let mut values = vec![interior as f32; nx * ny * nz];
        let corners: Vec<usize> = [0, nx - 1]
            .iter()
            .flat_map(|&x| [0, ny - 1].into_iter().map(move |y| (x, y)))
            .flat_map(|(x, y)| [0, nz - 1].into_iter().map(move |z| (z * ny + y) * nx + x))
            .collect();
        for &index in &corners {
            values[index] = background as f32;
        }
        prop_assert_eq!(guess_padding(&volume(values.clone(), [nx, ny, nz, 1])), background);

        values[corners[corner]] = other as f32;
        let expected = if other == background { background } else { MIN_GREY };
        prop_assert_eq!(guess_padding(&volume(values, [nx, ny, nz, 1])), expected);
    }

    #[test]
    fn unlimited_bins_keep_values(min in -50i32..0, max in 1i32..300, value in 1i32..300) {
        let mut v = volume(vec![value as f32, -1.0], [2, 1, 1, 1]);
        let nbins = calculate_number_of_bins(&mut v, 0, min, max);
        prop_assert_eq!(nbins, max - min + 1);
        prop_assert_eq!(v.to_values(), vec![value as f32, -1.0]);
    }

    #[test]
    fn limited_bins_rescale_positive_values(max in 10i32..500, maxbin in 1i32..32, value in 1i32..500) {
        let (nbins, width) = bin_layout(maxbin, 0, max);
        prop_assert!(nbins <= maxbin);
        let mut v = volume(vec![value as f32], [1, 1, 1, 1]);
        prop_assert_eq!(calculate_number_of_bins(&mut v, maxbin, 0, max), nbins);
        prop_assert_eq!(v.to_values()[0], (value / width) as f32);
    }
}

#[test]
fn test_bins_over_several_volumes() {
    let mut volumes = vec![volume(vec![10.0, 20.0], [2, 1, 1, 1]), volume(vec![30.0, -5.0], [2, 1, 1, 1])];
    let nbins = calculate_number_of_bins_multi(&mut volumes, 4, 0, 39);
    assert_eq!(nbins, 4);
    assert_eq!(volumes[0].to_values(), vec![1.0, 2.0]);
    assert_eq!(volumes[1].to_values(), vec![3.0, -5.0]);
}
