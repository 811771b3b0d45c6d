//! Stateless helpers on volumes: parameter guesses, padding handling and
//! intensity binning.

use burn::tensor::backend::Backend;
use tracing::info;

use crate::image::ScalarVolume;
use crate::transform::{ControlPointStatus, FreeFormTransformation3D};

/// Smallest grey value; the "no padding" sentinel.
pub const MIN_GREY: i32 = i16::MIN as i32;

/// Coarsest of three voxel sizes.
pub fn guess_resolution(xsize: f64, ysize: f64, zsize: f64) -> f64 {
    if xsize >= ysize && xsize >= zsize {
        xsize
    } else if ysize >= xsize && ysize >= zsize {
        ysize
    } else {
        zsize
    }
}

/// Coarsest of two voxel sizes.
pub fn guess_resolution_2d(xsize: f64, ysize: f64) -> f64 {
    if xsize > ysize {
        xsize
    } else {
        ysize
    }
}

/// The value shared by all eight corners of the first frame, or [`MIN_GREY`]
/// when the corners differ.
pub fn guess_padding<B: Backend>(volume: &ScalarVolume<B>) -> i32 {
    let [nx, ny, nz, _] = volume.dims();
    let (x1, y1, z1) = (nx - 1, ny - 1, nz - 1);
    let reference = volume.get(0, 0, 0, 0);
    let corners = [
        (x1, 0, 0),
        (0, y1, 0),
        (0, 0, z1),
        (x1, y1, 0),
        (0, y1, z1),
        (x1, 0, z1),
        (x1, y1, z1),
    ];
    if corners
        .iter()
        .all(|&(x, y, z)| volume.get(x, y, z, 0) == reference)
    {
        reference.round() as i32
    } else {
        MIN_GREY
    }
}

/// Number of histogram bins and the bin width for intensities in
/// `[min, max]`; `maxbin <= 0` means one bin per grey value.
pub fn bin_layout(maxbin: i32, min: i32, max: i32) -> (i32, i32) {
    let range = max - min + 1;
    if maxbin <= 0 {
        return (range, 1);
    }
    let mut width = 1;
    while ceil_div(range, width) > maxbin {
        width += 1;
    }
    (ceil_div(range, width), width)
}

/// Choose a bin count for `[min, max]` and rescale the positive intensities of
/// `volume` to bin indices (`floor(v / width)`).
///
/// # Returns
/// The number of bins.
pub fn calculate_number_of_bins<B: Backend>(
    volume: &mut ScalarVolume<B>,
    maxbin: i32,
    min: i32,
    max: i32,
) -> i32 {
    calculate_number_of_bins_multi(std::slice::from_mut(volume), maxbin, min, max)
}

/// [`calculate_number_of_bins`] over several volumes sharing one layout.
pub fn calculate_number_of_bins_multi<B: Backend>(
    volumes: &mut [ScalarVolume<B>],
    maxbin: i32,
    min: i32,
    max: i32,
) -> i32 {
    let (nbins, width) = bin_layout(maxbin, min, max);
    if maxbin > 0 {
        info!("Using {} out of {} bin(s) with width {}", nbins, maxbin, width);
    } else {
        info!("Using {} bin(s) with width {}", nbins, width);
    }
    if width > 1 {
        for volume in volumes.iter_mut() {
            *volume = volume.map_data(|data| {
                let positive = data.clone().greater_elem(0.0).float();
                let binned = (data.clone() / width as f32).floor();
                binned * positive.clone() + data * (positive.neg() + 1.0)
            });
        }
    }
    nbins
}

/// Replace every run of `-1` voxels along x by its distance to the end of the
/// run (`-(l - p)` for voxel `p` of a run ending before `l`).
///
/// Logs the padding ratio when the volume holds negative voxels.
pub fn pad_distance<B: Backend>(volume: &mut ScalarVolume<B>, padding: i32) {
    let mut values = volume.to_values();
    let padded = values.iter().filter(|&&v| v < 0.0).count();
    if padded == 0 {
        return;
    }
    info!("Padding value = {}", padding);
    info!("Padding ratio = {} %", 100.0 * padded as f64 / values.len() as f64);

    let nx = volume.dims()[0];
    for row in values.chunks_exact_mut(nx) {
        let mut i = 0;
        while i < nx {
            if row[i] != -1.0 {
                i += 1;
                continue;
            }
            let end = (i..nx).find(|&l| row[l] != -1.0).unwrap_or(nx);
            for (p, value) in row.iter_mut().enumerate().take(end).skip(i) {
                *value = -((end - p) as f32);
            }
            i = end;
        }
    }
    *volume = volume.with_values(values);
}

/// Mark control points as passive when no voxel in their bounding box (over
/// all frames) is above `padding`. Other statuses are left untouched.
pub fn mark_passive_control_points<B: Backend>(
    volume: &ScalarVolume<B>,
    padding: f32,
    ffd: &mut FreeFormTransformation3D,
) {
    let [nx, ny, nz, nt] = volume.dims();
    let values = volume.to_values();
    let value = |x: usize, y: usize, z: usize, t: usize| values[((t * nz + z) * ny + y) * nx + x];

    let [cx, cy, cz] = ffd.dims();
    let mut passive = 0;
    for k in 0..cz {
        for j in 0..cy {
            for i in 0..cx {
                let index = ffd.lattice_to_index(i, j, k);
                let occupied = ffd
                    .bounding_box(index, volume.geometry(), [nx, ny, nz])
                    .is_some_and(|(min, max)| {
                        (0..nt).any(|t| {
                            (min[2]..=max[2]).any(|z| {
                                (min[1]..=max[1])
                                    .any(|y| (min[0]..=max[0]).any(|x| value(x, y, z, t) > padding))
                            })
                        })
                    });
                if !occupied {
                    ffd.put_status(i, j, k, ControlPointStatus::Passive);
                    passive += 1;
                }
            }
        }
    }
    info!(
        "Control points: {} active, {} marked passive",
        ffd.number_of_active(),
        passive
    );
}

fn ceil_div(a: i32, b: i32) -> i32 {
    (a as f64 / b as f64).ceil() as i32
}
