//! Grid resampling.
//!
//! Maps a volume onto a new voxel spacing with voxel-centre alignment.
//! Intensities interpolate with nearest-neighbour or trilinear weights;
//! masks always resample nearest so membership stays binary. Voxels
//! flagged invalid (sentinel padding) never contribute to trilinear
//! averages: their weights are dropped and the remainder renormalized,
//! so placeholder intensities cannot bleed into the resampled image.

use ndarray::Array3;

use crate::step::Interpolation;
use crate::volume::{ImageVolume, MaskVolume, VolumeGeometry};

/// Resample an image onto `new_spacing`.
///
/// Returns the resampled image and, when an input validity mask was
/// given, the validity of the output grid. An output voxel is valid if
/// any valid source voxel contributed to it; fully invalid
/// neighbourhoods fall back to the nearest source value and are marked
/// invalid.
#[must_use = "returns the resampled image"]
pub fn resample_image(
    image: &ImageVolume,
    new_spacing: [f64; 3],
    interpolation: Interpolation,
    validity: Option<&Array3<bool>>,
) -> (ImageVolume, Option<Array3<bool>>) {
    let dims = target_dims(image.dims(), image.geometry.spacing, new_spacing);
    let geometry = retargeted(image.geometry, new_spacing);

    let mut out_validity = validity.map(|_| Array3::from_elem(dims_tuple(dims), true));
    let data = Array3::from_shape_fn(dims_tuple(dims), |(i, j, k)| {
        let pos = source_position([i, j, k], new_spacing, image.geometry.spacing);
        let (value, valid) = match interpolation {
            Interpolation::Nearest => sample_nearest(&image.data, validity, pos),
            Interpolation::Trilinear => sample_trilinear(&image.data, validity, pos),
        };
        if !valid
            && let Some(flags) = out_validity.as_mut()
        {
            flags[[i, j, k]] = false;
        }
        value
    });

    (ImageVolume::new(data, geometry), out_validity)
}

/// Resample a binary mask onto `new_spacing` with nearest-neighbour
/// lookup.
#[must_use = "returns the resampled mask"]
pub fn resample_mask(mask: &MaskVolume, new_spacing: [f64; 3]) -> MaskVolume {
    let dims = {
        let (a, b, c) = mask.data.dim();
        target_dims([a, b, c], mask.geometry.spacing, new_spacing)
    };
    let geometry = retargeted(mask.geometry, new_spacing);
    let data = Array3::from_shape_fn(dims_tuple(dims), |(i, j, k)| {
        let pos = source_position([i, j, k], new_spacing, mask.geometry.spacing);
        mask.data[nearest_index(&mask.data, pos)]
    });
    MaskVolume::new(data, geometry)
}

/// Resample a fuzzy (probability-valued) grid with trilinear weights.
///
/// Used for mask sources that have not been binarized yet; validity
/// handling does not apply to them.
#[must_use = "returns the resampled grid"]
pub fn resample_fuzzy(
    fuzzy: &Array3<f32>,
    geometry: VolumeGeometry,
    new_spacing: [f64; 3],
) -> Array3<f32> {
    let (a, b, c) = fuzzy.dim();
    let dims = target_dims([a, b, c], geometry.spacing, new_spacing);
    Array3::from_shape_fn(dims_tuple(dims), |(i, j, k)| {
        let pos = source_position([i, j, k], new_spacing, geometry.spacing);
        sample_trilinear(fuzzy, None, pos).0
    })
}

fn retargeted(mut geometry: VolumeGeometry, new_spacing: [f64; 3]) -> VolumeGeometry {
    geometry.spacing = new_spacing;
    geometry
}

/// Output grid size preserving physical extent, at least one voxel per
/// axis.
fn target_dims(dims: [usize; 3], old_spacing: [f64; 3], new_spacing: [f64; 3]) -> [usize; 3] {
    let mut target = [1_usize; 3];
    for axis in 0..3 {
        #[allow(clippy::cast_precision_loss)]
        let extent = dims[axis] as f64 * old_spacing[axis];
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let count = (extent / new_spacing[axis]).ceil() as usize;
        target[axis] = count.max(1);
    }
    target
}

const fn dims_tuple(dims: [usize; 3]) -> (usize, usize, usize) {
    (dims[0], dims[1], dims[2])
}

/// Source-grid position of a target voxel centre, in fractional source
/// voxel indices.
fn source_position(index: [usize; 3], new_spacing: [f64; 3], old_spacing: [f64; 3]) -> [f64; 3] {
    let mut pos = [0.0_f64; 3];
    for axis in 0..3 {
        #[allow(clippy::cast_precision_loss)]
        let centre = (index[axis] as f64 + 0.5) * new_spacing[axis];
        pos[axis] = centre / old_spacing[axis] - 0.5;
    }
    pos
}

fn nearest_index<T>(data: &Array3<T>, pos: [f64; 3]) -> [usize; 3] {
    let (a, b, c) = data.dim();
    let bounds = [a, b, c];
    let mut index = [0_usize; 3];
    for axis in 0..3 {
        #[allow(clippy::cast_precision_loss)]
        let max_index = (bounds[axis] - 1) as f64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            index[axis] = pos[axis].round().clamp(0.0, max_index) as usize;
        }
    }
    index
}

fn sample_nearest(
    data: &Array3<f32>,
    validity: Option<&Array3<bool>>,
    pos: [f64; 3],
) -> (f32, bool) {
    let index = nearest_index(data, pos);
    let valid = validity.is_none_or(|flags| flags[index]);
    (data[index], valid)
}

fn sample_trilinear(
    data: &Array3<f32>,
    validity: Option<&Array3<bool>>,
    pos: [f64; 3],
) -> (f32, bool) {
    let (a, b, c) = data.dim();
    let bounds = [a, b, c];

    let mut base = [0_usize; 3];
    let mut frac = [0.0_f64; 3];
    for axis in 0..3 {
        #[allow(clippy::cast_precision_loss)]
        let max_index = (bounds[axis] - 1) as f64;
        let clamped = pos[axis].clamp(0.0, max_index);
        let floor = clamped.floor();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            base[axis] = floor as usize;
        }
        frac[axis] = clamped - floor;
    }

    let mut accumulated = 0.0_f64;
    let mut weight_total = 0.0_f64;
    for corner in 0..8_usize {
        let mut index = [0_usize; 3];
        let mut weight = 1.0_f64;
        for axis in 0..3 {
            let high = corner >> axis & 1 == 1;
            let offset = usize::from(high);
            index[axis] = (base[axis] + offset).min(bounds[axis] - 1);
            weight *= if high { frac[axis] } else { 1.0 - frac[axis] };
        }
        if weight <= 0.0 {
            continue;
        }
        if validity.is_some_and(|flags| !flags[index]) {
            continue;
        }
        accumulated = weight.mul_add(f64::from(data[index]), accumulated);
        weight_total += weight;
    }

    if weight_total > 1e-12 {
        #[allow(clippy::cast_possible_truncation)]
        let value = (accumulated / weight_total) as f32;
        (value, true)
    } else {
        // Every contributing voxel was invalid; fall back to the raw
        // nearest value and flag the output voxel.
        let index = nearest_index(data, pos);
        (data[index], false)
    }
}
