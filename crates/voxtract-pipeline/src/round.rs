//! Intensity rounding.
//!
//! Rounds every image voxel to a fixed number of decimals. Useful for
//! forcing scanner-dependent floating point noise out of the data before
//! it can split otherwise identical configurations.

use crate::volume::ImageVolume;

/// Round all intensities to `decimals` places.
///
/// Negative `decimals` rounds left of the decimal point (`-1` rounds to
/// tens). Computation happens in `f64` so single-precision storage does
/// not distort the scale factor.
#[must_use = "returns the rounded image"]
pub fn round_intensities(image: &ImageVolume, decimals: i32) -> ImageVolume {
    let scale = 10.0_f64.powi(decimals);
    let mut out = image.clone();
    out.data.mapv_inplace(|value| {
        #[allow(clippy::cast_possible_truncation)]
        let rounded = ((f64::from(value) * scale).round() / scale) as f32;
        rounded
    });
    out
}
