//! Statistical outlier removal.
//!
//! Drops intensity-mask voxels whose value lies outside the band
//! `mean ± sigma · stddev`, with both moments computed over the current
//! intensity mask. Run after resegmentation, this trims stray
//! calcifications or reconstruction artefacts that survive the window.

use crate::volume::{ImageVolume, MaskVolume};

/// What an outlier pass did, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierStats {
    /// Voxels removed from the intensity mask.
    pub removed: usize,
    /// ROI mean the band was centred on.
    pub mean: f64,
    /// ROI standard deviation (population) the band width came from.
    pub std_dev: f64,
}

/// Remove voxels beyond `sigma` standard deviations from the ROI mean.
///
/// Returns `None` when the mask is empty (there is no distribution to
/// measure); the mask is left untouched in that case.
pub fn filter_outliers(
    image: &ImageVolume,
    mask: &mut MaskVolume,
    sigma: f64,
) -> Option<OutlierStats> {
    let mut count = 0_usize;
    let mut sum = 0.0_f64;
    let mut sum_squares = 0.0_f64;
    ndarray::Zip::from(&mask.data)
        .and(&image.data)
        .for_each(|&inside, &value| {
            if inside {
                let v = f64::from(value);
                count += 1;
                sum += v;
                sum_squares = v.mul_add(v, sum_squares);
            }
        });
    if count == 0 {
        return None;
    }

    #[allow(clippy::cast_precision_loss)]
    let n = count as f64;
    let mean = sum / n;
    let variance = (sum_squares / n - mean * mean).max(0.0);
    let std_dev = variance.sqrt();
    let band = sigma * std_dev;

    let before = mask.voxel_count();
    mask.retain_where(image, |value| (f64::from(value) - mean).abs() <= band);
    Some(OutlierStats {
        removed: before - mask.voxel_count(),
        mean,
        std_dev,
    })
}
