//! Fuzzy mask thresholding.
//!
//! Segmentation models often emit per-voxel probabilities rather than
//! hard membership. Binarization turns such a fuzzy mask source into the
//! binary masks the rest of the pipeline works with: a voxel is selected
//! when its probability reaches the threshold.

use ndarray::Array3;

use crate::volume::{MaskVolume, VolumeGeometry};

/// Threshold a probability grid into a binary mask.
#[must_use = "returns the binarized mask"]
pub fn binarize(fuzzy: &Array3<f32>, geometry: VolumeGeometry, threshold: f64) -> MaskVolume {
    let data = fuzzy.mapv(|probability| f64::from(probability) >= threshold);
    MaskVolume::new(data, geometry)
}
