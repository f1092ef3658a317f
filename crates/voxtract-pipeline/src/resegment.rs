//! Intensity resegmentation.
//!
//! Restricts the intensity mask to voxels whose image value falls inside
//! a window, typically to pin a tissue range (for example soft tissue in
//! CT) regardless of how the delineated contour was drawn. Only the
//! intensity mask changes; the morphological mask keeps the delineated
//! shape.

use crate::step::IntensityRange;
use crate::volume::{ImageVolume, MaskVolume};

/// Drop intensity-mask voxels outside `range`.
///
/// Returns how many voxels were removed. The caller is responsible for
/// reacting to a mask that ends up empty.
pub fn resegment(image: &ImageVolume, mask: &mut MaskVolume, range: IntensityRange) -> usize {
    let before = mask.voxel_count();
    mask.retain_where(image, |value| range.contains(f64::from(value)));
    before - mask.voxel_count()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::volume::VolumeGeometry;
    use ndarray::Array3;

    fn ramp_image() -> ImageVolume {
        let mut value = -3.0_f32;
        let data = Array3::from_shape_simple_fn((2, 2, 2), || {
            value += 1.0;
            value
        });
        ImageVolume::new(data, VolumeGeometry::default())
    }

    #[test]
    fn window_keeps_only_in_range_voxels() {
        let image = ramp_image(); // values -2..=5
        let mut mask = MaskVolume::full_cover(&image);
        let removed = resegment(
            &image,
            &mut mask,
            IntensityRange {
                min: Some(0.0),
                max: Some(3.0),
            },
        );
        assert_eq!(removed, 4);
        assert_eq!(mask.voxel_count(), 4);
    }

    #[test]
    fn half_open_window_keeps_everything_above_the_floor() {
        let image = ramp_image();
        let mut mask = MaskVolume::full_cover(&image);
        resegment(
            &image,
            &mut mask,
            IntensityRange {
                min: Some(-2.0),
                max: None,
            },
        );
        assert_eq!(mask.voxel_count(), 8);
    }

    #[test]
    fn disjoint_window_empties_the_mask() {
        let image = ramp_image();
        let mut mask = MaskVolume::full_cover(&image);
        let removed = resegment(
            &image,
            &mut mask,
            IntensityRange {
                min: Some(100.0),
                max: Some(200.0),
            },
        );
        assert_eq!(removed, 8);
        assert!(mask.is_empty());
    }
}
