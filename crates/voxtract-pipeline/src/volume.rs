//! Volumetric image and mask values shared across the pipeline.
//!
//! An [`ImageVolume`] is a 3-D scalar grid plus the physical geometry
//! needed to interpret it (voxel spacing, origin, orientation). Masks are
//! boolean grids over the same geometry. Both are plain values: every
//! pipeline step consumes and produces them without touching the
//! filesystem, so the core stays sans-IO.

use ndarray::Array3;

/// Physical placement of a voxel grid in scanner space.
///
/// `spacing` follows the array's axis order (`axis0`, `axis1`, `axis2`)
/// in millimetres. The orientation matrix is row-major; the identity
/// matrix means axis-aligned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeGeometry {
    /// Voxel edge lengths in millimetres, one per array axis.
    pub spacing: [f64; 3],
    /// Scanner-space position of the first voxel's centre.
    pub origin: [f64; 3],
    /// Row-major direction cosine matrix.
    pub orientation: [f64; 9],
}

impl VolumeGeometry {
    /// Axis-aligned geometry at the origin with the given spacing.
    #[must_use]
    pub const fn isotropic(spacing: [f64; 3]) -> Self {
        Self {
            spacing,
            origin: [0.0; 3],
            orientation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Volume of a single voxel in cubic millimetres.
    #[must_use]
    pub fn voxel_volume(&self) -> f64 {
        self.spacing[0] * self.spacing[1] * self.spacing[2]
    }
}

impl Default for VolumeGeometry {
    fn default() -> Self {
        Self::isotropic([1.0; 3])
    }
}

/// A 3-D scalar image with physical geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageVolume {
    /// Voxel intensities.
    pub data: Array3<f32>,
    /// Grid geometry.
    pub geometry: VolumeGeometry,
}

impl ImageVolume {
    /// Wrap raw voxel data and its geometry into a volume.
    #[must_use]
    pub const fn new(data: Array3<f32>, geometry: VolumeGeometry) -> Self {
        Self { data, geometry }
    }

    /// Grid dimensions along each axis.
    #[must_use]
    pub fn dims(&self) -> [usize; 3] {
        let (a, b, c) = self.data.dim();
        [a, b, c]
    }

    /// Total number of voxels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the grid holds no voxels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if `other` lives on the same grid (dimensions and
    /// geometry match).
    #[must_use]
    pub fn same_grid(&self, other: &MaskVolume) -> bool {
        self.data.dim() == other.data.dim() && self.geometry == other.geometry
    }
}

/// A boolean region-of-interest mask over a voxel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskVolume {
    /// Voxel membership flags.
    pub data: Array3<bool>,
    /// Grid geometry, matching the image the mask selects from.
    pub geometry: VolumeGeometry,
}

impl MaskVolume {
    /// Wrap raw membership data and its geometry into a mask.
    #[must_use]
    pub const fn new(data: Array3<bool>, geometry: VolumeGeometry) -> Self {
        Self { data, geometry }
    }

    /// A mask covering every voxel of `reference`.
    ///
    /// Used when a run is started without an explicit mask: feature
    /// extraction then treats the whole image as the region of interest.
    #[must_use]
    pub fn full_cover(reference: &ImageVolume) -> Self {
        Self {
            data: Array3::from_elem(reference.data.dim(), true),
            geometry: reference.geometry,
        }
    }

    /// Number of selected voxels.
    #[must_use]
    pub fn voxel_count(&self) -> usize {
        self.data.iter().filter(|&&inside| inside).count()
    }

    /// Returns `true` if no voxel is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|&inside| inside)
    }

    /// Drop every selected voxel whose image intensity fails `keep`.
    ///
    /// The image must live on the same grid as the mask.
    pub fn retain_where(&mut self, image: &ImageVolume, mut keep: impl FnMut(f32) -> bool) {
        ndarray::Zip::from(&mut self.data)
            .and(&image.data)
            .for_each(|inside, &value| {
                if *inside && !keep(value) {
                    *inside = false;
                }
            });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gradient_volume(dims: (usize, usize, usize)) -> ImageVolume {
        let mut index = 0.0_f32;
        let data = Array3::from_shape_simple_fn(dims, || {
            index += 1.0;
            index
        });
        ImageVolume::new(data, VolumeGeometry::default())
    }

    #[test]
    fn voxel_volume_multiplies_spacing() {
        let geometry = VolumeGeometry::isotropic([2.0, 0.5, 1.0]);
        assert!((geometry.voxel_volume() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn full_cover_selects_every_voxel() {
        let image = gradient_volume((3, 4, 5));
        let mask = MaskVolume::full_cover(&image);
        assert_eq!(mask.voxel_count(), 60);
        assert!(!mask.is_empty());
        assert!(image.same_grid(&mask));
    }

    #[test]
    fn retain_where_filters_by_intensity() {
        let image = gradient_volume((2, 2, 2));
        let mut mask = MaskVolume::full_cover(&image);
        mask.retain_where(&image, |value| value <= 4.0);
        assert_eq!(mask.voxel_count(), 4);
    }

    #[test]
    fn empty_mask_reports_empty() {
        let image = gradient_volume((2, 2, 2));
        let mut mask = MaskVolume::full_cover(&image);
        mask.retain_where(&image, |_| false);
        assert!(mask.is_empty());
        assert_eq!(mask.voxel_count(), 0);
    }
}
