//! The `.vxl` volume file format.
//!
//! A volume is a single JSON object: `dims` (array extents, C order),
//! `spacing` and `origin` in millimetres, an optional row-major
//! `orientation` matrix defaulting to identity, and a flat `data` array
//! of `dims[0] * dims[1] * dims[2]` values. Spacing components must be
//! positive and finite. Masks use the same format; any non-zero value
//! counts as selected.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::debug;
use voxtract_pipeline::{ImageVolume, MaskVolume, VolumeGeometry};

/// Errors surfaced while reading or writing volume files.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The file could not be read or written.
    #[error("{}: {source}", path.display())]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying filesystem error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid volume document.
    #[error("{}: {source}", path.display())]
    Parse {
        /// The file involved.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The declared dimensions multiply out beyond addressable memory.
    #[error("{}: dims {dims:?} overflow", path.display())]
    DimsOverflow {
        /// The file involved.
        path: PathBuf,
        /// The declared extents.
        dims: [usize; 3],
    },

    /// The data array does not match the declared dimensions.
    #[error("{}: data holds {found} values but dims {dims:?} need {expected}", path.display())]
    ShapeMismatch {
        /// The file involved.
        path: PathBuf,
        /// The declared extents.
        dims: [usize; 3],
        /// Voxel count the extents require.
        expected: usize,
        /// Voxel count the data array holds.
        found: usize,
    },

    /// A spacing component is zero, negative, or non-finite.
    #[error("{}: spacing {spacing:?} must be positive and finite", path.display())]
    InvalidSpacing {
        /// The file involved.
        path: PathBuf,
        /// The declared spacing.
        spacing: [f64; 3],
    },
}

#[derive(Serialize, Deserialize)]
struct VolumeDocument {
    dims: [usize; 3],
    spacing: [f64; 3],
    #[serde(default)]
    origin: [f64; 3],
    #[serde(default = "identity")]
    orientation: [f64; 9],
    data: Vec<f32>,
}

const fn identity() -> [f64; 9] {
    [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
}

/// Load an image volume from a `.vxl` file.
///
/// # Errors
///
/// Returns [`LoadError`] when the file cannot be read, is not a volume
/// document, its data array disagrees with its dimensions, or its
/// spacing is not positive and finite.
pub fn load_volume(path: &Path) -> Result<ImageVolume, LoadError> {
    let (data, geometry) = read_document(path)?;
    debug!(path = %path.display(), dims = ?data.dim(), "loaded volume");
    Ok(ImageVolume::new(data, geometry))
}

/// Load a mask from a `.vxl` file; any non-zero voxel is selected.
///
/// # Errors
///
/// Same failure modes as [`load_volume`].
pub fn load_mask(path: &Path) -> Result<MaskVolume, LoadError> {
    let (data, geometry) = read_document(path)?;
    let selected = data.mapv(|v| v != 0.0);
    debug!(
        path = %path.display(),
        voxels = selected.iter().filter(|&&v| v).count(),
        "loaded mask"
    );
    Ok(MaskVolume::new(selected, geometry))
}

/// Write an image volume as a `.vxl` file.
///
/// # Errors
///
/// Returns [`LoadError::Io`] when the file cannot be written.
pub fn save_volume(path: &Path, volume: &ImageVolume) -> Result<(), LoadError> {
    let document = VolumeDocument {
        dims: volume.dims(),
        spacing: volume.geometry.spacing,
        origin: volume.geometry.origin,
        orientation: volume.geometry.orientation,
        data: volume.data.iter().copied().collect(),
    };
    write_document(path, &document)
}

/// Write a mask as a `.vxl` file with `0`/`1` voxel values.
///
/// # Errors
///
/// Returns [`LoadError::Io`] when the file cannot be written.
pub fn save_mask(path: &Path, mask: &MaskVolume) -> Result<(), LoadError> {
    let dims = mask.data.dim();
    let document = VolumeDocument {
        dims: [dims.0, dims.1, dims.2],
        spacing: mask.geometry.spacing,
        origin: mask.geometry.origin,
        orientation: mask.geometry.orientation,
        data: mask.data.iter().map(|&v| f32::from(u8::from(v))).collect(),
    };
    write_document(path, &document)
}

/// A mask covering every voxel of `image`, on its grid.
#[must_use]
pub fn create_full_mask(image: &ImageVolume) -> MaskVolume {
    MaskVolume::full_cover(image)
}

fn read_document(path: &Path) -> Result<(Array3<f32>, VolumeGeometry), LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document: VolumeDocument =
        serde_json::from_str(&text).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let dims = document.dims;
    let expected = dims[0]
        .checked_mul(dims[1])
        .and_then(|p| p.checked_mul(dims[2]))
        .ok_or(LoadError::DimsOverflow {
            path: path.to_path_buf(),
            dims,
        })?;
    let found = document.data.len();
    let data = Array3::from_shape_vec((dims[0], dims[1], dims[2]), document.data).map_err(
        |_| LoadError::ShapeMismatch {
            path: path.to_path_buf(),
            dims,
            expected,
            found,
        },
    )?;
    // Spacing feeds voxel volumes and resample ratios downstream.
    let spacing = document.spacing;
    if !spacing.iter().all(|&s| s.is_finite() && s > 0.0) {
        return Err(LoadError::InvalidSpacing {
            path: path.to_path_buf(),
            spacing,
        });
    }
    let geometry = VolumeGeometry {
        spacing,
        origin: document.origin,
        orientation: document.orientation,
    };
    Ok((data, geometry))
}

fn write_document(path: &Path, document: &VolumeDocument) -> Result<(), LoadError> {
    let text = serde_json::to_string(document).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "wrote volume");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndarray::Array3;

    use super::*;

    fn sample_volume() -> ImageVolume {
        let geometry = VolumeGeometry {
            spacing: [1.0, 2.0, 3.0],
            origin: [10.0, 0.0, -5.0],
            orientation: identity(),
        };
        let data = Array3::from_shape_vec(
            (2, 2, 2),
            vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0],
        )
        .unwrap();
        ImageVolume::new(data, geometry)
    }

    #[test]
    fn volume_survives_a_save_load_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.vxl");
        let original = sample_volume();

        save_volume(&path, &original).unwrap();
        let loaded = load_volume(&path).unwrap();

        assert_eq!(loaded, original);
    }

    #[test]
    fn mask_round_trips_through_zero_one_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.vxl");
        let mut selected = Array3::from_elem((2, 2, 2), false);
        selected[[0, 1, 0]] = true;
        selected[[1, 1, 1]] = true;
        let original = MaskVolume::new(selected, VolumeGeometry::default());

        save_mask(&path, &original).unwrap();
        let loaded = load_mask(&path).unwrap();

        assert_eq!(loaded.voxel_count(), 2);
        assert_eq!(loaded, original);
    }

    #[test]
    fn orientation_defaults_to_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minimal.vxl");
        fs::write(
            &path,
            r#"{"dims": [1, 1, 2], "spacing": [1.0, 1.0, 1.0], "data": [5.0, 6.0]}"#,
        )
        .unwrap();

        let volume = load_volume(&path).unwrap();
        assert_eq!(volume.geometry.orientation, identity());
        assert_eq!(volume.geometry.origin, [0.0; 3]);
        assert_eq!(volume.data[[0, 0, 1]], 6.0);
    }

    #[test]
    fn short_data_array_is_a_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.vxl");
        fs::write(
            &path,
            r#"{"dims": [2, 2, 2], "spacing": [1.0, 1.0, 1.0], "data": [1.0, 2.0]}"#,
        )
        .unwrap();

        let err = load_volume(&path).unwrap_err();
        assert!(matches!(
            err,
            LoadError::ShapeMismatch {
                expected: 8,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn degenerate_spacing_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for (name, spacing) in [
            ("flat.vxl", "[1.0, 0.0, 1.0]"),
            ("mirrored.vxl", "[-1.0, 1.0, 1.0]"),
        ] {
            let path = dir.path().join(name);
            fs::write(
                &path,
                format!(r#"{{"dims": [1, 1, 2], "spacing": {spacing}, "data": [1.0, 2.0]}}"#),
            )
            .unwrap();

            let err = load_volume(&path).unwrap_err();
            assert!(
                matches!(err, LoadError::InvalidSpacing { .. }),
                "spacing {spacing} should not load: {err}"
            );
            assert!(err.to_string().contains("spacing"));
        }
    }

    #[test]
    fn junk_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.vxl");
        fs::write(&path, "not a volume").unwrap();

        let err = load_volume(&path).unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_volume(Path::new("/nonexistent/volume.vxl")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn full_mask_covers_the_image() {
        let image = sample_volume();
        let mask = create_full_mask(&image);
        assert_eq!(mask.voxel_count(), image.len());
    }
}
