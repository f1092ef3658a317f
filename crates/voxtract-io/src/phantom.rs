//! Deterministic synthetic volumes for demos and tests.

use ndarray::Array3;
use voxtract_pipeline::{ImageVolume, MaskVolume, VolumeGeometry};

/// Intensity added inside the sphere's outer shell.
const SHELL_BOOST: f32 = 60.0;
/// Intensity added inside the sphere's core.
const CORE_BOOST: f32 = 120.0;

/// A layered sphere sitting in a linear background gradient.
///
/// The image is an `edge`-cubed grid at 1 mm isotropic spacing. The
/// background ramps along all three axes; a centred sphere of radius
/// `0.35 * edge` adds [`SHELL_BOOST`], its inner half-radius core adds
/// [`CORE_BOOST`]. The mask selects exactly the sphere. Identical calls
/// produce identical volumes.
#[must_use]
#[allow(clippy::cast_precision_loss)] // grid extents are tiny
pub fn sphere_phantom(edge: usize) -> (ImageVolume, MaskVolume) {
    let edge = edge.max(1);
    let geometry = VolumeGeometry::isotropic([1.0; 3]);
    let centre = (edge - 1) as f64 / 2.0;
    let radius = edge as f64 * 0.35;
    let radius_sq = radius * radius;
    let core_sq = radius_sq / 4.0;

    let dims = (edge, edge, edge);
    let mut data = Array3::<f32>::zeros(dims);
    let mut selected = Array3::<bool>::from_elem(dims, false);
    for ((i, j, k), value) in data.indexed_iter_mut() {
        let di = i as f64 - centre;
        let dj = j as f64 - centre;
        let dk = k as f64 - centre;
        let dist_sq = dk.mul_add(dk, dj.mul_add(dj, di * di));

        let mut intensity = (i + j + k) as f32;
        if dist_sq <= radius_sq {
            selected[[i, j, k]] = true;
            intensity += if dist_sq <= core_sq {
                CORE_BOOST
            } else {
                SHELL_BOOST
            };
        }
        *value = intensity;
    }

    (
        ImageVolume::new(data, geometry),
        MaskVolume::new(selected, geometry),
    )
}
