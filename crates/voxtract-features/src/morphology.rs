//! Shape and size of the morphological ROI.
//!
//! All features derive from the morphological mask and the physical grid;
//! the two intensity-weighted features additionally read continuous
//! intensities under the intensity mask. Surface area counts exposed
//! voxel faces, so values are comparable across runs of the same grid
//! but deliberately coarser than a meshed surface.

use std::f64::consts::PI;

use voxtract_pipeline::{
    CalculatorError, FamilyInput, FamilyResults, FeatureFamily, ImageVolume, MaskVolume,
    VolumeGeometry,
};

use crate::roi;

const FAMILY: FeatureFamily = FeatureFamily::Morphology;

/// Compute the morphology family.
///
/// # Errors
///
/// Returns [`CalculatorError::Failed`] when either mask selects no
/// voxels.
#[allow(clippy::cast_precision_loss)] // voxel counts are far below 2^52
pub fn compute(input: &FamilyInput<'_>) -> Result<FamilyResults, CalculatorError> {
    if input.morph_mask.is_empty() {
        return Err(empty_mask("morphological"));
    }
    if input.intensity_mask.is_empty() {
        return Err(empty_mask("intensity"));
    }

    let volume = input.morph_mask.voxel_count() as f64 * input.morph_mask.geometry.voxel_volume();
    let (area, surface) = exposed_surface(input.morph_mask);
    let sphere_area = (36.0 * PI * volume * volume).cbrt();

    let intensities = roi::masked_values(input.image, input.intensity_mask);
    let mean_intensity = intensities.iter().sum::<f64>() / intensities.len() as f64;

    let shape_centre = geometric_centre(input.morph_mask);
    let mass_centre = weighted_centre(input.image, input.intensity_mask);
    let com_shift = mass_centre.map_or(0.0, |c| distance_sq(shape_centre, c).sqrt());

    Ok([
        ("volume_mm3", volume),
        ("surface_area_mm2", area),
        ("surface_to_volume_ratio", area / volume),
        ("compactness1", volume / (PI.sqrt() * area.powi(3).sqrt())),
        ("compactness2", 36.0 * PI * volume * volume / area.powi(3)),
        ("spherical_disproportion", area / sphere_area),
        ("sphericity", sphere_area / area),
        ("maximum_diameter_mm", maximum_diameter(&surface)),
        ("centre_of_mass_shift_mm", com_shift),
        ("integrated_intensity", mean_intensity * volume),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_owned(), value))
    .collect())
}

fn empty_mask(which: &str) -> CalculatorError {
    CalculatorError::Failed {
        family: FAMILY,
        reason: format!("{which} mask selects no voxels"),
    }
}

/// Total exposed-face area and the centres of all surface voxels.
fn exposed_surface(mask: &MaskVolume) -> (f64, Vec<[f64; 3]>) {
    let [sx, sy, sz] = mask.geometry.spacing;
    let face = [sy * sz, sx * sz, sx * sy];
    let dims = mask.data.dim();
    let mut area = 0.0;
    let mut surface = Vec::new();
    for ((i, j, k), &inside) in mask.data.indexed_iter() {
        if !inside {
            continue;
        }
        let mut exposed = 0.0;
        if i == 0 || !mask.data[[i - 1, j, k]] {
            exposed += face[0];
        }
        if i + 1 == dims.0 || !mask.data[[i + 1, j, k]] {
            exposed += face[0];
        }
        if j == 0 || !mask.data[[i, j - 1, k]] {
            exposed += face[1];
        }
        if j + 1 == dims.1 || !mask.data[[i, j + 1, k]] {
            exposed += face[1];
        }
        if k == 0 || !mask.data[[i, j, k - 1]] {
            exposed += face[2];
        }
        if k + 1 == dims.2 || !mask.data[[i, j, k + 1]] {
            exposed += face[2];
        }
        if exposed > 0.0 {
            surface.push(voxel_centre(&mask.geometry, (i, j, k)));
        }
        area += exposed;
    }
    (area, surface)
}

/// Largest pairwise distance between surface voxel centres.
fn maximum_diameter(surface: &[[f64; 3]]) -> f64 {
    let mut max_sq = 0.0_f64;
    for (index, &a) in surface.iter().enumerate() {
        for &b in &surface[index + 1..] {
            max_sq = max_sq.max(distance_sq(a, b));
        }
    }
    max_sq.sqrt()
}

/// Unweighted centroid of the morphological mask, in scanner space.
#[allow(clippy::cast_precision_loss)]
fn geometric_centre(mask: &MaskVolume) -> [f64; 3] {
    let mut sum = [0.0; 3];
    let mut count = 0.0;
    for (at, &inside) in mask.data.indexed_iter() {
        if inside {
            let centre = voxel_centre(&mask.geometry, at);
            for axis in 0..3 {
                sum[axis] += centre[axis];
            }
            count += 1.0;
        }
    }
    sum.map(|s| s / count)
}

/// Intensity-weighted centroid over the intensity mask, or `None` when
/// the weights cancel out.
fn weighted_centre(image: &ImageVolume, mask: &MaskVolume) -> Option<[f64; 3]> {
    let mut sum = [0.0; 3];
    let mut weight = 0.0;
    for (at, &inside) in mask.data.indexed_iter() {
        if inside {
            let w = f64::from(image.data[at]);
            let centre = voxel_centre(&image.geometry, at);
            for axis in 0..3 {
                sum[axis] = w.mul_add(centre[axis], sum[axis]);
            }
            weight += w;
        }
    }
    (weight.abs() > 1e-9).then(|| sum.map(|s| s / weight))
}

#[allow(clippy::cast_precision_loss)]
fn voxel_centre(geometry: &VolumeGeometry, at: (usize, usize, usize)) -> [f64; 3] {
    [
        (at.0 as f64).mul_add(geometry.spacing[0], geometry.origin[0]),
        (at.1 as f64).mul_add(geometry.spacing[1], geometry.origin[1]),
        (at.2 as f64).mul_add(geometry.spacing[2], geometry.origin[2]),
    ]
}

fn distance_sq(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dz.mul_add(dz, dy.mul_add(dy, dx * dx))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndarray::Array3;

    use super::*;

    fn cube(dims: (usize, usize, usize), spacing: [f64; 3]) -> (ImageVolume, MaskVolume) {
        let geometry = VolumeGeometry::isotropic(spacing);
        let count = dims.0 * dims.1 * dims.2;
        #[allow(clippy::cast_precision_loss)]
        let values: Vec<f32> = (0..count).map(|v| v as f32).collect();
        let image = ImageVolume::new(Array3::from_shape_vec(dims, values).unwrap(), geometry);
        let mask = MaskVolume::new(Array3::from_elem(dims, true), geometry);
        (image, mask)
    }

    fn input<'a>(image: &'a ImageVolume, mask: &'a MaskVolume) -> FamilyInput<'a> {
        FamilyInput {
            image,
            discretised: None,
            discretisation: None,
            morph_mask: mask,
            intensity_mask: mask,
        }
    }

    #[test]
    fn unit_voxel_geometry() {
        let (image, mask) = cube((1, 1, 1), [1.0; 3]);
        let features = compute(&input(&image, &mask)).unwrap();

        assert!((features["volume_mm3"] - 1.0).abs() < 1e-12);
        assert!((features["surface_area_mm2"] - 6.0).abs() < 1e-12);
        assert!((features["surface_to_volume_ratio"] - 6.0).abs() < 1e-12);
        assert!((features["maximum_diameter_mm"]).abs() < 1e-12);
        let expected_sphericity = (36.0 * PI).cbrt() / 6.0;
        assert!((features["sphericity"] - expected_sphericity).abs() < 1e-9);
    }

    #[test]
    fn cube_of_eight_voxels() {
        let (image, mask) = cube((2, 2, 2), [1.0; 3]);
        let features = compute(&input(&image, &mask)).unwrap();

        assert!((features["volume_mm3"] - 8.0).abs() < 1e-12);
        assert!((features["surface_area_mm2"] - 24.0).abs() < 1e-12);
        assert!(
            (features["maximum_diameter_mm"] - 3.0_f64.sqrt()).abs() < 1e-9,
            "corner-to-corner centre distance of a 2x2x2 cube"
        );
    }

    #[test]
    fn anisotropic_spacing_weights_faces() {
        let (image, mask) = cube((1, 1, 1), [1.0, 2.0, 3.0]);
        let features = compute(&input(&image, &mask)).unwrap();

        assert!((features["volume_mm3"] - 6.0).abs() < 1e-12);
        // Two faces per axis: 2*(2*3) + 2*(1*3) + 2*(1*2).
        assert!((features["surface_area_mm2"] - 22.0).abs() < 1e-12);
    }

    #[test]
    fn sphericity_cubed_matches_compactness2() {
        let (image, mask) = cube((3, 2, 2), [1.0; 3]);
        let features = compute(&input(&image, &mask)).unwrap();

        let cubed = features["sphericity"].powi(3);
        assert!((cubed - features["compactness2"]).abs() < 1e-9);
        assert!(features["sphericity"] < 1.0, "a box is not a sphere");
    }

    #[test]
    fn com_shift_follows_intensity_weighting() {
        let geometry = VolumeGeometry::isotropic([1.0; 3]);
        let image = ImageVolume::new(
            Array3::from_shape_vec((1, 1, 3), vec![0.0, 0.0, 10.0]).unwrap(),
            geometry,
        );
        let mask = MaskVolume::new(Array3::from_elem((1, 1, 3), true), geometry);
        let features = compute(&input(&image, &mask)).unwrap();

        // Geometric centre sits at z = 1; all the weight sits at z = 2.
        assert!((features["centre_of_mass_shift_mm"] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn integrated_intensity_is_mean_times_volume() {
        let geometry = VolumeGeometry::isotropic([1.0; 3]);
        let image = ImageVolume::new(
            Array3::from_shape_vec((1, 1, 4), vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
            geometry,
        );
        let mask = MaskVolume::new(Array3::from_elem((1, 1, 4), true), geometry);
        let features = compute(&input(&image, &mask)).unwrap();

        assert!((features["integrated_intensity"] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn empty_mask_is_rejected() {
        let geometry = VolumeGeometry::default();
        let image = ImageVolume::new(Array3::from_elem((2, 2, 2), 1.0), geometry);
        let mask = MaskVolume::new(Array3::from_elem((2, 2, 2), false), geometry);

        let err = compute(&input(&image, &mask)).unwrap_err();
        assert!(matches!(err, CalculatorError::Failed { .. }));
    }
}
