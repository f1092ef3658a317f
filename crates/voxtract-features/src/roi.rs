//! Region-of-interest sampling shared by the family calculators.

use ndarray::Zip;
use voxtract_pipeline::{
    CalculatorError, DiscretisationInfo, FamilyInput, FeatureFamily, ImageVolume, MaskVolume,
};

/// Continuous intensities of the voxels selected by `mask`, in array
/// iteration order.
pub(crate) fn masked_values(image: &ImageVolume, mask: &MaskVolume) -> Vec<f64> {
    let mut values = Vec::with_capacity(mask.voxel_count());
    Zip::from(&image.data).and(&mask.data).for_each(|&v, &m| {
        if m {
            values.push(f64::from(v));
        }
    });
    values
}

/// The grade volume and its discretisation record, or the error every
/// grade-dependent family reports when no discretise step ran.
pub(crate) fn discretised_volume<'a>(
    family: FeatureFamily,
    input: &FamilyInput<'a>,
) -> Result<(&'a ImageVolume, DiscretisationInfo), CalculatorError> {
    match (input.discretised, input.discretisation) {
        (Some(volume), Some(info)) => Ok((volume, info)),
        _ => Err(CalculatorError::MissingDiscretisation { family }),
    }
}

/// Grades of the voxels selected by the intensity mask, with the grade
/// count, in array iteration order.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // grades are small positive integers by construction
pub(crate) fn masked_grades(
    family: FeatureFamily,
    input: &FamilyInput<'_>,
) -> Result<(Vec<u32>, u32), CalculatorError> {
    let (volume, info) = discretised_volume(family, input)?;
    let mut grades = Vec::with_capacity(input.intensity_mask.voxel_count());
    Zip::from(&volume.data)
        .and(&input.intensity_mask.data)
        .for_each(|&v, &m| {
            if m {
                grades.push(v as u32);
            }
        });
    Ok((grades, info.bins_used))
}

/// Linearly interpolated percentile of pre-sorted values.
///
/// `p` is a percentage in `0.0..=100.0`; `sorted` must be ascending and
/// non-empty.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn percentile(sorted: &[f64], p: f64) -> f64 {
    let last = sorted.len() - 1;
    let rank = (p / 100.0) * last as f64;
    let lower = (rank.floor() as usize).min(last);
    if lower == last {
        return sorted[last];
    }
    let t = rank - rank.floor();
    sorted[lower].mul_add(1.0 - t, sorted[lower + 1] * t)
}

/// Population central moments of a sample.
pub(crate) struct Moments {
    pub mean: f64,
    pub variance: f64,
    /// Zero for a constant sample.
    pub skewness: f64,
    /// Excess kurtosis; zero for a constant sample.
    pub kurtosis: f64,
}

#[allow(clippy::cast_precision_loss)] // voxel counts are far below 2^52
pub(crate) fn moments(values: &[f64]) -> Moments {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let mut m2 = 0.0;
    let mut m3 = 0.0;
    let mut m4 = 0.0;
    for &v in values {
        let d = v - mean;
        let d2 = d * d;
        m2 += d2;
        m3 += d2 * d;
        m4 += d2 * d2;
    }
    m2 /= n;
    m3 /= n;
    m4 /= n;
    let sd = m2.sqrt();
    Moments {
        mean,
        variance: m2,
        skewness: if sd > 0.0 { m3 / (sd * sd * sd) } else { 0.0 },
        kurtosis: if m2 > 0.0 { m4 / (m2 * m2) - 3.0 } else { 0.0 },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndarray::Array3;
    use voxtract_pipeline::VolumeGeometry;

    use super::*;

    #[test]
    fn masked_values_follow_the_mask() {
        let image = ImageVolume::new(
            Array3::from_shape_vec((1, 1, 4), vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
            VolumeGeometry::default(),
        );
        let mut selected = Array3::from_elem((1, 1, 4), true);
        selected[[0, 0, 2]] = false;
        let mask = MaskVolume::new(selected, VolumeGeometry::default());

        assert_eq!(masked_values(&image, &mask), vec![1.0, 2.0, 4.0]);
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&sorted, 0.0) - 1.0).abs() < 1e-12);
        assert!((percentile(&sorted, 100.0) - 4.0).abs() < 1e-12);
        assert!((percentile(&sorted, 50.0) - 2.5).abs() < 1e-12);
        assert!((percentile(&sorted, 25.0) - 1.75).abs() < 1e-12);
    }

    #[test]
    fn percentile_of_single_value_is_that_value() {
        assert!((percentile(&[7.5], 90.0) - 7.5).abs() < 1e-12);
    }

    #[test]
    fn moments_of_a_symmetric_sample() {
        let m = moments(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((m.mean - 3.0).abs() < 1e-12);
        assert!((m.variance - 2.0).abs() < 1e-12);
        assert!(m.skewness.abs() < 1e-12, "symmetric sample skews to zero");
    }

    #[test]
    fn moments_of_a_constant_sample_are_degenerate_zeros() {
        let m = moments(&[4.0; 6]);
        assert!((m.mean - 4.0).abs() < 1e-12);
        assert!(m.variance.abs() < 1e-12);
        assert!(m.skewness.abs() < 1e-12);
        assert!(m.kurtosis.abs() < 1e-12);
    }
}
