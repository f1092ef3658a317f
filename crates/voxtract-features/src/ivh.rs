//! Intensity-volume histogram features.
//!
//! Relates the fraction of ROI volume to the fraction of the observed
//! grade range: `v_x` is the volume fraction holding at least `x`% of
//! the range, `i_x` the grade reached by the hottest `x`% of the
//! volume. A flat ROI has no range, so every `v_x` is zero and every
//! `i_x` collapses to the single grade.

use voxtract_pipeline::{CalculatorError, FamilyInput, FamilyResults, FeatureFamily};

use crate::roi;

const FAMILY: FeatureFamily = FeatureFamily::Ivh;

/// Compute the IVH family over the discretised ROI.
///
/// # Errors
///
/// Returns [`CalculatorError::MissingDiscretisation`] when no discretise
/// step ran, and [`CalculatorError::Failed`] when the intensity mask
/// selects no voxels.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn compute(input: &FamilyInput<'_>) -> Result<FamilyResults, CalculatorError> {
    let (mut grades, _) = roi::masked_grades(FAMILY, input)?;
    if grades.is_empty() {
        return Err(CalculatorError::Failed {
            family: FAMILY,
            reason: "intensity mask selects no voxels".to_owned(),
        });
    }
    grades.sort_unstable();
    let n = grades.len() as f64;
    let lowest = f64::from(grades[0]);
    let spread = f64::from(grades[grades.len() - 1]) - lowest;

    // Volume fraction with at least `fraction` of the grade range.
    let volume_at = |fraction: f64| -> f64 {
        if spread <= 0.0 {
            return 0.0;
        }
        let threshold = fraction.mul_add(spread, lowest) - 1e-9;
        let above = grades.iter().filter(|&&g| f64::from(g) >= threshold).count();
        above as f64 / n
    };
    // Lowest grade reached by the hottest `fraction` of the volume.
    let intensity_at = |fraction: f64| -> f64 {
        let rank = ((fraction * n).ceil() as usize).clamp(1, grades.len());
        f64::from(grades[grades.len() - rank])
    };

    let auc = if spread > 0.0 {
        grades
            .iter()
            .map(|&g| (f64::from(g) - lowest) / spread)
            .sum::<f64>()
            / n
    } else {
        0.0
    };

    let (v10, v90) = (volume_at(0.10), volume_at(0.90));
    let (i10, i90) = (intensity_at(0.10), intensity_at(0.90));

    Ok([
        ("v10", v10),
        ("v25", volume_at(0.25)),
        ("v50", volume_at(0.50)),
        ("v75", volume_at(0.75)),
        ("v90", v90),
        ("i10", i10),
        ("i25", intensity_at(0.25)),
        ("i50", intensity_at(0.50)),
        ("i75", intensity_at(0.75)),
        ("i90", i90),
        ("v10_minus_v90", v10 - v90),
        ("i10_minus_i90", i10 - i90),
        ("auc", auc),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_owned(), value))
    .collect())
}
