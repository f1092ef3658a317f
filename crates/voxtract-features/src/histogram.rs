//! First-order statistics over discretised grades.
//!
//! Reads the grade volume a discretise step produced; grade values are
//! `1..=bins_used`. Probability-based features (entropy, uniformity) use
//! the full grade axis, so unused grades lower uniformity the same way
//! they would in a fixed-width histogram.

use voxtract_pipeline::{CalculatorError, FamilyInput, FamilyResults, FeatureFamily};

use crate::roi;

const FAMILY: FeatureFamily = FeatureFamily::Histogram;

/// Compute the histogram family over the discretised ROI.
///
/// # Errors
///
/// Returns [`CalculatorError::MissingDiscretisation`] when no discretise
/// step ran, and [`CalculatorError::Failed`] when the intensity mask
/// selects no voxels.
#[allow(clippy::cast_precision_loss)] // voxel counts are far below 2^52
pub fn compute(input: &FamilyInput<'_>) -> Result<FamilyResults, CalculatorError> {
    let (mut grades, bins) = roi::masked_grades(FAMILY, input)?;
    if grades.is_empty() {
        return Err(CalculatorError::Failed {
            family: FAMILY,
            reason: "intensity mask selects no voxels".to_owned(),
        });
    }
    grades.sort_unstable();
    let n = grades.len() as f64;

    let mut counts = vec![0_usize; bins as usize];
    for &grade in &grades {
        if let Some(slot) = counts.get_mut(grade.saturating_sub(1) as usize) {
            *slot += 1;
        }
    }

    let mut entropy = 0.0;
    let mut uniformity = 0.0;
    for &count in &counts {
        if count > 0 {
            let p = count as f64 / n;
            entropy -= p * p.log2();
            uniformity = p.mul_add(p, uniformity);
        }
    }
    // Lowest grade wins a tie, so the mode is deterministic.
    let mode = counts
        .iter()
        .enumerate()
        .max_by(|(grade_a, a), (grade_b, b)| a.cmp(b).then(grade_b.cmp(grade_a)))
        .map_or(0.0, |(index, _)| (index + 1) as f64);

    let values: Vec<f64> = grades.iter().map(|&g| f64::from(g)).collect();
    let m = roi::moments(&values);
    let minimum = values[0];
    let maximum = values[values.len() - 1];

    Ok([
        ("mean", m.mean),
        ("variance", m.variance),
        ("skewness", m.skewness),
        ("kurtosis", m.kurtosis),
        ("entropy", entropy),
        ("uniformity", uniformity),
        ("mode", mode),
        ("minimum", minimum),
        ("maximum", maximum),
        ("median", roi::percentile(&values, 50.0)),
        ("range", maximum - minimum),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_owned(), value))
    .collect())
}
