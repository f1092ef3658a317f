//! First-order statistics over continuous intensities.

use voxtract_pipeline::{CalculatorError, FamilyInput, FamilyResults, FeatureFamily};

use crate::roi;

const FAMILY: FeatureFamily = FeatureFamily::Intensity;

/// Compute the intensity family over the intensity mask.
///
/// # Errors
///
/// Returns [`CalculatorError::Failed`] when the intensity mask selects
/// no voxels.
#[allow(clippy::cast_precision_loss)] // voxel counts are far below 2^52
pub fn compute(input: &FamilyInput<'_>) -> Result<FamilyResults, CalculatorError> {
    let mut values = roi::masked_values(input.image, input.intensity_mask);
    if values.is_empty() {
        return Err(CalculatorError::Failed {
            family: FAMILY,
            reason: "intensity mask selects no voxels".to_owned(),
        });
    }
    values.sort_unstable_by(f64::total_cmp);
    let n = values.len() as f64;

    let m = roi::moments(&values);
    let minimum = values[0];
    let maximum = values[values.len() - 1];
    let p10 = roi::percentile(&values, 10.0);
    let p90 = roi::percentile(&values, 90.0);

    let mean_abs_dev = values.iter().map(|v| (v - m.mean).abs()).sum::<f64>() / n;
    let energy = values.iter().map(|v| v * v).sum::<f64>();
    let cov = if m.mean.abs() > f64::EPSILON {
        m.variance.sqrt() / m.mean
    } else {
        0.0
    };

    Ok([
        ("mean", m.mean),
        ("variance", m.variance),
        ("skewness", m.skewness),
        ("kurtosis", m.kurtosis),
        ("median", roi::percentile(&values, 50.0)),
        ("minimum", minimum),
        ("maximum", maximum),
        ("percentile10", p10),
        ("percentile90", p90),
        (
            "interquartile_range",
            roi::percentile(&values, 75.0) - roi::percentile(&values, 25.0),
        ),
        ("range", maximum - minimum),
        ("mean_absolute_deviation", mean_abs_dev),
        ("robust_mean_absolute_deviation", robust_mad(&values, p10, p90)),
        ("energy", energy),
        ("root_mean_square", (energy / n).sqrt()),
        ("coefficient_of_variation", cov),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_owned(), value))
    .collect())
}

/// Mean absolute deviation restricted to the decile-trimmed sample.
#[allow(clippy::cast_precision_loss)]
fn robust_mad(sorted: &[f64], p10: f64, p90: f64) -> f64 {
    let trimmed: Vec<f64> = sorted
        .iter()
        .copied()
        .filter(|v| (p10..=p90).contains(v))
        .collect();
    if trimmed.is_empty() {
        return 0.0;
    }
    let n = trimmed.len() as f64;
    let mean = trimmed.iter().sum::<f64>() / n;
    trimmed.iter().map(|v| (v - mean).abs()).sum::<f64>() / n
}
