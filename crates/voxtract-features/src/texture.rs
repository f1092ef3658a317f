//! Grey level co-occurrence and run length texture features.
//!
//! Both matrices merge all thirteen unique 3-D directions at distance
//! one before any feature is read, so a run produces a single value per
//! feature rather than a per-direction table. The co-occurrence matrix
//! is accumulated symmetrically.

use ndarray::Array2;
use voxtract_pipeline::{
    CalculatorError, FamilyInput, FamilyResults, FeatureFamily, ImageVolume, MaskVolume,
};

use crate::roi;

const FAMILY: FeatureFamily = FeatureFamily::Texture;

/// Half of the 26-neighbourhood; the mirrored half is covered by
/// symmetric accumulation.
const DIRECTIONS: [[isize; 3]; 13] = [
    [1, 0, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 1, 0],
    [1, -1, 0],
    [1, 0, 1],
    [1, 0, -1],
    [0, 1, 1],
    [0, 1, -1],
    [1, 1, 1],
    [1, 1, -1],
    [1, -1, 1],
    [1, -1, -1],
];

/// Upper bound on the grade axis of either matrix. Fixed-bin-size
/// discretisation of a wide intensity range can exceed this; such
/// configurations need a coarser binning before texture makes sense.
const MAX_MATRIX_GRADES: u32 = 1024;

/// Compute the texture family over the discretised ROI.
///
/// # Errors
///
/// Returns [`CalculatorError::MissingDiscretisation`] when no discretise
/// step ran, and [`CalculatorError::Failed`] when the grade count
/// exceeds [`MAX_MATRIX_GRADES`] or the ROI holds no neighbouring voxel
/// pair.
#[allow(clippy::cast_possible_truncation)] // bins_used is at most MAX_MATRIX_GRADES here
pub fn compute(input: &FamilyInput<'_>) -> Result<FamilyResults, CalculatorError> {
    let (volume, info) = roi::discretised_volume(FAMILY, input)?;
    if info.bins_used > MAX_MATRIX_GRADES {
        return Err(CalculatorError::Failed {
            family: FAMILY,
            reason: format!(
                "grade count {} exceeds the matrix limit of {MAX_MATRIX_GRADES}",
                info.bins_used
            ),
        });
    }
    let bins = info.bins_used.max(1) as usize;

    let glcm = cooccurrence(volume, input.intensity_mask, bins);
    let glcm_features = glcm_features(&glcm, bins)?;
    let glrlm_features = run_length_features(volume, input.intensity_mask, bins);

    Ok(glcm_features.into_iter().chain(glrlm_features).collect())
}

/// Symmetric co-occurrence counts over all directions.
fn cooccurrence(volume: &ImageVolume, mask: &MaskVolume, bins: usize) -> Array2<f64> {
    let dims = volume.dims();
    let mut matrix = Array2::<f64>::zeros((bins, bins));
    for ((i, j, k), &inside) in mask.data.indexed_iter() {
        if !inside {
            continue;
        }
        let here = [i, j, k];
        let a = grade_index(volume, here, bins);
        for dir in DIRECTIONS {
            let Some(next) = step(here, dir, dims) else {
                continue;
            };
            if !mask.data[next] {
                continue;
            }
            let b = grade_index(volume, next, bins);
            matrix[[a, b]] += 1.0;
            matrix[[b, a]] += 1.0;
        }
    }
    matrix
}

#[allow(clippy::cast_precision_loss)] // grade indices are far below 2^52
fn glcm_features(
    matrix: &Array2<f64>,
    bins: usize,
) -> Result<Vec<(String, f64)>, CalculatorError> {
    let total = matrix.sum();
    if total <= 0.0 {
        return Err(CalculatorError::Failed {
            family: FAMILY,
            reason: "no neighbouring voxel pair inside the region of interest".to_owned(),
        });
    }
    let p = matrix / total;

    let mut marginal = vec![0.0; bins];
    for ((i, _), &v) in p.indexed_iter() {
        marginal[i] += v;
    }
    let mu: f64 = marginal
        .iter()
        .enumerate()
        .map(|(i, &w)| (i + 1) as f64 * w)
        .sum();
    let sigma_sq: f64 = marginal
        .iter()
        .enumerate()
        .map(|(i, &w)| {
            let d = (i + 1) as f64 - mu;
            d * d * w
        })
        .sum();

    let mut joint_entropy = 0.0;
    let mut angular_second_moment = 0.0;
    let mut contrast = 0.0;
    let mut dissimilarity = 0.0;
    let mut inverse_difference = 0.0;
    let mut inverse_difference_moment = 0.0;
    let mut cross_mean = 0.0;
    let mut cluster = [0.0_f64; 3];
    for ((i, j), &v) in p.indexed_iter() {
        if v <= 0.0 {
            continue;
        }
        let gi = (i + 1) as f64;
        let gj = (j + 1) as f64;
        let diff = (gi - gj).abs();
        joint_entropy -= v * v.log2();
        angular_second_moment = v.mul_add(v, angular_second_moment);
        contrast = (v * diff).mul_add(diff, contrast);
        dissimilarity = v.mul_add(diff, dissimilarity);
        inverse_difference += v / (1.0 + diff);
        inverse_difference_moment += v / diff.mul_add(diff, 1.0);
        cross_mean = (v * gi).mul_add(gj, cross_mean);
        let spread = gi + gj - 2.0 * mu;
        cluster[0] = (v * spread).mul_add(spread, cluster[0]);
        cluster[1] += v * spread.powi(3);
        cluster[2] += v * spread.powi(4);
    }
    let correlation = if sigma_sq > f64::EPSILON {
        mu.mul_add(-mu, cross_mean) / sigma_sq
    } else {
        0.0
    };

    Ok(vec![
        ("glcm_joint_entropy".to_owned(), joint_entropy),
        ("glcm_angular_second_moment".to_owned(), angular_second_moment),
        ("glcm_contrast".to_owned(), contrast),
        ("glcm_dissimilarity".to_owned(), dissimilarity),
        ("glcm_inverse_difference".to_owned(), inverse_difference),
        (
            "glcm_inverse_difference_moment".to_owned(),
            inverse_difference_moment,
        ),
        ("glcm_correlation".to_owned(), correlation),
        ("glcm_cluster_tendency".to_owned(), cluster[0]),
        ("glcm_cluster_shade".to_owned(), cluster[1]),
        ("glcm_cluster_prominence".to_owned(), cluster[2]),
    ])
}

/// Grey level run length features over the merged direction set.
#[allow(clippy::cast_precision_loss)] // run and voxel counts are far below 2^52
fn run_length_features(
    volume: &ImageVolume,
    mask: &MaskVolume,
    bins: usize,
) -> Vec<(String, f64)> {
    let dims = volume.dims();
    let longest = dims[0].max(dims[1]).max(dims[2]).max(1);
    let mut matrix = Array2::<f64>::zeros((bins, longest));

    for dir in DIRECTIONS {
        let back = dir.map(|d| -d);
        for ((i, j, k), &inside) in mask.data.indexed_iter() {
            if !inside {
                continue;
            }
            let here = [i, j, k];
            let grade = grade_index(volume, here, bins);
            let continues_backward = step(here, back, dims).is_some_and(|prev| {
                mask.data[prev] && grade_index(volume, prev, bins) == grade
            });
            if continues_backward {
                continue;
            }
            let mut length = 1_usize;
            let mut cursor = here;
            while let Some(next) = step(cursor, dir, dims)
                && mask.data[next]
                && grade_index(volume, next, bins) == grade
            {
                length += 1;
                cursor = next;
            }
            matrix[[grade, (length - 1).min(longest - 1)]] += 1.0;
        }
    }

    let total_runs = matrix.sum().max(1.0);
    let mut short_run = 0.0;
    let mut long_run = 0.0;
    let mut per_grade = vec![0.0; bins];
    let mut per_length = vec![0.0; longest];
    for ((g, r), &count) in matrix.indexed_iter() {
        if count <= 0.0 {
            continue;
        }
        let length = (r + 1) as f64;
        short_run += count / (length * length);
        long_run = (count * length).mul_add(length, long_run);
        per_grade[g] += count;
        per_length[r] += count;
    }
    let grey_level_nonuniformity = per_grade.iter().map(|&x| x * x).sum::<f64>() / total_runs;
    let run_length_nonuniformity = per_length.iter().map(|&x| x * x).sum::<f64>() / total_runs;
    let run_percentage =
        total_runs / (mask.voxel_count().max(1) as f64 * DIRECTIONS.len() as f64);

    vec![
        ("glrlm_short_run_emphasis".to_owned(), short_run / total_runs),
        ("glrlm_long_run_emphasis".to_owned(), long_run / total_runs),
        (
            "glrlm_grey_level_nonuniformity".to_owned(),
            grey_level_nonuniformity,
        ),
        (
            "glrlm_run_length_nonuniformity".to_owned(),
            run_length_nonuniformity,
        ),
        ("glrlm_run_percentage".to_owned(), run_percentage),
    ]
}

/// Zero-based grade of a voxel, clamped into the matrix.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // grades are small positive integers by construction
fn grade_index(volume: &ImageVolume, at: [usize; 3], bins: usize) -> usize {
    let grade = volume.data[at] as usize;
    grade.clamp(1, bins) - 1
}

/// One neighbour step, or `None` at the grid boundary.
fn step(at: [usize; 3], dir: [isize; 3], dims: [usize; 3]) -> Option<[usize; 3]> {
    let mut out = at;
    for axis in 0..3 {
        let moved = at[axis].checked_add_signed(dir[axis])?;
        if moved >= dims[axis] {
            return None;
        }
        out[axis] = moved;
    }
    Some(out)
}
