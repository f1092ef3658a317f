//! Grey level discretisation.
//!
//! Quantizes ROI intensities into integer grades `1..=n`, the form the
//! histogram, IVH, and texture families consume. Fixed-bin-number spreads
//! a requested grade count over the observed ROI range; fixed-bin-size
//! anchors equal-width bins at the resegmentation floor when one was set,
//! so grades stay comparable across images of the same protocol.

use ndarray::Zip;

use crate::error::PipelineError;
use crate::step::{DiscretisationMethod, StepKind};
use crate::volume::{ImageVolume, MaskVolume};

/// What a discretise step established, kept in the pipeline state for
/// grade-dependent feature families.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscretisationInfo {
    /// Grade count of the discretised image.
    pub bins_used: u32,
    /// Intensity at the lower edge of the first grade.
    pub floor: f64,
    /// Intensity at the upper edge of the last grade.
    pub ceiling: f64,
    /// Width of one grade in original intensity units.
    pub bin_width: f64,
}

/// Replace ROI intensities with their grade numbers.
///
/// Voxels outside the intensity mask are left untouched; downstream
/// consumers only ever read masked voxels. `resegment_floor` is the lower
/// bound of an earlier resegment window, if any, and anchors
/// fixed-bin-size grades.
pub fn discretise(
    image: &mut ImageVolume,
    mask: &MaskVolume,
    method: DiscretisationMethod,
    resegment_floor: Option<f64>,
) -> Result<DiscretisationInfo, PipelineError> {
    if mask.is_empty() {
        return Err(PipelineError::EmptyRoi {
            step: StepKind::Discretise,
        });
    }
    let (min, max) = roi_range(image, mask);
    match method {
        DiscretisationMethod::FixedBinNumber { bins } => {
            fixed_bin_number(image, mask, bins, min, max)
        }
        DiscretisationMethod::FixedBinSize { width } => {
            let anchor = resegment_floor.unwrap_or(min);
            fixed_bin_size(image, mask, width, anchor)
        }
    }
}

/// Minimum and maximum image intensity over the masked region.
fn roi_range(image: &ImageVolume, mask: &MaskVolume) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    Zip::from(&image.data).and(&mask.data).for_each(|&value, &inside| {
        if inside {
            let value = f64::from(value);
            min = min.min(value);
            max = max.max(value);
        }
    });
    (min, max)
}

#[allow(clippy::cast_possible_truncation)]
fn fixed_bin_number(
    image: &mut ImageVolume,
    mask: &MaskVolume,
    bins: u32,
    min: f64,
    max: f64,
) -> Result<DiscretisationInfo, PipelineError> {
    if bins == 0 {
        return Err(PipelineError::InvalidParameter {
            step: StepKind::Discretise,
            reason: "bin count must be at least 1".to_string(),
        });
    }
    let range = max - min;
    if range <= 0.0 {
        // Flat ROI: a single grade carries every voxel.
        assign_grades(image, mask, |_| 1.0);
        return Ok(DiscretisationInfo {
            bins_used: 1,
            floor: min,
            ceiling: max,
            bin_width: 0.0,
        });
    }
    let bins_f = f64::from(bins);
    assign_grades(image, mask, |value| {
        let scaled = (value - min) / range * bins_f;
        (scaled.floor() + 1.0).clamp(1.0, bins_f)
    });
    Ok(DiscretisationInfo {
        bins_used: bins,
        floor: min,
        ceiling: max,
        bin_width: range / bins_f,
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn fixed_bin_size(
    image: &mut ImageVolume,
    mask: &MaskVolume,
    width: f64,
    anchor: f64,
) -> Result<DiscretisationInfo, PipelineError> {
    if !width.is_finite() || width <= 0.0 {
        return Err(PipelineError::InvalidParameter {
            step: StepKind::Discretise,
            reason: "bin width must be finite and positive".to_string(),
        });
    }
    let mut top_grade = 1_u32;
    Zip::from(&mut image.data)
        .and(&mask.data)
        .for_each(|value, &inside| {
            if inside {
                let grade = (((f64::from(*value) - anchor) / width).floor() + 1.0).max(1.0);
                top_grade = top_grade.max(grade as u32);
                *value = grade as f32;
            }
        });
    Ok(DiscretisationInfo {
        bins_used: top_grade,
        floor: anchor,
        ceiling: f64::from(top_grade).mul_add(width, anchor),
        bin_width: width,
    })
}

/// Apply `grade` to every masked voxel's intensity.
#[allow(clippy::cast_possible_truncation)]
fn assign_grades(image: &mut ImageVolume, mask: &MaskVolume, grade: impl Fn(f64) -> f64) {
    Zip::from(&mut image.data)
        .and(&mask.data)
        .for_each(|value, &inside| {
            if inside {
                *value = grade(f64::from(*value)) as f32;
            }
        });
}
