//! Preprocessing step vocabulary.
//!
//! Configurations are ordered lists of [`Step`] values. The set of step
//! kinds is closed: documents deserialize straight into these variants,
//! so an unrecognized kind or a malformed parameter payload fails at load
//! time instead of surfacing as a string-dispatch miss mid-run.
//!
//! [`StepKind`] is the parameter-free classification used by the
//! deduplication rules: a family depends on step *kinds*, while
//! signatures hash the full parameterized steps.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::family::FeatureFamily;
use crate::filter::FilterKind;

/// Interpolation used when resampling image intensities.
///
/// Masks always resample with nearest-neighbour regardless of this
/// choice, so membership stays binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Copy the nearest source voxel.
    Nearest,
    /// Weighted average of the eight surrounding source voxels.
    #[default]
    Trilinear,
}

impl Interpolation {
    /// Stable name matching the serialized form.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Trilinear => "trilinear",
        }
    }
}

/// A closed or half-open intensity window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntensityRange {
    /// Inclusive lower bound, or unbounded below when `None`.
    pub min: Option<f64>,
    /// Inclusive upper bound, or unbounded above when `None`.
    pub max: Option<f64>,
}

impl IntensityRange {
    /// Returns `true` if `value` falls inside the window.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

/// How continuous intensities are quantized into grey level grades.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum DiscretisationMethod {
    /// A fixed number of equal-width bins over the observed ROI range.
    FixedBinNumber {
        /// Number of grades to produce.
        bins: u32,
    },
    /// Bins of a fixed intensity width anchored at the ROI floor.
    ///
    /// The grade count is data dependent and is reported back through
    /// the pipeline state after the step runs.
    FixedBinSize {
        /// Width of each bin in intensity units.
        width: f64,
    },
}

/// One preprocessing (or extraction) step of a configuration.
///
/// Serialized form pairs a `kind` tag with a `parameters` payload, which
/// is also the layout the canonical signature encoding uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "parameters", rename_all = "snake_case")]
pub enum Step {
    /// Resample image and masks onto a new voxel spacing.
    Resample {
        /// Target spacing per array axis, in millimetres.
        new_spacing: [f64; 3],
        /// Intensity interpolation scheme.
        #[serde(default)]
        interpolation: Interpolation,
    },
    /// Restrict the intensity mask to a window of image values.
    Resegment {
        /// The window to keep.
        range: IntensityRange,
    },
    /// Drop intensity-mask voxels beyond `sigma` standard deviations
    /// from the ROI mean.
    FilterOutliers {
        /// Width of the kept band in standard deviations.
        sigma: f64,
    },
    /// Quantize ROI intensities into integer grades.
    Discretise {
        /// Binning scheme.
        #[serde(flatten)]
        method: DiscretisationMethod,
    },
    /// Round image intensities to a fixed number of decimals.
    Round {
        /// Decimal places to keep; negative rounds left of the point.
        decimals: i32,
    },
    /// Reduce both masks to their largest connected component.
    KeepLargestComponent,
    /// Threshold a fuzzy mask source into binary membership.
    Binarize {
        /// Probability cutoff in `[0, 1]`.
        threshold: f64,
    },
    /// Convolve the image with a response filter.
    Filter {
        /// Which kernel to apply.
        #[serde(flatten)]
        filter: FilterKind,
    },
    /// Terminal step: compute the requested feature families.
    ///
    /// Its parameters never participate in preprocessing identity; any
    /// option that changes family output must be modelled as a
    /// preprocessing step so it enters the signature.
    ExtractFeatures {
        /// Families to compute for this configuration.
        families: Vec<FeatureFamily>,
    },
}

impl Step {
    /// The parameter-free classification of this step.
    #[must_use]
    pub const fn kind(&self) -> StepKind {
        match self {
            Self::Resample { .. } => StepKind::Resample,
            Self::Resegment { .. } => StepKind::Resegment,
            Self::FilterOutliers { .. } => StepKind::FilterOutliers,
            Self::Discretise { .. } => StepKind::Discretise,
            Self::Round { .. } => StepKind::Round,
            Self::KeepLargestComponent => StepKind::KeepLargestComponent,
            Self::Binarize { .. } => StepKind::Binarize,
            Self::Filter { .. } => StepKind::Filter,
            Self::ExtractFeatures { .. } => StepKind::ExtractFeatures,
        }
    }

    /// Check parameter sanity before execution.
    ///
    /// Violations are recoverable per configuration: the engine records
    /// them in the run log and moves on to the next configuration.
    pub fn validate(&self) -> Result<(), PipelineError> {
        match self {
            Self::Resample { new_spacing, .. } => {
                if new_spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
                    return Err(self.invalid("new_spacing components must be finite and positive"));
                }
            }
            Self::Resegment { range } => {
                if range.min.is_none() && range.max.is_none() {
                    return Err(self.invalid("resegment range requires at least one bound"));
                }
                if let (Some(min), Some(max)) = (range.min, range.max)
                    && min > max
                {
                    return Err(self.invalid("resegment range min exceeds max"));
                }
            }
            Self::FilterOutliers { sigma } => {
                if !sigma.is_finite() || *sigma <= 0.0 {
                    return Err(self.invalid("sigma must be finite and positive"));
                }
            }
            Self::Discretise { method } => match method {
                DiscretisationMethod::FixedBinNumber { bins } => {
                    if *bins == 0 {
                        return Err(self.invalid("bin count must be at least 1"));
                    }
                }
                DiscretisationMethod::FixedBinSize { width } => {
                    if !width.is_finite() || *width <= 0.0 {
                        return Err(self.invalid("bin width must be finite and positive"));
                    }
                }
            },
            Self::Round { decimals } => {
                if decimals.abs() > 12 {
                    return Err(self.invalid("decimals outside the supported ±12 range"));
                }
            }
            Self::Binarize { threshold } => {
                if !threshold.is_finite() || !(0.0..=1.0).contains(threshold) {
                    return Err(self.invalid("threshold must lie in [0, 1]"));
                }
            }
            Self::Filter { filter } => filter.validate().map_err(|reason| PipelineError::InvalidParameter {
                step: StepKind::Filter,
                reason,
            })?,
            Self::KeepLargestComponent => {}
            Self::ExtractFeatures { families } => {
                if families.is_empty() {
                    return Err(self.invalid("at least one feature family must be requested"));
                }
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> PipelineError {
        PipelineError::InvalidParameter {
            step: self.kind(),
            reason: reason.to_string(),
        }
    }
}

/// Parameter-free step classification, the vocabulary of rules tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Grid resampling.
    Resample,
    /// Intensity-window resegmentation.
    Resegment,
    /// Statistical outlier removal.
    FilterOutliers,
    /// Grey level discretisation.
    Discretise,
    /// Intensity rounding.
    Round,
    /// Largest-connected-component reduction.
    KeepLargestComponent,
    /// Fuzzy mask thresholding.
    Binarize,
    /// Response filtering.
    Filter,
    /// Feature extraction (terminal).
    ExtractFeatures,
}

impl StepKind {
    /// Every preprocessing kind, excluding the terminal extraction step.
    pub const PREPROCESSING: [Self; 8] = [
        Self::Resample,
        Self::Resegment,
        Self::FilterOutliers,
        Self::Discretise,
        Self::Round,
        Self::KeepLargestComponent,
        Self::Binarize,
        Self::Filter,
    ];

    /// Stable snake_case name matching the serialized `kind` tag.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Resample => "resample",
            Self::Resegment => "resegment",
            Self::FilterOutliers => "filter_outliers",
            Self::Discretise => "discretise",
            Self::Round => "round",
            Self::KeepLargestComponent => "keep_largest_component",
            Self::Binarize => "binarize",
            Self::Filter => "filter",
            Self::ExtractFeatures => "extract_features",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
