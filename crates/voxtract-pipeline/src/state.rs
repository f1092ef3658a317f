//! Per-configuration execution state.
//!
//! Every configuration in a run starts from the same loaded image and
//! mask but executes on its own [`PipelineState`], created fresh by the
//! engine and dropped when the configuration finishes. Nothing here
//! outlives a configuration, which is what keeps runs independent and
//! repeatable.

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::binarize::binarize;
use crate::discretise::DiscretisationInfo;
use crate::error::PipelineError;
use crate::step::StepKind;
use crate::volume::{ImageVolume, MaskVolume};

/// Threshold applied to a fuzzy mask source when no binarize step has
/// chosen one.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.5;

/// Tolerance when matching voxel intensities against the sentinel.
const SENTINEL_TOLERANCE: f64 = 1e-6;

/// Execution phase of one configuration, reported in the run log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// State created, no step has run.
    Initialized,
    /// At least one preprocessing step has run.
    Preprocessing,
    /// A discretise step has produced grades.
    Discretised,
    /// The terminal extraction step is running or has run.
    FeatureExtraction,
    /// Every step finished.
    Completed,
    /// A step failed; execution of this configuration stopped.
    Failed,
}

/// Which voxels of the loaded image carry trustworthy intensities.
///
/// Exports from delineation tools sometimes blank everything outside
/// the region of interest with a placeholder intensity. Trusting those
/// voxels would bleed the placeholder into interpolation and filter
/// responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Every voxel is trusted.
    #[default]
    FullImage,
    /// Only voxels inside the supplied mask are trusted.
    RoiOnly,
    /// Voxels holding the sentinel placeholder intensity are distrusted.
    AutoDetect,
}

/// How the region of interest was supplied to a run.
///
/// Both variants live on the image grid. A fuzzy source is thresholded
/// at [`DEFAULT_FUZZY_THRESHOLD`] when the run starts; a binarize step
/// re-thresholds it from the retained probabilities.
#[derive(Debug, Clone)]
pub enum MaskInput {
    /// Binary membership.
    Binary(Array3<bool>),
    /// Membership probabilities in `[0, 1]`.
    Fuzzy(Array3<f32>),
}

/// Everything one configuration's execution reads and mutates.
#[derive(Debug, Clone)]
pub struct PipelineState {
    /// Working image. A discretise step replaces intensities with grade
    /// numbers.
    pub image: ImageVolume,
    /// Continuous intensities as they were when discretisation ran.
    pub raw_image: Option<ImageVolume>,
    /// Delineated shape. Changed only by resample, largest-component
    /// and binarize steps.
    pub morph_mask: MaskVolume,
    /// Intensity mask, additionally narrowed by resegment and outlier
    /// steps.
    pub intensity_mask: MaskVolume,
    /// Retained fuzzy mask source, resampled alongside the image so a
    /// later binarize step can re-threshold it.
    pub fuzzy_source: Option<Array3<f32>>,
    /// Voxels whose intensity is trustworthy; `None` means all of them.
    pub validity: Option<Array3<bool>>,
    /// How validity was established.
    pub source_mode: SourceMode,
    /// The placeholder intensity auto-detection looked for.
    pub sentinel: f64,
    /// Whether auto-detection actually found sentinel voxels.
    pub sentinel_detected: bool,
    /// What a discretise step established, if one ran.
    pub discretisation: Option<DiscretisationInfo>,
    /// Lower bound of the most recent resegment window, anchoring
    /// fixed-bin-size grades.
    pub resegment_floor: Option<f64>,
    /// Names of response filters applied so far, in order.
    pub applied_filters: Vec<String>,
    /// Where this configuration currently stands.
    pub phase: Phase,
}

impl PipelineState {
    /// Build the starting state shared by every configuration of a run.
    ///
    /// Fails when the mask grid does not match the image or the mask
    /// selects nothing; both conditions doom every configuration, so the
    /// engine rejects the whole run eagerly.
    pub(crate) fn initialize(
        image: &ImageVolume,
        mask: Option<&MaskInput>,
        source_mode: SourceMode,
        sentinel: f64,
    ) -> Result<Self, PipelineError> {
        let morph_mask = match mask {
            None => MaskVolume::full_cover(image),
            Some(MaskInput::Binary(data)) => {
                ensure_same_dims(image, data.dim())?;
                MaskVolume::new(data.clone(), image.geometry)
            }
            Some(MaskInput::Fuzzy(data)) => {
                ensure_same_dims(image, data.dim())?;
                binarize(data, image.geometry, DEFAULT_FUZZY_THRESHOLD)
            }
        };
        if morph_mask.is_empty() {
            return Err(PipelineError::EmptyMask);
        }
        let fuzzy_source = match mask {
            Some(MaskInput::Fuzzy(data)) => Some(data.clone()),
            _ => None,
        };
        let (validity, sentinel_detected) =
            source_validity(image, &morph_mask, source_mode, sentinel);
        if sentinel_detected {
            debug!("detected sentinel intensity {sentinel}; excluding padding voxels");
        }

        Ok(Self {
            image: image.clone(),
            raw_image: None,
            intensity_mask: morph_mask.clone(),
            morph_mask,
            fuzzy_source,
            validity,
            source_mode,
            sentinel,
            sentinel_detected,
            discretisation: None,
            resegment_floor: None,
            applied_filters: Vec::new(),
            phase: Phase::Initialized,
        })
    }

    /// The continuous-intensity image, regardless of discretisation.
    #[must_use]
    pub fn continuous_image(&self) -> &ImageVolume {
        self.raw_image.as_ref().unwrap_or(&self.image)
    }

    /// Undo an earlier discretisation, restoring continuous intensities.
    ///
    /// Image-mutating steps scheduled after a discretise step operate on
    /// continuous values; the stale grades and their info are dropped.
    pub(crate) fn revert_discretisation(&mut self) {
        if let Some(raw) = self.raw_image.take() {
            debug!("image mutated after discretisation; reverting to continuous intensities");
            self.image = raw;
            self.discretisation = None;
        }
    }

    /// Fail with [`PipelineError::EmptyRoi`] if either mask lost its
    /// last voxel.
    pub(crate) fn ensure_roi(&self, step: StepKind) -> Result<(), PipelineError> {
        if self.morph_mask.is_empty() || self.intensity_mask.is_empty() {
            return Err(PipelineError::EmptyRoi { step });
        }
        Ok(())
    }
}

fn ensure_same_dims(
    image: &ImageVolume,
    mask_dims: (usize, usize, usize),
) -> Result<(), PipelineError> {
    if image.data.dim() == mask_dims {
        return Ok(());
    }
    Err(PipelineError::MismatchedGrid {
        image_dims: image.dims(),
        mask_dims: [mask_dims.0, mask_dims.1, mask_dims.2],
    })
}

/// Establish which voxels carry trustworthy intensities.
fn source_validity(
    image: &ImageVolume,
    morph_mask: &MaskVolume,
    source_mode: SourceMode,
    sentinel: f64,
) -> (Option<Array3<bool>>, bool) {
    match source_mode {
        SourceMode::FullImage => (None, false),
        SourceMode::RoiOnly => (Some(morph_mask.data.clone()), false),
        SourceMode::AutoDetect => {
            let flags = image
                .data
                .mapv(|value| (f64::from(value) - sentinel).abs() > SENTINEL_TOLERANCE);
            if flags.iter().all(|&trusted| trusted) {
                (None, false)
            } else {
                (Some(flags), true)
            }
        }
    }
}
