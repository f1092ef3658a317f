//! Error types shared across the pipeline core.
//!
//! Step execution failures are scoped to one configuration: the engine
//! records them in the run log and continues with the remaining
//! configurations. Only document loading and rules resolution fail a run
//! eagerly, before any configuration executes.

use crate::family::FeatureFamily;
use crate::step::StepKind;

/// Errors raised while executing one configuration's steps.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// A mask-mutating step removed every voxel from the region of
    /// interest. Fatal for the configuration: no partial feature values
    /// are kept regardless of the error policy.
    #[error("region of interest became empty after {step}")]
    EmptyRoi {
        /// The step whose application emptied the mask.
        step: StepKind,
    },

    /// A step carried parameters that fail validation.
    #[error("invalid {step} parameters: {reason}")]
    InvalidParameter {
        /// The offending step kind.
        step: StepKind,
        /// What was wrong with the payload.
        reason: String,
    },

    /// The supplied mask selects no voxels, so no region of interest
    /// exists before any step has run.
    #[error("supplied mask selects no voxels")]
    EmptyMask,

    /// The supplied mask does not live on the image's grid.
    #[error("mask dimensions {mask_dims:?} do not match image dimensions {image_dims:?}")]
    MismatchedGrid {
        /// Image grid dimensions.
        image_dims: [usize; 3],
        /// Mask grid dimensions.
        mask_dims: [usize; 3],
    },

    /// A feature calculator refused or failed the request.
    #[error(transparent)]
    Calculator(#[from] CalculatorError),
}

/// Errors surfaced by [`FamilyCalculator`](crate::engine::FamilyCalculator)
/// implementations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalculatorError {
    /// The family needs discretised intensities, but no discretise step
    /// ran in this configuration.
    #[error("{family} features require a discretise step in the configuration")]
    MissingDiscretisation {
        /// The family that was requested.
        family: FeatureFamily,
    },

    /// The calculator does not implement the requested family.
    #[error("no calculator is registered for the {family} family")]
    Unsupported {
        /// The family that was requested.
        family: FeatureFamily,
    },

    /// The computation itself failed.
    #[error("{family} computation failed: {reason}")]
    Failed {
        /// The family being computed.
        family: FeatureFamily,
        /// Calculator-provided description.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_roi_names_the_failing_step() {
        let err = PipelineError::EmptyRoi {
            step: StepKind::Resegment,
        };
        assert_eq!(
            err.to_string(),
            "region of interest became empty after resegment"
        );
    }

    #[test]
    fn calculator_errors_convert_into_pipeline_errors() {
        let err: PipelineError = CalculatorError::MissingDiscretisation {
            family: FeatureFamily::Texture,
        }
        .into();
        assert!(err.to_string().contains("texture"));
        assert!(err.to_string().contains("discretise"));
    }
}
