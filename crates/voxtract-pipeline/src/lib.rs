//! voxtract-pipeline: Pure feature-extraction pipeline core (sans-IO).
//!
//! Runs named preprocessing configurations over a voxel volume:
//! resample -> resegment -> outlier removal -> discretise -> feature
//! extraction, deduplicating feature computation across configurations
//! whose relevant preprocessing is identical.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! volumes and returns structured data. All filesystem interaction
//! lives in `voxtract-io`, and the concrete feature calculators live in
//! `voxtract-features` behind the [`FamilyCalculator`] seam.

pub mod analyzer;
pub mod binarize;
pub mod components;
pub mod diagnostics;
pub mod discretise;
pub mod document;
pub mod engine;
pub mod error;
pub mod family;
pub mod filter;
pub mod outliers;
pub mod plan;
pub mod resample;
pub mod resegment;
pub mod round;
pub mod rules;
pub mod signature;
pub mod state;
pub mod step;
pub mod volume;

pub use analyzer::ConfigurationAnalyzer;
pub use discretise::DiscretisationInfo;
pub use document::{DeduplicationSettings, DocumentError, ExtractionDocument, NamedConfiguration};
pub use engine::{
    ConfigurationResult, ConfigurationStatus, DedupStats, EngineError, EngineOptions,
    ExtractionEngine, FamilyCalculator, FamilyInput, FamilyResults, OnError, RunLogEntry,
    RunOutcome,
};
pub use error::{CalculatorError, PipelineError};
pub use family::FeatureFamily;
pub use plan::{DeduplicationPlan, PlanDocument, PlanSummary};
pub use rules::DeduplicationRules;
pub use signature::PreprocessingSignature;
pub use state::{MaskInput, Phase, SourceMode};
pub use step::{DiscretisationMethod, IntensityRange, Interpolation, Step, StepKind};
pub use volume::{ImageVolume, MaskVolume, VolumeGeometry};

/// Run an extraction document with default engine options.
///
/// Builds an [`ExtractionEngine`] around `calculator` and executes every
/// configuration of `document` against `image`. Construct the engine
/// directly to control the error policy and source-validity handling.
///
/// # Errors
///
/// Returns [`EngineError::Document`] if the document fails validation,
/// [`EngineError::Rules`] if it pins a rules version the registry cannot
/// resolve, and [`EngineError::Input`] if the image/mask pair is
/// unusable for every configuration.
pub fn extract<C: FamilyCalculator>(
    image: &ImageVolume,
    mask: Option<&MaskInput>,
    document: &ExtractionDocument,
    calculator: C,
) -> Result<RunOutcome, EngineError> {
    ExtractionEngine::new(calculator).run(image, mask, document)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct VoxelCounter;

    impl FamilyCalculator for VoxelCounter {
        fn compute(
            &self,
            _family: FeatureFamily,
            input: &FamilyInput<'_>,
        ) -> Result<FamilyResults, CalculatorError> {
            let mut values = FamilyResults::new();
            #[allow(clippy::cast_precision_loss)]
            values.insert(
                "voxels".to_string(),
                input.intensity_mask.voxel_count() as f64,
            );
            Ok(values)
        }
    }

    #[test]
    fn extract_runs_a_document_end_to_end() {
        let image = ImageVolume::new(
            ndarray::Array3::from_elem((3, 3, 3), 1.0),
            VolumeGeometry::default(),
        );
        let document = ExtractionDocument::new(vec![NamedConfiguration::new(
            "whole_image".to_string(),
            vec![Step::ExtractFeatures {
                families: vec![FeatureFamily::Morphology],
            }],
        )]);

        let outcome = extract(&image, None, &document, VoxelCounter).unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].status, ConfigurationStatus::Completed);
        let values = &outcome.results[0].features[&FeatureFamily::Morphology];
        assert!((values["voxels"] - 27.0).abs() < 1e-12);
    }

    #[test]
    fn invalid_documents_are_rejected() {
        let image = ImageVolume::new(
            ndarray::Array3::from_elem((2, 2, 2), 0.0),
            VolumeGeometry::default(),
        );
        let document = ExtractionDocument::new(Vec::new());
        let err = extract(&image, None, &document, VoxelCounter).unwrap_err();
        assert!(matches!(err, EngineError::Document(DocumentError::Empty)));
    }
}
