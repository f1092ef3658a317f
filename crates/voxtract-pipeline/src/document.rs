//! Serialized extraction documents.
//!
//! A document names the configurations to run plus the deduplication
//! settings, including an optional previously computed plan. Documents
//! are versioned; loading an unknown schema version fails eagerly so a
//! newer file format is never half-read.

use serde::{Deserialize, Serialize};

use crate::plan::PlanDocument;
use crate::step::Step;

/// Schema version this build reads and writes.
pub const SCHEMA_VERSION: u32 = 1;

/// Problems loading or validating a document.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// The document was written by an unknown format revision.
    #[error("unsupported document schema version {found} (supported: {supported})")]
    UnsupportedSchema {
        /// Version found in the document.
        found: u32,
        /// Version this build supports.
        supported: u32,
    },

    /// The JSON itself failed to parse.
    #[error("failed to parse document: {0}")]
    Parse(#[from] serde_json::Error),

    /// Two configurations share a name.
    ///
    /// Names key ownership and caching, so they must be unique.
    #[error("duplicate configuration name {name:?}")]
    DuplicateName {
        /// The repeated name.
        name: String,
    },

    /// The document lists no configurations.
    #[error("document contains no configurations")]
    Empty,
}

/// One named, ordered list of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedConfiguration {
    /// Unique name, used in plans, logs and results.
    pub name: String,
    /// Steps in execution order.
    pub steps: Vec<Step>,
}

impl NamedConfiguration {
    /// Bundle a name with its steps.
    #[must_use]
    pub const fn new(name: String, steps: Vec<Step>) -> Self {
        Self { name, steps }
    }
}

/// Deduplication controls carried in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeduplicationSettings {
    /// Master switch; disabled means every pair computes directly.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Rules version to analyze under; `None` resolves to the current
    /// version.
    #[serde(default)]
    pub rules_version: Option<String>,
    /// A plan from an earlier analysis. Used only if it is still fresh
    /// for this document's configurations; restore failures downgrade
    /// to a warning and a fresh analysis.
    #[serde(default)]
    pub last_plan: Option<PlanDocument>,
}

const fn default_enabled() -> bool {
    true
}

impl Default for DeduplicationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            rules_version: None,
            last_plan: None,
        }
    }
}

/// The complete run description a caller hands to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionDocument {
    /// Format revision of this document.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Configurations to execute, in order.
    pub configurations: Vec<NamedConfiguration>,
    /// Deduplication controls.
    #[serde(default)]
    pub deduplication: DeduplicationSettings,
}

const fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl ExtractionDocument {
    /// A document with default deduplication settings.
    #[must_use]
    pub fn new(configurations: Vec<NamedConfiguration>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            configurations,
            deduplication: DeduplicationSettings::default(),
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, DocumentError> {
        let document: Self = serde_json::from_str(text)?;
        document.validate()?;
        Ok(document)
    }

    /// Serialize to pretty-printed JSON.
    ///
    /// Round-trips losslessly through [`Self::from_json`] for valid
    /// documents.
    pub fn to_json(&self) -> Result<String, DocumentError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check document-level invariants: a supported schema version, at
    /// least one configuration, and unique configuration names.
    ///
    /// Per-step parameter problems are deliberately not checked here;
    /// the engine catches those per configuration so one bad
    /// configuration cannot block the rest of the document.
    pub fn validate(&self) -> Result<(), DocumentError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(DocumentError::UnsupportedSchema {
                found: self.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        if self.configurations.is_empty() {
            return Err(DocumentError::Empty);
        }
        let mut seen = std::collections::BTreeSet::new();
        for configuration in &self.configurations {
            if !seen.insert(configuration.name.as_str()) {
                return Err(DocumentError::DuplicateName {
                    name: configuration.name.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::family::FeatureFamily;

    const MINIMAL: &str = r#"{
        "configurations": [
            {
                "name": "only",
                "steps": [
                    {"kind": "extract_features", "parameters": {"families": ["intensity"]}}
                ]
            }
        ]
    }"#;

    #[test]
    fn minimal_document_parses_with_defaults() {
        let document = ExtractionDocument::from_json(MINIMAL).unwrap();
        assert_eq!(document.schema_version, SCHEMA_VERSION);
        assert!(document.deduplication.enabled);
        assert!(document.deduplication.rules_version.is_none());
        assert!(document.deduplication.last_plan.is_none());
        assert_eq!(document.configurations.len(), 1);
        let Step::ExtractFeatures { families } = &document.configurations[0].steps[0] else {
            panic!("expected an extraction step");
        };
        assert_eq!(families, &[FeatureFamily::Intensity]);
    }

    #[test]
    fn future_schema_versions_are_rejected() {
        let raw = MINIMAL.replacen('{', "{\"schema_version\": 2,", 1);
        let err = ExtractionDocument::from_json(&raw).unwrap_err();
        assert!(matches!(
            err,
            DocumentError::UnsupportedSchema { found: 2, .. }
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let document = ExtractionDocument::new(vec![
            NamedConfiguration::new("twin".to_string(), Vec::new()),
            NamedConfiguration::new("twin".to_string(), Vec::new()),
        ]);
        let err = document.validate().unwrap_err();
        assert!(matches!(err, DocumentError::DuplicateName { .. }));
    }

    #[test]
    fn empty_documents_are_rejected() {
        let document = ExtractionDocument::new(Vec::new());
        assert!(matches!(
            document.validate().unwrap_err(),
            DocumentError::Empty
        ));
    }

    #[test]
    fn json_round_trip_preserves_the_document() {
        let document = ExtractionDocument::from_json(MINIMAL).unwrap();
        let text = document.to_json().unwrap();
        let back = ExtractionDocument::from_json(&text).unwrap();
        assert_eq!(back, document);
    }
}
