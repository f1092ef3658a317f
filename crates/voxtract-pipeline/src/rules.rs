//! Versioned deduplication rules.
//!
//! A rules table records, per feature family, which step kinds influence
//! that family's values. Two configurations whose influencing steps
//! match (in order and parameters) produce identical features for that
//! family, which is the fact the whole deduplication scheme rests on.
//!
//! Tables are immutable once built and versioned for reproducibility: a
//! plan stamped with version `"1.0"` must mean the same thing years
//! later, so historical tables stay frozen here and new knowledge about
//! step influence lands as a new version.

use std::collections::{BTreeMap, BTreeSet};

use crate::family::FeatureFamily;
use crate::step::StepKind;

/// Problems constructing or resolving a rules table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RulesError {
    /// The requested version is not in the registry. Raised eagerly at
    /// resolution time, never silently ignored.
    #[error("unknown deduplication rules version {version:?} (known versions: {known})")]
    UnknownVersion {
        /// The version that was requested.
        version: String,
        /// Comma-separated known versions.
        known: String,
    },

    /// The table has no entry for a family.
    ///
    /// Every family must state its dependencies explicitly; a missing
    /// entry would otherwise read as "depends on nothing" and quietly
    /// merge configurations that differ.
    #[error("rules table {version:?} is missing an entry for the {family} family")]
    MissingFamily {
        /// Version of the offending table.
        version: String,
        /// The absent family.
        family: FeatureFamily,
    },

    /// The table lists the terminal extraction step as a dependency.
    #[error("rules table {version:?} lists extract_features as a dependency of {family}")]
    ExtractionDependency {
        /// Version of the offending table.
        version: String,
        /// The family whose set contains the terminal step.
        family: FeatureFamily,
    },
}

/// An immutable, versioned family-to-step-kinds dependency table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeduplicationRules {
    version: String,
    family_dependencies: BTreeMap<FeatureFamily, BTreeSet<StepKind>>,
}

impl DeduplicationRules {
    /// Version resolved when a document does not pin one.
    pub const CURRENT_VERSION: &'static str = "1.0";

    /// Versions the registry can resolve, newest first.
    pub const KNOWN_VERSIONS: [&'static str; 2] = ["1.0", "0.9"];

    /// The current rules table.
    ///
    /// Morphology and intensity ignore discretisation (their features
    /// read continuous intensities and mask shape); histogram, IVH and
    /// texture depend on every preprocessing kind including
    /// discretisation.
    #[must_use]
    #[allow(clippy::missing_panics_doc, clippy::unreachable)]
    pub fn current() -> Self {
        match Self::for_version(Self::CURRENT_VERSION) {
            Ok(rules) => rules,
            // The registry always resolves its own current version.
            Err(_) => unreachable!("current rules version must resolve"),
        }
    }

    /// Resolve a frozen table by version string.
    pub fn for_version(version: &str) -> Result<Self, RulesError> {
        match version {
            "1.0" => Self::from_table(version, Self::table_v1_0()),
            "0.9" => Self::from_table(version, Self::table_v0_9()),
            other => Err(RulesError::UnknownVersion {
                version: other.to_string(),
                known: Self::KNOWN_VERSIONS.join(", "),
            }),
        }
    }

    /// Build a table from explicit per-family dependency sets.
    ///
    /// Fails unless the table covers every [`FeatureFamily`] and never
    /// names the terminal extraction step.
    pub fn from_table(
        version: &str,
        family_dependencies: BTreeMap<FeatureFamily, BTreeSet<StepKind>>,
    ) -> Result<Self, RulesError> {
        for family in FeatureFamily::ALL {
            let Some(dependencies) = family_dependencies.get(&family) else {
                return Err(RulesError::MissingFamily {
                    version: version.to_string(),
                    family,
                });
            };
            if dependencies.contains(&StepKind::ExtractFeatures) {
                return Err(RulesError::ExtractionDependency {
                    version: version.to_string(),
                    family,
                });
            }
        }
        Ok(Self {
            version: version.to_string(),
            family_dependencies,
        })
    }

    /// The table's version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Step kinds that influence `family`'s feature values.
    #[must_use]
    #[allow(clippy::missing_panics_doc, clippy::expect_used)] // construction validates every family
    pub fn dependencies(&self, family: FeatureFamily) -> &BTreeSet<StepKind> {
        self.family_dependencies
            .get(&family)
            .expect("rules tables cover every family by construction")
    }

    /// Returns `true` if `kind` influences `family`.
    #[must_use]
    pub fn depends_on(&self, family: FeatureFamily, kind: StepKind) -> bool {
        self.dependencies(family).contains(&kind)
    }

    fn table_v1_0() -> BTreeMap<FeatureFamily, BTreeSet<StepKind>> {
        let continuous: BTreeSet<StepKind> = StepKind::PREPROCESSING
            .into_iter()
            .filter(|kind| *kind != StepKind::Discretise)
            .collect();
        let discretised: BTreeSet<StepKind> = StepKind::PREPROCESSING.into_iter().collect();

        let mut table = BTreeMap::new();
        table.insert(FeatureFamily::Morphology, continuous.clone());
        table.insert(FeatureFamily::Intensity, continuous);
        table.insert(FeatureFamily::Histogram, discretised.clone());
        table.insert(FeatureFamily::Ivh, discretised.clone());
        table.insert(FeatureFamily::Texture, discretised);
        table
    }

    /// Frozen historical table predating response filters.
    fn table_v0_9() -> BTreeMap<FeatureFamily, BTreeSet<StepKind>> {
        let mut table = Self::table_v1_0();
        for dependencies in table.values_mut() {
            dependencies.remove(&StepKind::Filter);
        }
        table
    }
}
