//! Deduplication plans.
//!
//! A plan is the analyzer's output: for every `(configuration, family)`
//! pair, the preprocessing signature and either ownership (this pair
//! computes) or a reference to the configuration whose identical
//! preprocessing already produces the values. Plans are immutable; when
//! the configuration set or rules change, staleness is detected and a
//! fresh plan is built rather than patching the old one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::NamedConfiguration;
use crate::family::FeatureFamily;
use crate::rules::{DeduplicationRules, RulesError};
use crate::signature::{PreprocessingSignature, configurations_digest};

/// Problems restoring a plan from its serialized document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// The document references a rules version the registry cannot
    /// resolve.
    #[error(transparent)]
    UnknownRulesVersion(#[from] RulesError),

    /// Signatures and sources disagree about which pairs exist.
    #[error("plan document is inconsistent: {reason}")]
    Inconsistent {
        /// What disagreed.
        reason: String,
    },
}

/// Per-family signature table for one configuration.
type FamilyTable<V> = BTreeMap<FeatureFamily, V>;

/// Serialized form of a [`DeduplicationPlan`].
///
/// Nested maps keep the JSON readable: configuration name on the outside,
/// family on the inside. A `null` source marks the owning pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDocument {
    /// Rules version the plan was computed under.
    pub rules_version: String,
    /// Signature per `(configuration, family)` pair.
    pub signatures: BTreeMap<String, FamilyTable<PreprocessingSignature>>,
    /// Owner reference per pair; `None` means the pair computes.
    pub sources: BTreeMap<String, FamilyTable<Option<String>>>,
    /// Digest of the configuration set the plan was computed for.
    pub configs_hash: String,
}

/// How many pairs a plan computes versus reuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    /// Pairs that own their signature and compute.
    pub computed: usize,
    /// Pairs that borrow another configuration's results.
    pub reused: usize,
    /// All pairs in the plan.
    pub total: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} computed, {} reused of {} pairs",
            self.computed, self.reused, self.total
        )
    }
}

/// The analyzer's verdict on which feature computations are redundant.
#[derive(Debug, Clone, PartialEq)]
pub struct DeduplicationPlan {
    rules_version: String,
    signatures: BTreeMap<String, FamilyTable<PreprocessingSignature>>,
    sources: BTreeMap<String, FamilyTable<Option<String>>>,
    configs_hash: String,
}

impl DeduplicationPlan {
    pub(crate) const fn new(
        rules_version: String,
        signatures: BTreeMap<String, FamilyTable<PreprocessingSignature>>,
        sources: BTreeMap<String, FamilyTable<Option<String>>>,
        configs_hash: String,
    ) -> Self {
        Self {
            rules_version,
            signatures,
            sources,
            configs_hash,
        }
    }

    /// Version of the rules the plan was computed under.
    #[must_use]
    pub fn rules_version(&self) -> &str {
        &self.rules_version
    }

    /// Digest of the configuration set the plan belongs to.
    #[must_use]
    pub fn configs_hash(&self) -> &str {
        &self.configs_hash
    }

    /// Should this pair run its calculator?
    ///
    /// `true` for owning pairs and for pairs the plan has never seen;
    /// an unknown pair computing directly is always correct, just not
    /// deduplicated.
    #[must_use]
    pub fn should_compute(&self, configuration: &str, family: FeatureFamily) -> bool {
        self.source_entry(configuration, family)
            .is_none_or(|source| source.is_none())
    }

    /// The configuration whose results this pair reuses, if any.
    #[must_use]
    pub fn source(&self, configuration: &str, family: FeatureFamily) -> Option<&str> {
        self.source_entry(configuration, family)
            .and_then(|source| source.as_deref())
    }

    /// The signature recorded for this pair, if the plan covers it.
    #[must_use]
    pub fn signature(
        &self,
        configuration: &str,
        family: FeatureFamily,
    ) -> Option<&PreprocessingSignature> {
        self.signatures
            .get(configuration)
            .and_then(|families| families.get(&family))
    }

    /// Returns `true` when the plan no longer matches the inputs it
    /// would be applied to.
    ///
    /// Staleness is not an error: callers discard the plan and analyze
    /// afresh. Configuration order participates in the digest because
    /// reordering changes first-occurrence ownership.
    #[must_use]
    pub fn is_stale(
        &self,
        configurations: &[NamedConfiguration],
        rules: &DeduplicationRules,
    ) -> bool {
        self.rules_version != rules.version()
            || self.configs_hash != configurations_digest(configurations)
    }

    /// Count owning and reusing pairs.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut computed = 0;
        let mut reused = 0;
        for families in self.sources.values() {
            for source in families.values() {
                if source.is_some() {
                    reused += 1;
                } else {
                    computed += 1;
                }
            }
        }
        PlanSummary {
            computed,
            reused,
            total: computed + reused,
        }
    }

    /// Walk every pair in deterministic order.
    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (&str, FeatureFamily, &PreprocessingSignature, Option<&str>)> {
        self.signatures.iter().flat_map(move |(name, families)| {
            families.iter().map(move |(family, signature)| {
                let source = self.source(name, *family);
                (name.as_str(), *family, signature, source)
            })
        })
    }

    /// Serialize into the persistable document form. Lossless.
    #[must_use]
    pub fn to_document(&self) -> PlanDocument {
        PlanDocument {
            rules_version: self.rules_version.clone(),
            signatures: self.signatures.clone(),
            sources: self.sources.clone(),
            configs_hash: self.configs_hash.clone(),
        }
    }

    /// Rebuild a plan from its document form.
    ///
    /// The rules version must resolve in the registry and the signature
    /// and source tables must cover exactly the same pairs. Stored
    /// hashes are trusted as-is.
    pub fn from_document(document: PlanDocument) -> Result<Self, PlanError> {
        DeduplicationRules::for_version(&document.rules_version)?;

        for (name, families) in &document.signatures {
            let sources = document.sources.get(name).ok_or_else(|| PlanError::Inconsistent {
                reason: format!("configuration {name:?} has signatures but no sources"),
            })?;
            for family in families.keys() {
                if !sources.contains_key(family) {
                    return Err(PlanError::Inconsistent {
                        reason: format!("pair ({name:?}, {family}) has a signature but no source"),
                    });
                }
            }
        }
        for (name, families) in &document.sources {
            let signatures =
                document.signatures.get(name).ok_or_else(|| PlanError::Inconsistent {
                    reason: format!("configuration {name:?} has sources but no signatures"),
                })?;
            for (family, source) in families {
                if !signatures.contains_key(family) {
                    return Err(PlanError::Inconsistent {
                        reason: format!("pair ({name:?}, {family}) has a source but no signature"),
                    });
                }
                if let Some(owner) = source
                    && !document.sources.contains_key(owner)
                {
                    return Err(PlanError::Inconsistent {
                        reason: format!(
                            "pair ({name:?}, {family}) references unknown owner {owner:?}"
                        ),
                    });
                }
            }
        }

        Ok(Self {
            rules_version: document.rules_version,
            signatures: document.signatures,
            sources: document.sources,
            configs_hash: document.configs_hash,
        })
    }

    fn source_entry(&self, configuration: &str, family: FeatureFamily) -> Option<&Option<String>> {
        self.sources
            .get(configuration)
            .and_then(|families| families.get(&family))
    }
}
