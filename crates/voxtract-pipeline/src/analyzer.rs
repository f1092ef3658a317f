//! Configuration analysis.
//!
//! The analyzer walks a configuration set once and decides, per
//! `(configuration, family)` pair, whether the pair owns its
//! preprocessing signature (first occurrence computes) or can reuse the
//! results of an earlier configuration with identical relevant
//! preprocessing. Analysis is pure: the same configurations and rules
//! always produce the same plan.

use std::collections::BTreeMap;

use tracing::debug;

use crate::document::NamedConfiguration;
use crate::family::FeatureFamily;
use crate::plan::DeduplicationPlan;
use crate::rules::DeduplicationRules;
use crate::signature::{PreprocessingSignature, configurations_digest};

/// Plans deduplication for an ordered configuration set.
#[derive(Debug)]
pub struct ConfigurationAnalyzer<'a> {
    configurations: &'a [NamedConfiguration],
    rules: &'a DeduplicationRules,
}

impl<'a> ConfigurationAnalyzer<'a> {
    /// Borrow the inputs; nothing is computed until [`Self::analyze`].
    #[must_use]
    pub const fn new(
        configurations: &'a [NamedConfiguration],
        rules: &'a DeduplicationRules,
    ) -> Self {
        Self {
            configurations,
            rules,
        }
    }

    /// Compute the deduplication plan.
    ///
    /// Configurations are visited in document order and families in
    /// canonical order, so ownership lands on the earliest possible
    /// configuration and the result is deterministic. Every pair gets a
    /// signature, including pairs whose relevant step list is empty
    /// (those share the empty signature and dedup across
    /// configurations like any other).
    #[must_use]
    pub fn analyze(&self) -> DeduplicationPlan {
        let mut signatures: BTreeMap<String, BTreeMap<FeatureFamily, PreprocessingSignature>> =
            BTreeMap::new();
        let mut sources: BTreeMap<String, BTreeMap<FeatureFamily, Option<String>>> =
            BTreeMap::new();
        // First configuration seen per (family, signature hash).
        let mut owners: BTreeMap<FeatureFamily, BTreeMap<String, String>> = BTreeMap::new();

        for configuration in self.configurations {
            for family in FeatureFamily::ALL {
                let signature =
                    PreprocessingSignature::for_family(&configuration.steps, family, self.rules);
                let family_owners = owners.entry(family).or_default();
                let source = match family_owners.get(signature.hash()) {
                    Some(owner) => {
                        debug!(
                            "{}/{} matches {} (signature {}); marking for reuse",
                            configuration.name,
                            family,
                            owner,
                            signature.short_hash()
                        );
                        Some(owner.clone())
                    }
                    None => {
                        family_owners
                            .insert(signature.hash().to_string(), configuration.name.clone());
                        None
                    }
                };
                signatures
                    .entry(configuration.name.clone())
                    .or_default()
                    .insert(family, signature);
                sources
                    .entry(configuration.name.clone())
                    .or_default()
                    .insert(family, source);
            }
        }

        let plan = DeduplicationPlan::new(
            self.rules.version().to_string(),
            signatures,
            sources,
            configurations_digest(self.configurations),
        );
        debug!(
            "analyzed {} configurations under rules {}: {}",
            self.configurations.len(),
            self.rules.version(),
            plan.summary()
        );
        plan
    }
}
