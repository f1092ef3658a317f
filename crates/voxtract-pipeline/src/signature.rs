//! Canonical preprocessing signatures.
//!
//! A signature captures *what was done to the data* before a feature
//! family is computed: the ordered steps that influence the family,
//! normalized and hashed. Equal signatures mean equal preprocessing,
//! which is what lets the analyzer mark one configuration as a source
//! and others as reusers.
//!
//! The canonical encoding is a frozen format, built by hand rather than
//! derived from the wire serialization so that serde attribute changes
//! can never silently re-key every cache. Layout: a JSON object keyed by
//! each step's position index as a string, mapping to `{"kind": …,
//! "parameters": {…}}`; parameter keys sort lexicographically, every
//! numeric encodes as a double, sequences encode as arrays, and the
//! empty step list encodes as `{}`. The hash is the SHA-256 digest of
//! the canonical text, rendered as 64 lowercase hex characters.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

use crate::family::FeatureFamily;
use crate::filter::FilterKind;
use crate::rules::DeduplicationRules;
use crate::step::{DiscretisationMethod, Step, StepKind};

/// A content hash over the normalized steps that shape one family's
/// input.
///
/// Serialized as a plain `{hash, canonical}` pair; deserialization
/// trusts the stored hash rather than recomputing it, so stored plans
/// remain valid even if a later release changes the canonical format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreprocessingSignature {
    hash: String,
    canonical: String,
}

impl PreprocessingSignature {
    /// Sign an ordered sequence of steps.
    pub fn from_steps<'a, I>(steps: I) -> Self
    where
        I: IntoIterator<Item = &'a Step>,
    {
        let canonical = canonical_encoding(steps);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        Self {
            hash: format!("{digest:x}"),
            canonical,
        }
    }

    /// Sign exactly the steps of `steps` that influence `family` under
    /// `rules`, preserving their relative order.
    pub fn for_family(steps: &[Step], family: FeatureFamily, rules: &DeduplicationRules) -> Self {
        Self::from_steps(relevant_steps(steps, family, rules))
    }

    /// The 64-character lowercase hex digest.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Digest prefix used in log lines and reports.
    #[must_use]
    pub fn short_hash(&self) -> &str {
        &self.hash[..self.hash.len().min(12)]
    }

    /// The canonical text the hash was computed over.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

/// The ordered subsequence of `steps` that influences `family`.
///
/// Steps whose kind is outside the family's dependency set are skipped;
/// the retained steps keep their relative order. The terminal
/// extraction step never participates, independent of the table
/// contents.
#[must_use]
pub fn relevant_steps<'a>(
    steps: &'a [Step],
    family: FeatureFamily,
    rules: &DeduplicationRules,
) -> Vec<&'a Step> {
    steps
        .iter()
        .filter(|step| {
            let kind = step.kind();
            kind != StepKind::ExtractFeatures && rules.depends_on(family, kind)
        })
        .collect()
}

/// Digest of an ordered configuration set, used for plan staleness.
///
/// Uses the same canonical step encoding as signatures, so incidental
/// representation differences cannot flip the digest. Configuration
/// order is part of the digest on purpose: first-occurrence ownership
/// depends on it.
#[must_use]
pub fn configurations_digest(configurations: &[crate::document::NamedConfiguration]) -> String {
    let mut outer = serde_json::Map::new();
    for (index, configuration) in configurations.iter().enumerate() {
        let mut steps = serde_json::Map::new();
        for (position, step) in configuration.steps.iter().enumerate() {
            steps.insert(position.to_string(), canonical_step(step));
        }
        let entry = object([
            ("name", Value::String(configuration.name.clone())),
            ("steps", Value::Object(steps)),
        ]);
        outer.insert(index.to_string(), entry);
    }
    let text = Value::Object(outer).to_string();
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonical_encoding<'a, I>(steps: I) -> String
where
    I: IntoIterator<Item = &'a Step>,
{
    let mut outer = serde_json::Map::new();
    for (index, step) in steps.into_iter().enumerate() {
        outer.insert(index.to_string(), canonical_step(step));
    }
    Value::Object(outer).to_string()
}

fn canonical_step(step: &Step) -> Value {
    let parameters = match step {
        Step::Resample {
            new_spacing,
            interpolation,
        } => object([
            ("new_spacing", number_array(new_spacing)),
            ("interpolation", tag(interpolation.name())),
        ]),
        Step::Resegment { range } => object([(
            "range",
            object([
                ("min", optional_number(range.min)),
                ("max", optional_number(range.max)),
            ]),
        )]),
        Step::FilterOutliers { sigma } => object([("sigma", number(*sigma))]),
        Step::Discretise { method } => match method {
            DiscretisationMethod::FixedBinNumber { bins } => object([
                ("method", tag("fixed_bin_number")),
                ("bins", number(f64::from(*bins))),
            ]),
            DiscretisationMethod::FixedBinSize { width } => object([
                ("method", tag("fixed_bin_size")),
                ("width", number(*width)),
            ]),
        },
        Step::Round { decimals } => object([("decimals", number(f64::from(*decimals)))]),
        Step::KeepLargestComponent => Value::Object(serde_json::Map::new()),
        Step::Binarize { threshold } => object([("threshold", number(*threshold))]),
        Step::Filter { filter } => canonical_filter(filter),
        Step::ExtractFeatures { families } => object([(
            "families",
            Value::Array(families.iter().map(|f| tag(f.name())).collect()),
        )]),
    };
    object([("kind", tag(step.kind().name())), ("parameters", parameters)])
}

fn canonical_filter(filter: &FilterKind) -> Value {
    match filter {
        FilterKind::Mean { support } => object([
            ("name", tag("mean")),
            ("support", usize_number(*support)),
        ]),
        FilterKind::LogOfGaussian { sigma_mm, cutoff } => object([
            ("name", tag("log_of_gaussian")),
            ("sigma_mm", number(*sigma_mm)),
            ("cutoff", number(*cutoff)),
        ]),
        FilterKind::Laws {
            kernel,
            energy,
            support,
        } => object([
            ("name", tag("laws")),
            (
                "kernel",
                Value::Array(kernel.0.iter().map(|k| tag(k.serde_tag())).collect()),
            ),
            ("energy", Value::Bool(*energy)),
            ("support", usize_number(*support)),
        ]),
    }
}

/// Keys sort on serialization because `serde_json::Map` is backed by a
/// `BTreeMap`, so insertion order here is irrelevant.
fn object<const N: usize>(entries: [(&str, Value); N]) -> Value {
    let mut map = serde_json::Map::new();
    for (key, value) in entries {
        map.insert(key.to_string(), value);
    }
    Value::Object(map)
}

fn tag(name: &str) -> Value {
    Value::String(name.to_string())
}

/// Every numeric encodes as a double so equal values hash equally
/// regardless of their source type. Non-finite values encode as `null`,
/// deterministically; step validation rejects them before execution.
fn number(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

#[allow(clippy::cast_precision_loss)]
fn usize_number(value: usize) -> Value {
    number(value as f64)
}

fn optional_number(value: Option<f64>) -> Value {
    value.map_or(Value::Null, number)
}

fn number_array(values: &[f64]) -> Value {
    Value::Array(values.iter().map(|&v| number(v)).collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::step::Interpolation;

    fn resample(spacing: f64) -> Step {
        Step::Resample {
            new_spacing: [spacing; 3],
            interpolation: Interpolation::Trilinear,
        }
    }

    fn discretise_bins(bins: u32) -> Step {
        Step::Discretise {
            method: DiscretisationMethod::FixedBinNumber { bins },
        }
    }

    #[test]
    fn identical_sequences_hash_identically() {
        let steps = vec![resample(2.0), discretise_bins(16)];
        let a = PreprocessingSignature::from_steps(&steps);
        let b = PreprocessingSignature::from_steps(&steps);
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn hash_is_64_lowercase_hex_characters() {
        let sig = PreprocessingSignature::from_steps(&[resample(1.0)]);
        assert_eq!(sig.hash().len(), 64);
        assert!(sig.hash().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn parameter_changes_change_the_hash() {
        let a = PreprocessingSignature::from_steps(&[discretise_bins(16)]);
        let b = PreprocessingSignature::from_steps(&[discretise_bins(32)]);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn reordering_steps_changes_the_hash() {
        let first = vec![resample(2.0), discretise_bins(16)];
        let second = vec![discretise_bins(16), resample(2.0)];
        let a = PreprocessingSignature::from_steps(&first);
        let b = PreprocessingSignature::from_steps(&second);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn empty_sequence_encodes_as_empty_object() {
        let sig = PreprocessingSignature::from_steps(std::iter::empty());
        assert_eq!(sig.canonical(), "{}");
        assert_eq!(sig.hash().len(), 64);
    }

    #[test]
    fn canonical_keys_are_sorted() {
        let sig = PreprocessingSignature::from_steps(&[resample(2.0)]);
        let interpolation = sig.canonical().find("interpolation").unwrap();
        let spacing = sig.canonical().find("new_spacing").unwrap();
        assert!(
            interpolation < spacing,
            "parameter keys must serialize lexicographically: {}",
            sig.canonical()
        );
    }

    #[test]
    fn relevant_steps_skip_non_dependencies_but_keep_order() {
        let rules = DeduplicationRules::current();
        let steps = vec![
            resample(2.0),
            discretise_bins(16),
            Step::FilterOutliers { sigma: 3.0 },
        ];
        let relevant = relevant_steps(&steps, FeatureFamily::Intensity, &rules);
        let kinds: Vec<StepKind> = relevant.iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, vec![StepKind::Resample, StepKind::FilterOutliers]);
    }

    #[test]
    fn extraction_step_never_enters_a_signature() {
        let rules = DeduplicationRules::current();
        let steps = vec![
            resample(2.0),
            Step::ExtractFeatures {
                families: vec![FeatureFamily::Intensity],
            },
        ];
        let with = PreprocessingSignature::for_family(&steps, FeatureFamily::Intensity, &rules);
        let without =
            PreprocessingSignature::for_family(&steps[..1], FeatureFamily::Intensity, &rules);
        assert_eq!(with, without);
    }

    #[test]
    fn discretise_is_invisible_to_continuous_families() {
        let rules = DeduplicationRules::current();
        let with = vec![resample(2.0), discretise_bins(16)];
        let without = vec![resample(2.0)];
        assert_eq!(
            PreprocessingSignature::for_family(&with, FeatureFamily::Morphology, &rules),
            PreprocessingSignature::for_family(&without, FeatureFamily::Morphology, &rules),
        );
        assert_ne!(
            PreprocessingSignature::for_family(&with, FeatureFamily::Histogram, &rules),
            PreprocessingSignature::for_family(&without, FeatureFamily::Histogram, &rules),
        );
    }

    #[test]
    fn deserialization_trusts_the_stored_hash() {
        let raw = r#"{"hash": "not-a-real-digest", "canonical": "{}"}"#;
        let sig: PreprocessingSignature = serde_json::from_str(raw).unwrap();
        assert_eq!(sig.hash(), "not-a-real-digest");
    }

    #[test]
    fn serde_round_trip_preserves_both_fields() {
        let sig = PreprocessingSignature::from_steps(&[resample(1.5)]);
        let json = serde_json::to_string(&sig).unwrap();
        let back: PreprocessingSignature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn non_finite_parameters_encode_as_null() {
        let step = Step::FilterOutliers { sigma: f64::NAN };
        let a = PreprocessingSignature::from_steps(&[step.clone()]);
        let b = PreprocessingSignature::from_steps(&[step]);
        assert_eq!(a, b, "non-finite encoding must stay deterministic");
        assert!(a.canonical().contains("null"));
    }

    #[test]
    fn short_hash_is_a_prefix() {
        let sig = PreprocessingSignature::from_steps(&[resample(3.0)]);
        assert!(sig.hash().starts_with(sig.short_hash()));
        assert_eq!(sig.short_hash().len(), 12);
    }

    #[test]
    fn configuration_digest_tracks_order_and_parameters() {
        use crate::document::NamedConfiguration;

        let coarse = NamedConfiguration::new("coarse".to_string(), vec![resample(3.0)]);
        let fine = NamedConfiguration::new("fine".to_string(), vec![resample(1.0)]);

        let forward = configurations_digest(&[coarse.clone(), fine.clone()]);
        let reversed = configurations_digest(&[fine.clone(), coarse.clone()]);
        assert_ne!(forward, reversed, "ownership depends on configuration order");

        let same = configurations_digest(&[coarse.clone(), fine.clone()]);
        assert_eq!(forward, same);

        let tweaked = NamedConfiguration::new("fine".to_string(), vec![resample(1.5)]);
        let changed = configurations_digest(&[coarse, tweaked]);
        assert_ne!(forward, changed);
    }
}
