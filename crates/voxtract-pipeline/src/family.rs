//! Feature families supported by the extraction pipeline.
//!
//! A family is the unit of deduplication: signatures, plan ownership and
//! run-scoped caching all key on `(configuration, family)` pairs. The set
//! is closed so that rules tables can be validated exhaustively and so
//! documents never carry free-form family strings.

use serde::{Deserialize, Serialize};

/// A group of features computed together from the same pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFamily {
    /// Shape and size of the morphological ROI.
    Morphology,
    /// First-order statistics over continuous intensities.
    Intensity,
    /// First-order statistics over discretised intensities.
    Histogram,
    /// Intensity-volume histogram curve features.
    Ivh,
    /// Grey level co-occurrence and run length texture features.
    Texture,
}

impl FeatureFamily {
    /// Every family, in the canonical iteration order.
    ///
    /// Analysis and reporting always walk families in this order so that
    /// plans and summaries come out identical across runs.
    pub const ALL: [Self; 5] = [
        Self::Morphology,
        Self::Intensity,
        Self::Histogram,
        Self::Ivh,
        Self::Texture,
    ];

    /// Stable lowercase name used in documents and log output.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Morphology => "morphology",
            Self::Intensity => "intensity",
            Self::Histogram => "histogram",
            Self::Ivh => "ivh",
            Self::Texture => "texture",
        }
    }

    /// Parse a document name back into a family.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|family| family.name() == name)
    }
}

impl std::fmt::Display for FeatureFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn all_covers_every_family_exactly_once() {
        let mut seen = std::collections::BTreeSet::new();
        for family in FeatureFamily::ALL {
            assert!(seen.insert(family), "{family} listed twice in ALL");
        }
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn names_round_trip() {
        for family in FeatureFamily::ALL {
            assert_eq!(FeatureFamily::from_name(family.name()), Some(family));
        }
        assert_eq!(FeatureFamily::from_name("wavelet"), None);
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&FeatureFamily::Ivh).unwrap();
        assert_eq!(json, "\"ivh\"");
        let back: FeatureFamily = serde_json::from_str("\"morphology\"").unwrap();
        assert_eq!(back, FeatureFamily::Morphology);
    }
}
