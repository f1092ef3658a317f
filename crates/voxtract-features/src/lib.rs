//! voxtract-features: Reference feature calculators (sans-IO)
//!
//! One module per feature family, each exposing a pure `compute` over
//! the final pipeline state of a configuration. [`StandardCalculators`]
//! bundles them behind the engine's calculator seam; bring your own
//! implementation when you need a different feature set.

pub mod histogram;
pub mod intensity;
pub mod ivh;
pub mod morphology;
mod roi;
pub mod texture;

use voxtract_pipeline::{
    CalculatorError, FamilyCalculator, FamilyInput, FamilyResults, FeatureFamily,
};

/// The built-in calculator set covering every [`FeatureFamily`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCalculators;

impl FamilyCalculator for StandardCalculators {
    fn compute(
        &self,
        family: FeatureFamily,
        input: &FamilyInput<'_>,
    ) -> Result<FamilyResults, CalculatorError> {
        match family {
            FeatureFamily::Morphology => morphology::compute(input),
            FeatureFamily::Intensity => intensity::compute(input),
            FeatureFamily::Histogram => histogram::compute(input),
            FeatureFamily::Ivh => ivh::compute(input),
            FeatureFamily::Texture => texture::compute(input),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndarray::Array3;
    use voxtract_pipeline::{ImageVolume, MaskVolume, VolumeGeometry};

    use super::*;

    #[test]
    fn dispatch_reaches_every_family() {
        let geometry = VolumeGeometry::default();
        #[allow(clippy::cast_precision_loss)]
        let values: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let image = ImageVolume::new(
            Array3::from_shape_vec((2, 2, 2), values).unwrap(),
            geometry,
        );
        let mask = MaskVolume::new(Array3::from_elem((2, 2, 2), true), geometry);
        let input = FamilyInput {
            image: &image,
            discretised: None,
            discretisation: None,
            morph_mask: &mask,
            intensity_mask: &mask,
        };

        let calculators = StandardCalculators;
        for family in [FeatureFamily::Morphology, FeatureFamily::Intensity] {
            let features = calculators.compute(family, &input).unwrap();
            assert!(!features.is_empty(), "{family} produced no features");
        }
        for family in [
            FeatureFamily::Histogram,
            FeatureFamily::Ivh,
            FeatureFamily::Texture,
        ] {
            let err = calculators.compute(family, &input).unwrap_err();
            assert!(matches!(
                err,
                CalculatorError::MissingDiscretisation { family: f } if f == family
            ));
        }
    }
}
