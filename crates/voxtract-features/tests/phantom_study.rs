//! Integration test: run a synthetic phantom through the full engine with
//! the standard calculators and check deduplication behaviour end to end.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use ndarray::Array3;
use voxtract_features::StandardCalculators;
use voxtract_pipeline::{
    ConfigurationStatus, DiscretisationMethod, ExtractionDocument, FeatureFamily, ImageVolume,
    IntensityRange, MaskInput, MaskVolume, NamedConfiguration, Step, VolumeGeometry,
};

/// Sphere of elevated intensity sitting in a linear background gradient.
#[allow(clippy::cast_precision_loss)]
fn phantom() -> (ImageVolume, MaskVolume) {
    let dims = (8, 8, 8);
    let geometry = VolumeGeometry::isotropic([1.0; 3]);
    let centre = 3.5_f64;
    let radius_sq = 9.0_f64;

    let mut data = Array3::<f32>::zeros(dims);
    let mut selected = Array3::<bool>::from_elem(dims, false);
    for ((i, j, k), value) in data.indexed_iter_mut() {
        let di = i as f64 - centre;
        let dj = j as f64 - centre;
        let dk = k as f64 - centre;
        let inside = dk.mul_add(dk, dj.mul_add(dj, di * di)) <= radius_sq;
        let background = (i + j + k) as f32;
        *value = if inside { background + 50.0 } else { background };
        if inside {
            selected[[i, j, k]] = true;
        }
    }
    (
        ImageVolume::new(data, geometry),
        MaskVolume::new(selected, geometry),
    )
}

fn all_families() -> Vec<FeatureFamily> {
    FeatureFamily::ALL.to_vec()
}

fn standard_steps(bins: u32) -> Vec<Step> {
    vec![
        Step::Resegment {
            range: IntensityRange {
                min: Some(40.0),
                max: None,
            },
        },
        Step::Discretise {
            method: DiscretisationMethod::FixedBinNumber { bins },
        },
        Step::ExtractFeatures {
            families: all_families(),
        },
    ]
}

#[test]
fn identical_configurations_share_every_family() {
    let (image, mask) = phantom();
    let document = ExtractionDocument::new(vec![
        NamedConfiguration::new("first".to_owned(), standard_steps(8)),
        NamedConfiguration::new("second".to_owned(), standard_steps(8)),
    ]);

    let outcome = voxtract_pipeline::extract(
        &image,
        Some(&MaskInput::Binary(mask.data.clone())),
        &document,
        StandardCalculators,
    )
    .expect("phantom run should succeed");

    eprintln!("{}", outcome.diagnostics.report());

    assert_eq!(outcome.results.len(), 2);
    for result in &outcome.results {
        assert_eq!(result.status, ConfigurationStatus::Completed);
        assert_eq!(result.features.len(), 5, "all five families requested");
    }
    assert_eq!(
        outcome.results[0].features, outcome.results[1].features,
        "identical configurations must agree feature for feature"
    );

    let stats = outcome.dedup.expect("two configurations, dedup enabled");
    assert_eq!(stats.computed_families, 5);
    assert_eq!(stats.reused_families, 5);
}

#[test]
fn diverging_discretisation_recomputes_grade_families() {
    let (image, mask) = phantom();
    let document = ExtractionDocument::new(vec![
        NamedConfiguration::new("bins8".to_owned(), standard_steps(8)),
        NamedConfiguration::new("bins32".to_owned(), standard_steps(32)),
    ]);

    let outcome = voxtract_pipeline::extract(
        &image,
        Some(&MaskInput::Binary(mask.data.clone())),
        &document,
        StandardCalculators,
    )
    .expect("phantom run should succeed");

    let stats = outcome.dedup.expect("two configurations, dedup enabled");
    // Morphology and intensity are untouched by binning and reuse; the
    // three grade families recompute under the new grade axis.
    assert_eq!(stats.computed_families, 8);
    assert_eq!(stats.reused_families, 2);

    let shared = [FeatureFamily::Morphology, FeatureFamily::Intensity];
    for family in shared {
        assert_eq!(
            outcome.results[0].features[&family], outcome.results[1].features[&family],
            "{family} must be identical across binnings"
        );
    }
    let coarse = &outcome.results[0].features[&FeatureFamily::Histogram];
    let fine = &outcome.results[1].features[&FeatureFamily::Histogram];
    assert!(coarse["maximum"] <= 8.0);
    assert!(fine["maximum"] > 8.0, "32 bins spread the phantom further");
}

#[test]
fn failing_configuration_does_not_poison_the_run() {
    let (image, mask) = phantom();
    let impossible = vec![
        Step::Resegment {
            range: IntensityRange {
                min: Some(10_000.0),
                max: None,
            },
        },
        Step::ExtractFeatures {
            families: vec![FeatureFamily::Intensity],
        },
    ];
    let document = ExtractionDocument::new(vec![
        NamedConfiguration::new("impossible".to_owned(), impossible),
        NamedConfiguration::new("sound".to_owned(), standard_steps(8)),
    ]);

    let outcome = voxtract_pipeline::extract(
        &image,
        Some(&MaskInput::Binary(mask.data.clone())),
        &document,
        StandardCalculators,
    )
    .expect("one failing configuration must not fail the run");

    assert_eq!(outcome.results[0].status, ConfigurationStatus::Failed);
    assert!(outcome.results[0].features.is_empty());
    assert_eq!(outcome.results[1].status, ConfigurationStatus::Completed);
    assert_eq!(outcome.results[1].features.len(), 5);

    let failed = &outcome.log[0];
    assert!(failed.error.is_some(), "run log must carry the step error");
    eprintln!("failure recorded as: {}", failed.error.as_ref().unwrap());
}

#[test]
fn single_configuration_reports_no_dedup_stats() {
    let (image, mask) = phantom();
    let document = ExtractionDocument::new(vec![NamedConfiguration::new(
        "only".to_owned(),
        standard_steps(8),
    )]);

    let outcome = voxtract_pipeline::extract(
        &image,
        Some(&MaskInput::Binary(mask.data.clone())),
        &document,
        StandardCalculators,
    )
    .expect("phantom run should succeed");

    assert!(outcome.dedup.is_none(), "nothing to share across one configuration");
    assert_eq!(outcome.results[0].features.len(), 5);
}

#[test]
fn morphology_of_the_phantom_is_plausibly_spherical() {
    let (image, mask) = phantom();
    let document = ExtractionDocument::new(vec![NamedConfiguration::new(
        "shape".to_owned(),
        vec![Step::ExtractFeatures {
            families: vec![FeatureFamily::Morphology],
        }],
    )]);

    let outcome = voxtract_pipeline::extract(
        &image,
        Some(&MaskInput::Binary(mask.data.clone())),
        &document,
        StandardCalculators,
    )
    .expect("phantom run should succeed");

    let shape = &outcome.results[0].features[&FeatureFamily::Morphology];
    eprintln!(
        "phantom volume {:.1} mm^3, sphericity {:.3}",
        shape["volume_mm3"], shape["sphericity"]
    );
    assert!(shape["volume_mm3"] > 0.0);
    assert!(
        shape["sphericity"] > 0.5 && shape["sphericity"] <= 1.0,
        "voxelised sphere should be reasonably spherical, got {}",
        shape["sphericity"]
    );
    assert!(shape["maximum_diameter_mm"] >= 5.0, "diameter spans the sphere");
}
