//! Run diagnostics: timing, counts, and other metrics for each step.
//!
//! These diagnostics are permanent instrumentation intended for
//! pipeline tuning and configuration experimentation. Every engine run
//! collects them alongside the feature results.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::step::StepKind;

/// Serde support for `std::time::Duration` as fractional seconds.
pub(crate) mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics for one executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDiagnostics {
    /// Which step ran.
    pub step: StepKind,
    /// Wall-clock duration of the step.
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Step-specific metrics.
    pub metrics: StepMetrics,
}

/// Step-specific metrics that vary by step kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepMetrics {
    /// Grid resampling metrics.
    Resample {
        /// Grid dimensions before resampling.
        from_dims: [usize; 3],
        /// Grid dimensions after resampling.
        to_dims: [usize; 3],
    },
    /// Resegmentation metrics.
    Resegment {
        /// Voxels removed from the intensity mask.
        removed: usize,
        /// Voxels remaining in the intensity mask.
        remaining: usize,
    },
    /// Outlier removal metrics.
    FilterOutliers {
        /// Voxels removed from the intensity mask.
        removed: usize,
        /// ROI mean the band was centred on.
        mean: f64,
        /// ROI standard deviation defining the band width.
        std_dev: f64,
    },
    /// Discretisation metrics.
    Discretise {
        /// Grade count of the discretised image.
        bins_used: u32,
        /// Intensity at the lower edge of the first grade.
        floor: f64,
        /// Intensity at the upper edge of the last grade.
        ceiling: f64,
    },
    /// Rounding metrics.
    Round {
        /// Decimal places kept.
        decimals: i32,
    },
    /// Connected component metrics.
    KeepLargestComponent {
        /// Components found before reduction.
        components_found: usize,
        /// Voxels in the kept component.
        kept_voxels: usize,
    },
    /// Mask thresholding metrics.
    Binarize {
        /// Voxels selected by the threshold.
        selected: usize,
    },
    /// Response filter metrics.
    Filter {
        /// Which kernel ran.
        name: String,
    },
    /// Feature extraction metrics.
    ExtractFeatures {
        /// Families computed by a calculator for this configuration.
        computed: usize,
        /// Families served from the run cache for this configuration.
        reused: usize,
        /// Total feature values produced for this configuration.
        features: usize,
    },
}

/// Diagnostics for one configuration's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationDiagnostics {
    /// The configuration's name.
    pub configuration: String,
    /// Per-step breakdown, in execution order.
    pub steps: Vec<StepDiagnostics>,
    /// Wall-clock duration of the whole configuration.
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

/// Diagnostics collected from a single engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDiagnostics {
    /// Input grid dimensions.
    pub image_dims: [usize; 3],
    /// Per-configuration breakdown, in execution order.
    pub configurations: Vec<ConfigurationDiagnostics>,
    /// Total wall-clock duration of the run.
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

impl RunDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Extraction Diagnostics Report\n{}", "=".repeat(60)));
        let [a, b, c] = self.image_dims;
        lines.push(format!("Image: {a}x{b}x{c} ({} voxels)", a * b * c));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));

        let total_ms = duration_ms(self.total_duration);
        for configuration in &self.configurations {
            lines.push(String::new());
            let ms = duration_ms(configuration.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            lines.push(format!(
                "Configuration {:<24} {ms:>8.3}ms {pct:>5.1}%",
                configuration.configuration,
            ));
            lines.push(format!(
                "  {:<22} {:>10}  {}",
                "Step", "Duration", "Details"
            ));
            lines.push(format!("  {}", "-".repeat(70)));
            for step in &configuration.steps {
                let step_ms = duration_ms(step.duration);
                let details = format_metrics(&step.metrics);
                lines.push(format!(
                    "  {:<22} {step_ms:>8.3}ms  {details}",
                    step.step.name(),
                ));
            }
        }

        let (computed, reused) = self.family_totals();
        lines.push(String::new());
        lines.push(format!(
            "Families: {computed} computed  |  {reused} reused from cache",
        ));

        lines.join("\n")
    }

    /// Sum the computed/reused family counts across all configurations.
    #[must_use]
    pub fn family_totals(&self) -> (usize, usize) {
        let mut computed = 0;
        let mut reused = 0;
        for configuration in &self.configurations {
            for step in &configuration.steps {
                if let StepMetrics::ExtractFeatures {
                    computed: c,
                    reused: r,
                    ..
                } = step.metrics
                {
                    computed += c;
                    reused += r;
                }
            }
        }
        (computed, reused)
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format step metrics into a compact detail string.
fn format_metrics(metrics: &StepMetrics) -> String {
    match metrics {
        StepMetrics::Resample { from_dims, to_dims } => {
            format!("{} -> {}", dims_label(*from_dims), dims_label(*to_dims))
        }
        StepMetrics::Resegment { removed, remaining } => {
            format!("removed={removed} remaining={remaining}")
        }
        StepMetrics::FilterOutliers {
            removed,
            mean,
            std_dev,
        } => {
            format!("removed={removed} mean={mean:.2} sd={std_dev:.2}")
        }
        StepMetrics::Discretise {
            bins_used,
            floor,
            ceiling,
        } => {
            format!("bins={bins_used} range=[{floor:.2}, {ceiling:.2}]")
        }
        StepMetrics::Round { decimals } => format!("decimals={decimals}"),
        StepMetrics::KeepLargestComponent {
            components_found,
            kept_voxels,
        } => {
            format!("components={components_found} kept={kept_voxels} voxels")
        }
        StepMetrics::Binarize { selected } => format!("selected={selected} voxels"),
        StepMetrics::Filter { name } => name.clone(),
        StepMetrics::ExtractFeatures {
            computed,
            reused,
            features,
        } => {
            format!("{computed} computed, {reused} reused, {features} values")
        }
    }
}

fn dims_label(dims: [usize; 3]) -> String {
    format!("{}x{}x{}", dims[0], dims[1], dims[2])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn duration_ms_converts_correctly() {
        let d = Duration::from_millis(1234);
        let ms = duration_ms(d);
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn durations_serialize_as_fractional_seconds() {
        let diag = StepDiagnostics {
            step: StepKind::Resample,
            duration: Duration::from_millis(250),
            metrics: StepMetrics::Resample {
                from_dims: [4, 4, 4],
                to_dims: [2, 2, 2],
            },
        };
        let json = serde_json::to_value(&diag).unwrap();
        assert!((json["duration"].as_f64().unwrap() - 0.25).abs() < 1e-9);
        let back: StepDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.duration, Duration::from_millis(250));
    }

    #[test]
    fn negative_durations_fail_to_deserialize() {
        let err = serde_json::from_str::<StepDiagnostics>(
            r#"{"step": "round", "duration": -1.0, "metrics": {"Round": {"decimals": 2}}}"#,
        );
        assert!(err.is_err());
    }

    fn sample_run() -> RunDiagnostics {
        RunDiagnostics {
            image_dims: [8, 8, 8],
            configurations: vec![ConfigurationDiagnostics {
                configuration: "fine".to_string(),
                steps: vec![
                    StepDiagnostics {
                        step: StepKind::Resample,
                        duration: Duration::from_millis(10),
                        metrics: StepMetrics::Resample {
                            from_dims: [8, 8, 8],
                            to_dims: [4, 4, 4],
                        },
                    },
                    StepDiagnostics {
                        step: StepKind::ExtractFeatures,
                        duration: Duration::from_millis(5),
                        metrics: StepMetrics::ExtractFeatures {
                            computed: 3,
                            reused: 2,
                            features: 40,
                        },
                    },
                ],
                duration: Duration::from_millis(15),
            }],
            total_duration: Duration::from_millis(15),
        }
    }

    #[test]
    fn report_contains_configurations_steps_and_totals() {
        let report = sample_run().report();
        assert!(report.contains("Extraction Diagnostics Report"));
        assert!(report.contains("Image: 8x8x8 (512 voxels)"));
        assert!(report.contains("fine"));
        assert!(report.contains("resample"));
        assert!(report.contains("8x8x8 -> 4x4x4"));
        assert!(report.contains("3 computed"));
        assert!(report.contains("2 reused"));
    }

    #[test]
    fn family_totals_sum_across_configurations() {
        let mut run = sample_run();
        run.configurations.push(run.configurations[0].clone());
        let (computed, reused) = run.family_totals();
        assert_eq!(computed, 6);
        assert_eq!(reused, 4);
    }
}
