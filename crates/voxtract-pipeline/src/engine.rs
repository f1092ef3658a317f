//! The extraction engine.
//!
//! Drives every configuration of a document through its steps against a
//! shared loaded image, deduplicating feature computation across
//! configurations whose relevant preprocessing is identical. Execution
//! is strictly sequential: first-occurrence ownership and cache
//! population order depend on it. The run-scoped cache and statistics
//! live and die inside [`ExtractionEngine::run`]; nothing persists
//! between runs.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analyzer::ConfigurationAnalyzer;
use crate::binarize::binarize;
use crate::components::largest_component;
use crate::diagnostics::{
    ConfigurationDiagnostics, RunDiagnostics, StepDiagnostics, StepMetrics,
};
use crate::discretise::{DiscretisationInfo, discretise};
use crate::document::{DocumentError, ExtractionDocument, NamedConfiguration};
use crate::error::{CalculatorError, PipelineError};
use crate::family::FeatureFamily;
use crate::outliers::{OutlierStats, filter_outliers};
use crate::plan::DeduplicationPlan;
use crate::resample::{resample_fuzzy, resample_image, resample_mask};
use crate::resegment::resegment;
use crate::round::round_intensities;
use crate::rules::{DeduplicationRules, RulesError};
use crate::state::{MaskInput, Phase, PipelineState, SourceMode};
use crate::step::{Step, StepKind};
use crate::volume::{ImageVolume, MaskVolume};

/// Placeholder intensity assumed outside the scan volume unless the
/// caller overrides it.
pub const DEFAULT_SENTINEL: f64 = -2048.0;

/// All feature values of one family, keyed by feature name.
pub type FamilyResults = BTreeMap<String, f64>;

/// Fatal, run-level failures.
///
/// Everything else is scoped to a single configuration and lands in the
/// run log instead of aborting the run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The document failed validation.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// The document pinned a rules version the registry cannot resolve.
    #[error(transparent)]
    Rules(#[from] RulesError),

    /// The shared image or mask input is unusable for every
    /// configuration.
    #[error("unusable run input: {0}")]
    Input(#[from] PipelineError),
}

/// What to do with a configuration's partial results when a step fails.
///
/// An empty region of interest always discards: the values computed
/// before the mask drained describe a region that no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Drop everything the failed configuration produced.
    #[default]
    Discard,
    /// Keep the families extracted before the failure.
    ReturnPartial,
}

/// Behavioural knobs for a run, fixed when the engine is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    /// Partial-result policy for failed configurations.
    pub on_error: OnError,
    /// How source validity is established per configuration.
    pub source_mode: SourceMode,
    /// Placeholder intensity for [`SourceMode::AutoDetect`].
    pub sentinel: f64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            on_error: OnError::Discard,
            source_mode: SourceMode::FullImage,
            sentinel: DEFAULT_SENTINEL,
        }
    }
}

/// Everything a family calculator may read for one configuration.
///
/// Continuous families read `image`; grade-based families read
/// `discretised` and fail with
/// [`CalculatorError::MissingDiscretisation`] when it is absent.
#[derive(Debug)]
pub struct FamilyInput<'a> {
    /// Continuous-intensity image, untouched by discretisation.
    pub image: &'a ImageVolume,
    /// Grade volume (values `1..=bins_used`), when a discretise step ran.
    pub discretised: Option<&'a ImageVolume>,
    /// What the discretise step established.
    pub discretisation: Option<DiscretisationInfo>,
    /// Delineated shape mask.
    pub morph_mask: &'a MaskVolume,
    /// Intensity mask.
    pub intensity_mask: &'a MaskVolume,
}

/// Computes every feature of a family from a configuration's final
/// state.
///
/// Implementations must be pure: identical inputs produce identical
/// values, with no shared mutable state between calls. The engine
/// relies on that to substitute cached results for repeat computations.
pub trait FamilyCalculator {
    /// Compute all features of `family`.
    fn compute(
        &self,
        family: FeatureFamily,
        input: &FamilyInput<'_>,
    ) -> Result<FamilyResults, CalculatorError>;
}

/// Terminal status of one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurationStatus {
    /// Every step ran to completion.
    Completed,
    /// A step failed; see the run log.
    Failed,
}

/// A configuration's feature output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationResult {
    /// The configuration's name.
    pub name: String,
    /// Feature values per family. Empty when the configuration failed
    /// and its results were discarded.
    pub features: BTreeMap<FeatureFamily, FamilyResults>,
    /// How the configuration ended.
    pub status: ConfigurationStatus,
}

/// One run-log line per configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    /// The configuration's name.
    pub configuration: String,
    /// Furthest phase the configuration reached.
    pub phase_reached: Phase,
    /// Steps that ran to completion.
    pub completed_steps: usize,
    /// Failure description, when the configuration failed.
    pub error: Option<String>,
    /// The step that failed, when one did.
    pub failed_step: Option<StepKind>,
    /// Wall-clock duration of the configuration.
    #[serde(with = "crate::diagnostics::duration_serde")]
    pub duration: Duration,
}

/// Deduplication counters for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStats {
    /// Family computations that actually invoked a calculator.
    pub computed_families: usize,
    /// Family computations served from the run cache.
    pub reused_families: usize,
}

impl DedupStats {
    /// Total family computations requested.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.computed_families + self.reused_families
    }

    /// Fraction of requests served from the cache, `0.0` when nothing
    /// was requested.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.reused_families as f64 / self.total() as f64
        }
    }
}

impl std::fmt::Display for DedupStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "computed={} reused={} ({:.1}% cache hits)",
            self.computed_families,
            self.reused_families,
            self.hit_rate() * 100.0
        )
    }
}

/// Everything one [`ExtractionEngine::run`] call produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Per-configuration feature output, in document order.
    pub results: Vec<ConfigurationResult>,
    /// Per-configuration execution log, in document order.
    pub log: Vec<RunLogEntry>,
    /// Deduplication counters; absent when deduplication was inactive
    /// (disabled, or only one configuration ran).
    pub dedup: Option<DedupStats>,
    /// Timing and metrics breakdown.
    pub diagnostics: RunDiagnostics,
}

/// Runs extraction documents against loaded volumes.
#[derive(Debug)]
pub struct ExtractionEngine<C> {
    calculator: C,
    options: EngineOptions,
}

impl<C: FamilyCalculator> ExtractionEngine<C> {
    /// An engine with default options.
    #[must_use]
    pub fn new(calculator: C) -> Self {
        Self::with_options(calculator, EngineOptions::default())
    }

    /// An engine with explicit options.
    #[must_use]
    pub const fn with_options(calculator: C, options: EngineOptions) -> Self {
        Self {
            calculator,
            options,
        }
    }

    /// Execute every configuration of `document` against one image.
    ///
    /// `mask` applies to all configurations; `None` treats the whole
    /// image as the region of interest. Per-configuration failures are
    /// recorded in the returned log and never abort the run; only an
    /// invalid document, an unresolvable rules version, or unusable
    /// shared inputs do.
    pub fn run(
        &self,
        image: &ImageVolume,
        mask: Option<&MaskInput>,
        document: &ExtractionDocument,
    ) -> Result<RunOutcome, EngineError> {
        document.validate()?;
        let rules = match document.deduplication.rules_version.as_deref() {
            Some(version) => DeduplicationRules::for_version(version)?,
            None => DeduplicationRules::current(),
        };
        let template = PipelineState::initialize(
            image,
            mask,
            self.options.source_mode,
            self.options.sentinel,
        )?;

        // Dedup pays off only when several configurations can share
        // preprocessing; a lone configuration always computes directly.
        let dedup_active =
            document.deduplication.enabled && document.configurations.len() > 1;
        let plan = dedup_active.then(|| self.acquire_plan(document, &rules));
        if let Some(plan) = &plan {
            info!(
                "deduplication plan under rules {}: {}",
                plan.rules_version(),
                plan.summary()
            );
        }

        // Families that depend on the same steps share a signature hash,
        // so cached values are keyed by family as well.
        let mut cache: HashMap<(FeatureFamily, String), FamilyResults> = HashMap::new();
        let mut results = Vec::with_capacity(document.configurations.len());
        let mut log = Vec::with_capacity(document.configurations.len());
        let mut configurations = Vec::with_capacity(document.configurations.len());
        let run_started = Instant::now();
        for configuration in &document.configurations {
            let (result, entry, diagnostics) =
                self.execute_configuration(configuration, &template, plan.as_ref(), &mut cache);
            results.push(result);
            log.push(entry);
            configurations.push(diagnostics);
        }

        let diagnostics = RunDiagnostics {
            image_dims: image.dims(),
            configurations,
            total_duration: run_started.elapsed(),
        };
        let dedup = plan.map(|_| {
            let (computed_families, reused_families) = diagnostics.family_totals();
            DedupStats {
                computed_families,
                reused_families,
            }
        });
        if let Some(stats) = &dedup {
            info!("deduplication outcome: {stats}");
        }
        Ok(RunOutcome {
            results,
            log,
            dedup,
            diagnostics,
        })
    }

    /// Restore the document's stored plan if it is sound and fresh;
    /// analyze afresh otherwise. Never fails: a broken stored plan only
    /// costs the re-analysis.
    fn acquire_plan(
        &self,
        document: &ExtractionDocument,
        rules: &DeduplicationRules,
    ) -> DeduplicationPlan {
        if let Some(stored) = &document.deduplication.last_plan {
            match DeduplicationPlan::from_document(stored.clone()) {
                Ok(plan) => {
                    if plan.is_stale(&document.configurations, rules) {
                        info!("stored plan is stale; analyzing afresh");
                    } else {
                        debug!("restored stored plan: {}", plan.summary());
                        return plan;
                    }
                }
                Err(error) => {
                    warn!("stored plan failed to restore ({error}); analyzing afresh");
                }
            }
        }
        ConfigurationAnalyzer::new(&document.configurations, rules).analyze()
    }

    fn execute_configuration(
        &self,
        configuration: &NamedConfiguration,
        template: &PipelineState,
        plan: Option<&DeduplicationPlan>,
        cache: &mut HashMap<(FeatureFamily, String), FamilyResults>,
    ) -> (ConfigurationResult, RunLogEntry, ConfigurationDiagnostics) {
        let started = Instant::now();
        info!(
            "running configuration {} ({} steps)",
            configuration.name,
            configuration.steps.len()
        );
        let mut state = template.clone();
        let mut features: BTreeMap<FeatureFamily, FamilyResults> = BTreeMap::new();
        let mut steps = Vec::with_capacity(configuration.steps.len());
        let mut completed_steps = 0_usize;
        let mut error = None;
        let mut failed_step = None;

        for step in &configuration.steps {
            let step_started = Instant::now();
            match self.execute_step(
                step,
                &mut state,
                &configuration.name,
                plan,
                cache,
                &mut features,
            ) {
                Ok(metrics) => {
                    steps.push(StepDiagnostics {
                        step: step.kind(),
                        duration: step_started.elapsed(),
                        metrics,
                    });
                    completed_steps += 1;
                }
                Err(step_error) => {
                    warn!(
                        "configuration {} failed at {}: {step_error}",
                        configuration.name,
                        step.kind()
                    );
                    state.phase = Phase::Failed;
                    failed_step = Some(step.kind());
                    error = Some(step_error);
                    break;
                }
            }
        }

        let status = if error.is_none() {
            state.phase = Phase::Completed;
            ConfigurationStatus::Completed
        } else {
            ConfigurationStatus::Failed
        };
        // An empty ROI invalidates everything extracted before the mask
        // drained, so it overrides the partial-result policy.
        let empty_roi = matches!(error, Some(PipelineError::EmptyRoi { .. }));
        if error.is_some() && (empty_roi || self.options.on_error == OnError::Discard) {
            features.clear();
        }

        let duration = started.elapsed();
        (
            ConfigurationResult {
                name: configuration.name.clone(),
                features,
                status,
            },
            RunLogEntry {
                configuration: configuration.name.clone(),
                phase_reached: state.phase,
                completed_steps,
                error: error.map(|step_error| step_error.to_string()),
                failed_step,
                duration,
            },
            ConfigurationDiagnostics {
                configuration: configuration.name.clone(),
                steps,
                duration,
            },
        )
    }

    #[allow(clippy::too_many_lines)]
    fn execute_step(
        &self,
        step: &Step,
        state: &mut PipelineState,
        configuration: &str,
        plan: Option<&DeduplicationPlan>,
        cache: &mut HashMap<(FeatureFamily, String), FamilyResults>,
        features: &mut BTreeMap<FeatureFamily, FamilyResults>,
    ) -> Result<StepMetrics, PipelineError> {
        step.validate()?;
        if state.phase == Phase::Initialized {
            state.phase = Phase::Preprocessing;
        }

        match step {
            Step::Resample {
                new_spacing,
                interpolation,
            } => {
                state.revert_discretisation();
                let from_dims = state.image.dims();
                let source_geometry = state.image.geometry;
                let (resampled, validity) = resample_image(
                    &state.image,
                    *new_spacing,
                    *interpolation,
                    state.validity.as_ref(),
                );
                state.image = resampled;
                state.validity = validity;
                state.morph_mask = resample_mask(&state.morph_mask, *new_spacing);
                state.intensity_mask = resample_mask(&state.intensity_mask, *new_spacing);
                if let Some(fuzzy) = state.fuzzy_source.take() {
                    state.fuzzy_source =
                        Some(resample_fuzzy(&fuzzy, source_geometry, *new_spacing));
                }
                state.ensure_roi(StepKind::Resample)?;
                Ok(StepMetrics::Resample {
                    from_dims,
                    to_dims: state.image.dims(),
                })
            }
            Step::Resegment { range } => {
                let removed = resegment(&state.image, &mut state.intensity_mask, *range);
                if let Some(min) = range.min {
                    state.resegment_floor = Some(min);
                }
                state.ensure_roi(StepKind::Resegment)?;
                Ok(StepMetrics::Resegment {
                    removed,
                    remaining: state.intensity_mask.voxel_count(),
                })
            }
            Step::FilterOutliers { sigma } => {
                let stats = filter_outliers(&state.image, &mut state.intensity_mask, *sigma)
                    .unwrap_or(OutlierStats {
                        removed: 0,
                        mean: 0.0,
                        std_dev: 0.0,
                    });
                state.ensure_roi(StepKind::FilterOutliers)?;
                Ok(StepMetrics::FilterOutliers {
                    removed: stats.removed,
                    mean: stats.mean,
                    std_dev: stats.std_dev,
                })
            }
            Step::Discretise { method } => {
                let raw = state.image.clone();
                let info = discretise(
                    &mut state.image,
                    &state.intensity_mask,
                    *method,
                    state.resegment_floor,
                )?;
                state.raw_image = Some(raw);
                state.discretisation = Some(info);
                state.phase = Phase::Discretised;
                Ok(StepMetrics::Discretise {
                    bins_used: info.bins_used,
                    floor: info.floor,
                    ceiling: info.ceiling,
                })
            }
            Step::Round { decimals } => {
                state.revert_discretisation();
                state.image = round_intensities(&state.image, *decimals);
                Ok(StepMetrics::Round { decimals: *decimals })
            }
            Step::KeepLargestComponent => {
                let (morph, components_found) = largest_component(&state.morph_mask.data);
                state.morph_mask.data = morph;
                let (intensity, _) = largest_component(&state.intensity_mask.data);
                state.intensity_mask.data = intensity;
                state.ensure_roi(StepKind::KeepLargestComponent)?;
                Ok(StepMetrics::KeepLargestComponent {
                    components_found,
                    kept_voxels: state.morph_mask.voxel_count(),
                })
            }
            Step::Binarize { threshold } => {
                let Some(fuzzy) = &state.fuzzy_source else {
                    return Err(PipelineError::InvalidParameter {
                        step: StepKind::Binarize,
                        reason: "no fuzzy mask source was supplied for this run".to_string(),
                    });
                };
                let mask = binarize(fuzzy, state.image.geometry, *threshold);
                let selected = mask.voxel_count();
                state.intensity_mask = mask.clone();
                state.morph_mask = mask;
                state.ensure_roi(StepKind::Binarize)?;
                Ok(StepMetrics::Binarize { selected })
            }
            Step::Filter { filter } => {
                state.revert_discretisation();
                let response =
                    filter.apply(&state.image.data, &state.image.geometry, state.validity.as_ref());
                state.image.data = response.response;
                if response.validity.is_some() {
                    state.validity = response.validity;
                }
                state.applied_filters.push(filter.name().to_string());
                Ok(StepMetrics::Filter {
                    name: filter.name().to_string(),
                })
            }
            Step::ExtractFeatures { families } => {
                state.phase = Phase::FeatureExtraction;
                let mut computed = 0_usize;
                let mut reused = 0_usize;
                let mut produced = 0_usize;
                for family in families {
                    let cache_key = plan
                        .and_then(|plan| plan.signature(configuration, *family))
                        .map(|signature| (*family, signature.hash().to_string()));
                    if let Some(key) = &cache_key
                        && let Some(values) = cache.get(key)
                    {
                        let owner = plan
                            .and_then(|plan| plan.source(configuration, *family))
                            .unwrap_or("an earlier configuration");
                        debug!(
                            "{configuration}/{family}: reusing {} values from {owner}",
                            values.len()
                        );
                        produced += values.len();
                        features.insert(*family, values.clone());
                        reused += 1;
                        continue;
                    }

                    let input = FamilyInput {
                        image: state.continuous_image(),
                        discretised: state.discretisation.is_some().then_some(&state.image),
                        discretisation: state.discretisation,
                        morph_mask: &state.morph_mask,
                        intensity_mask: &state.intensity_mask,
                    };
                    let values = self.calculator.compute(*family, &input)?;
                    produced += values.len();
                    if let Some(key) = cache_key {
                        cache.insert(key, values.clone());
                    }
                    features.insert(*family, values);
                    computed += 1;
                }
                Ok(StepMetrics::ExtractFeatures {
                    computed,
                    reused,
                    features: produced,
                })
            }
        }
    }
}
