use crate::error::{Result, SearchError};
use context_protocol::{QueryType, ScoreDistribution, ScoredResult, ThresholdDecision, ThresholdStrategy};
use serde::{Deserialize, Serialize};

const MAX_ADJUST_STEPS: usize = 200;

/// One value per query type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryTypeValues {
    pub factual: f32,
    pub conceptual: f32,
    pub procedural: f32,
    pub exploratory: f32,
    pub analytical: f32,
    pub comparative: f32,
    pub unknown: f32,
}

impl QueryTypeValues {
    #[must_use]
    pub fn get(&self, query_type: QueryType) -> f32 {
        match query_type {
            QueryType::Factual => self.factual,
            QueryType::Conceptual => self.conceptual,
            QueryType::Procedural => self.procedural,
            QueryType::Exploratory => self.exploratory,
            QueryType::Analytical => self.analytical,
            QueryType::Comparative => self.comparative,
            QueryType::Unknown => self.unknown,
        }
    }

    fn default_thresholds() -> Self {
        Self {
            factual: 0.55,
            conceptual: 0.45,
            procedural: 0.5,
            exploratory: 0.35,
            analytical: 0.45,
            comparative: 0.45,
            unknown: 0.4,
        }
    }

    fn default_offsets() -> Self {
        Self {
            factual: 0.05,
            conceptual: 0.0,
            procedural: 0.03,
            exploratory: -0.05,
            analytical: 0.0,
            comparative: 0.0,
            unknown: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Percentile of the score distribution used as the base cutoff.
    pub percentile: f32,
    /// Below this many scores the per-type default table is used instead.
    pub min_distribution_size: usize,
    pub defaults: QueryTypeValues,
    /// Added to the percentile cutoff per query type.
    pub offsets: QueryTypeValues,
    pub min_results: usize,
    pub max_results: usize,
    pub step_down: f32,
    pub step_up: f32,
    /// Lowest threshold the step-down adjustment may reach.
    pub floor: f32,
    /// Highest threshold the step-up adjustment may reach.
    pub ceiling: f32,
    pub min_threshold: f32,
    pub max_threshold: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            percentile: 0.75,
            min_distribution_size: 5,
            defaults: QueryTypeValues::default_thresholds(),
            offsets: QueryTypeValues::default_offsets(),
            min_results: 3,
            max_results: 20,
            step_down: 0.05,
            step_up: 0.025,
            floor: 0.1,
            ceiling: 0.9,
            min_threshold: 0.05,
            max_threshold: 0.95,
        }
    }
}

impl ThresholdConfig {
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, value: f32| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(SearchError::InvalidConfig(format!(
                    "threshold.{name} must be within [0, 1], got {value}"
                )))
            }
        };
        unit("percentile", self.percentile)?;
        unit("floor", self.floor)?;
        unit("ceiling", self.ceiling)?;
        unit("min_threshold", self.min_threshold)?;
        unit("max_threshold", self.max_threshold)?;
        if self.min_threshold > self.max_threshold {
            return Err(SearchError::InvalidConfig(format!(
                "threshold.min_threshold ({}) exceeds max_threshold ({})",
                self.min_threshold, self.max_threshold
            )));
        }
        if self.floor > self.ceiling {
            return Err(SearchError::InvalidConfig(format!(
                "threshold.floor ({}) exceeds ceiling ({})",
                self.floor, self.ceiling
            )));
        }
        if self.min_results > self.max_results {
            return Err(SearchError::InvalidConfig(format!(
                "threshold.min_results ({}) exceeds max_results ({})",
                self.min_results, self.max_results
            )));
        }
        if self.step_down <= 0.0 || self.step_up <= 0.0 {
            return Err(SearchError::InvalidConfig(
                "threshold.step_down and threshold.step_up must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-request adjustments layered over [`ThresholdConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdOverrides {
    /// Pin the threshold; skips distribution analysis and count targets.
    pub threshold: Option<f32>,
    pub min_threshold: Option<f32>,
    pub max_threshold: Option<f32>,
    pub min_results: Option<usize>,
    pub max_results: Option<usize>,
}

/// Summary statistics of the finite values in `scores`.
#[must_use]
pub fn score_distribution(scores: &[f32]) -> Option<ScoreDistribution> {
    let mut sorted: Vec<f32> = scores.iter().copied().filter(|s| s.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f32::total_cmp);
    let count = sorted.len();
    let mean = sorted.iter().sum::<f32>() / count as f32;
    let variance = sorted.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / count as f32;
    let median = percentile(&sorted, 0.5);
    Some(ScoreDistribution {
        count,
        min: sorted[0],
        max: sorted[count - 1],
        mean,
        median,
        std_dev: variance.sqrt(),
        p25: percentile(&sorted, 0.25),
        p50: median,
        p75: percentile(&sorted, 0.75),
        p90: percentile(&sorted, 0.9),
        p95: percentile(&sorted, 0.95),
    })
}

/// Linear-interpolated percentile of an ascending, non-empty slice.
fn percentile(sorted: &[f32], p: f32) -> f32 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Picks the per-request combined-score cutoff.
#[derive(Debug, Clone, Default)]
pub struct ThresholdOptimizer {
    config: ThresholdConfig,
}

impl ThresholdOptimizer {
    pub fn new(config: ThresholdConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    #[must_use]
    pub fn decide(
        &self,
        scores: &[f32],
        query_type: QueryType,
        overrides: &ThresholdOverrides,
    ) -> ThresholdDecision {
        let min_t = overrides.min_threshold.unwrap_or(self.config.min_threshold);
        let max_t = overrides.max_threshold.unwrap_or(self.config.max_threshold).max(min_t);
        let distribution = score_distribution(scores);

        if let Some(pinned) = overrides.threshold {
            let threshold = pinned.clamp(min_t, max_t);
            return ThresholdDecision {
                threshold,
                strategy: ThresholdStrategy::Override,
                reasoning: format!("caller pinned threshold {pinned:.3} (applied {threshold:.3})"),
                distribution,
                adjusted_from: None,
            };
        }

        let (initial, strategy, mut reasoning) = match &distribution {
            Some(dist) if dist.count >= self.config.min_distribution_size => {
                let base = percentile(&sorted_finite(scores), self.config.percentile);
                let offset = self.config.offsets.get(query_type);
                (
                    base + offset,
                    ThresholdStrategy::Distribution,
                    format!(
                        "p{:.0} of {} scores = {base:.3} (mean {:.3}, std {:.3}), {query_type} offset {offset:+.3}",
                        self.config.percentile * 100.0,
                        dist.count,
                        dist.mean,
                        dist.std_dev
                    ),
                )
            }
            _ => (
                self.config.defaults.get(query_type),
                ThresholdStrategy::QueryType,
                format!(
                    "{} scores below distribution minimum {}; {query_type} default",
                    distribution.map_or(0, |d| d.count),
                    self.config.min_distribution_size
                ),
            ),
        };
        let initial = initial.clamp(min_t, max_t);

        let min_results = overrides.min_results.unwrap_or(self.config.min_results);
        let max_results = overrides
            .max_results
            .unwrap_or(self.config.max_results)
            .max(min_results);
        let floor = self.config.floor.clamp(min_t, max_t);
        let ceiling = self.config.ceiling.clamp(floor, max_t);
        let survivors = |t: f32| scores.iter().filter(|s| **s >= t).count();

        let mut threshold = initial;
        let mut steps = 0;
        if survivors(threshold) < min_results {
            while survivors(threshold) < min_results && threshold > floor && steps < MAX_ADJUST_STEPS {
                threshold = (threshold - self.config.step_down).max(floor);
                steps += 1;
            }
        } else if survivors(threshold) > max_results {
            while survivors(threshold) > max_results && threshold < ceiling && steps < MAX_ADJUST_STEPS {
                threshold = (threshold + self.config.step_up).min(ceiling);
                steps += 1;
            }
        }

        let adjusted = steps > 0;
        if adjusted {
            reasoning.push_str(&format!(
                "; adjusted {initial:.3} -> {threshold:.3} in {steps} step(s) toward {min_results}..={max_results} results"
            ));
        }
        reasoning.push_str(&format!("; {} of {} pass", survivors(threshold), scores.len()));

        let decision = ThresholdDecision {
            threshold,
            strategy: if adjusted {
                ThresholdStrategy::Fallback
            } else {
                strategy
            },
            reasoning,
            distribution,
            adjusted_from: adjusted.then_some(initial),
        };
        log::debug!(
            "Threshold {:.3} ({:?}): {}",
            decision.threshold,
            decision.strategy,
            decision.reasoning
        );
        decision
    }
}

fn sorted_finite(scores: &[f32]) -> Vec<f32> {
    let mut sorted: Vec<f32> = scores.iter().copied().filter(|s| s.is_finite()).collect();
    sorted.sort_by(f32::total_cmp);
    sorted
}

/// Keep results whose combined score reaches `threshold`, order preserved.
#[must_use]
pub fn apply_threshold(results: Vec<ScoredResult>, threshold: f32) -> Vec<ScoredResult> {
    results
        .into_iter()
        .filter(|scored| scored.combined_score >= threshold)
        .collect()
}
