use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use context_assembly::{CompressionStrategy, ContextOrdering};
use context_protocol::ContextBudget;
use context_search::{ExpansionStrategy, SourceToggles, ThresholdOverrides};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-request knobs for [`crate::RetrievalEngine::retrieve_context`].
/// Unset fields fall back to the engine config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieveOptions {
    pub sources: SourceToggles,
    pub topic: Option<String>,
    pub budget: ContextBudget,
    /// MMR trade-off in `[0, 1]`; 1 is pure relevance.
    pub lambda: Option<f32>,
    pub compression: Option<CompressionStrategy>,
    pub expansion: Option<ExpansionStrategy>,
    pub min_results: Option<usize>,
    pub max_results: Option<usize>,
    /// Pin the relevance threshold instead of deriving it.
    pub threshold: Option<f32>,
    pub min_threshold: Option<f32>,
    pub max_threshold: Option<f32>,
    pub ordering: Option<ContextOrdering>,
    /// Wall-clock bound on the whole request.
    pub deadline_ms: Option<u64>,
    /// Reference time for freshness; wall clock when unset.
    pub now: Option<DateTime<Utc>>,
}

impl RetrieveOptions {
    #[must_use]
    pub fn with_budget(mut self, max_total_tokens: usize) -> Self {
        self.budget.max_total_tokens = max_total_tokens;
        self
    }

    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    #[must_use]
    pub fn with_sources(mut self, sources: SourceToggles) -> Self {
        self.sources = sources;
        self
    }

    #[must_use]
    pub fn with_lambda(mut self, lambda: f32) -> Self {
        self.lambda = Some(lambda);
        self
    }

    #[must_use]
    pub fn with_compression(mut self, strategy: CompressionStrategy) -> Self {
        self.compression = Some(strategy);
        self
    }

    #[must_use]
    pub fn with_expansion(mut self, strategy: ExpansionStrategy) -> Self {
        self.expansion = Some(strategy);
        self
    }

    #[must_use]
    pub fn with_result_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_results = Some(min);
        self.max_results = Some(max);
        self
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = Some(u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn threshold_overrides(&self) -> ThresholdOverrides {
        ThresholdOverrides {
            threshold: self.threshold,
            min_threshold: self.min_threshold,
            max_threshold: self.max_threshold,
            min_results: self.min_results,
            max_results: self.max_results,
        }
    }

    /// Reject programmer errors before any collaborator is called.
    pub fn validate(&self, query: &str) -> Result<()> {
        if query.trim().is_empty() {
            return Err(EngineError::EmptyQuery);
        }
        if !self.sources.any() {
            return Err(invalid("at least one source must be enabled"));
        }
        if self.budget.max_total_tokens == 0 {
            return Err(invalid("budget.max_total_tokens must be positive"));
        }
        if self.budget.available() == 0 {
            return Err(invalid(format!(
                "reservations ({} history + {} system prompt) consume the whole budget of {}",
                self.budget.reserved_for_history,
                self.budget.reserved_for_system_prompt,
                self.budget.max_total_tokens
            )));
        }
        if self.budget.per_item_estimate == 0 {
            return Err(invalid("budget.per_item_estimate must be positive"));
        }
        if let Some(lambda) = self.lambda {
            if !(0.0..=1.0).contains(&lambda) {
                return Err(invalid(format!("lambda must be within [0, 1], got {lambda}")));
            }
        }
        match (self.min_results, self.max_results) {
            (_, Some(0)) => return Err(invalid("max_results must be positive")),
            (Some(min), Some(max)) if min > max => {
                return Err(invalid(format!("min_results ({min}) exceeds max_results ({max})")));
            }
            _ => {}
        }
        for (name, value) in [
            ("threshold", self.threshold),
            ("min_threshold", self.min_threshold),
            ("max_threshold", self.max_threshold),
        ] {
            if let Some(value) = value {
                if !(0.0..=1.0).contains(&value) {
                    return Err(invalid(format!("{name} must be within [0, 1], got {value}")));
                }
            }
        }
        if let (Some(min), Some(max)) = (self.min_threshold, self.max_threshold) {
            if min > max {
                return Err(invalid(format!(
                    "min_threshold ({min}) exceeds max_threshold ({max})"
                )));
            }
        }
        if self.deadline_ms == Some(0) {
            return Err(invalid("deadline must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidOptions(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rejects(options: RetrieveOptions) -> String {
        match options.validate("what is rust") {
            Err(EngineError::InvalidOptions(msg)) => msg,
            other => panic!("expected InvalidOptions, got {other:?}"),
        }
    }

    #[test]
    fn defaults_are_valid() {
        RetrieveOptions::default().validate("what is rust").unwrap();
    }

    #[test]
    fn blank_query_is_rejected() {
        assert!(matches!(
            RetrieveOptions::default().validate("  \n"),
            Err(EngineError::EmptyQuery)
        ));
    }

    #[test]
    fn bounds_are_checked() {
        assert!(rejects(RetrieveOptions::default().with_result_bounds(10, 2)).contains("min_results"));
        assert!(rejects(RetrieveOptions::default().with_lambda(1.5)).contains("lambda"));
        assert!(rejects(RetrieveOptions::default().with_budget(0)).contains("max_total_tokens"));
        assert!(rejects(RetrieveOptions::default().with_threshold(-0.1)).contains("threshold"));
        assert!(rejects(RetrieveOptions {
            min_threshold: Some(0.8),
            max_threshold: Some(0.2),
            ..RetrieveOptions::default()
        })
        .contains("min_threshold"));
        assert!(rejects(RetrieveOptions::default().with_sources(SourceToggles {
            semantic: false,
            keyword: false,
            web: false,
        }))
        .contains("source"));
    }

    #[test]
    fn reservations_can_exhaust_the_budget() {
        let mut options = RetrieveOptions::default().with_budget(1_000);
        options.budget.reserved_for_history = 1_000;
        assert!(rejects(options).contains("reservations"));
    }

    proptest! {
        #[test]
        fn budget_is_valid_iff_evidence_room_remains(
            total in 0usize..20_000,
            history in 0usize..20_000,
            system in 0usize..20_000,
        ) {
            let mut options = RetrieveOptions::default().with_budget(total);
            options.budget.reserved_for_history = history;
            options.budget.reserved_for_system_prompt = system;
            let room = total.saturating_sub(history).saturating_sub(system);
            prop_assert_eq!(options.validate("what is rust").is_ok(), room > 0);
        }

        #[test]
        fn lambda_is_accepted_only_in_unit_range(lambda in -1.0f32..2.0) {
            let ok = RetrieveOptions::default()
                .with_lambda(lambda)
                .validate("what is rust")
                .is_ok();
            prop_assert_eq!(ok, (0.0..=1.0).contains(&lambda));
        }
    }
}
