use crate::error::{AssemblyError, Result};
use context_protocol::{ContextBudget, QueryProfile, ScoredResult, TokenCounter};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub min_items: usize,
    pub max_items: usize,
    /// Preferred share of corpus (semantic + keyword) items; the rest is web.
    pub document_share: f32,
    /// Scale up when the planned items would use less than this share of the
    /// budget.
    pub underuse_ratio: f32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            min_items: 3,
            max_items: 15,
            document_share: 0.6,
            underuse_ratio: 0.5,
        }
    }
}

impl SelectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_items == 0 || self.min_items > self.max_items {
            return Err(AssemblyError::InvalidConfig(format!(
                "selector needs 1 <= min_items <= max_items, got {}..={}",
                self.min_items, self.max_items
            )));
        }
        if !(0.0..=1.0).contains(&self.document_share) {
            return Err(AssemblyError::InvalidConfig(format!(
                "selector.document_share must be within [0, 1], got {}",
                self.document_share
            )));
        }
        Ok(())
    }
}

/// How many items to take, and from which side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPlan {
    pub total: usize,
    pub document: usize,
    pub web: usize,
    pub per_item_estimate: usize,
    pub available_tokens: usize,
    pub refined: bool,
    pub reasoning: String,
}

/// Selected items plus the plan that produced them.
#[derive(Debug, Clone)]
pub struct Selection {
    pub items: Vec<ScoredResult>,
    pub plan: SelectionPlan,
    /// Sum of body tokens of the selected items.
    pub body_tokens: usize,
}

/// Sizes the context from query complexity and the token budget.
#[derive(Debug, Clone, Default)]
pub struct ContextSelector {
    config: SelectorConfig,
}

impl ContextSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Initial plan: complexity picks a point between `min_items` and
    /// `max_items`, then the estimate per item scales it against the budget.
    #[must_use]
    pub fn plan(&self, profile: &QueryProfile, budget: &ContextBudget) -> SelectionPlan {
        let (min, max) = (self.config.min_items, self.config.max_items.max(self.config.min_items));
        let complexity = profile.complexity_score.clamp(0.0, 1.0);
        let by_complexity = min + ((max - min) as f32 * complexity).round() as usize;

        let available = budget.available();
        let estimate = budget.per_item_estimate.max(1);
        let fit = available / estimate;

        let mut reasoning = format!(
            "complexity {complexity:.2} -> {by_complexity} items; {available} tokens / {estimate} per item fit {fit}"
        );
        let total = if by_complexity > fit {
            reasoning.push_str("; scaled down to budget");
            fit.max(1)
        } else if ((by_complexity * estimate) as f32) < available as f32 * self.config.underuse_ratio {
            let target = (available as f32 * self.config.underuse_ratio / estimate as f32).ceil() as usize;
            let scaled = target.min(max).min(fit).max(by_complexity);
            if scaled > by_complexity {
                reasoning.push_str("; scaled up, budget under-used");
            }
            scaled
        } else {
            by_complexity
        };

        let (document, web) = self.split(total);
        SelectionPlan {
            total,
            document,
            web,
            per_item_estimate: estimate,
            available_tokens: available,
            refined: false,
            reasoning,
        }
    }

    fn split(&self, total: usize) -> (usize, usize) {
        let document = ((total as f32) * self.config.document_share).round() as usize;
        let document = document.min(total);
        (document, total - document)
    }

    /// Apply `plan` to the ranked pool, then run one refinement pass with
    /// real token counts. The pass re-sizes once and never iterates.
    pub fn select(
        &self,
        ranked: &[ScoredResult],
        plan: SelectionPlan,
        counter: &dyn TokenCounter,
    ) -> Selection {
        let picked = apply_plan(ranked, &plan);
        let body_tokens: usize = picked
            .iter()
            .map(|idx| counter.count(&ranked[*idx].result.content))
            .sum();
        if picked.is_empty() {
            return Selection {
                items: Vec::new(),
                plan,
                body_tokens: 0,
            };
        }

        let actual_per_item = (body_tokens / picked.len()).max(1);
        let fit = plan.available_tokens / actual_per_item;
        let refined_total = fit
            .clamp(self.config.min_items.min(plan.total), self.config.max_items)
            .min(ranked.len());

        if refined_total == picked.len() {
            return Selection {
                items: picked.iter().map(|idx| ranked[*idx].clone()).collect(),
                plan,
                body_tokens,
            };
        }

        let (document, web) = self.split(refined_total);
        let refined = SelectionPlan {
            total: refined_total,
            document,
            web,
            per_item_estimate: actual_per_item,
            refined: true,
            reasoning: format!(
                "{}; refined to {refined_total} at {actual_per_item} actual tokens per item",
                plan.reasoning
            ),
            ..plan
        };
        let picked = apply_plan(ranked, &refined);
        let body_tokens = picked
            .iter()
            .map(|idx| counter.count(&ranked[*idx].result.content))
            .sum();
        log::debug!("Selector: {}", refined.reasoning);
        Selection {
            items: picked.iter().map(|idx| ranked[*idx].clone()).collect(),
            plan: refined,
            body_tokens,
        }
    }
}

/// Indices of the chosen items in rank order. Quotas per side come first;
/// a side that runs short hands its slots to the other.
fn apply_plan(ranked: &[ScoredResult], plan: &SelectionPlan) -> Vec<usize> {
    let mut taken = vec![false; ranked.len()];
    let (mut documents, mut webs) = (0usize, 0usize);
    let mut count = 0usize;
    for (idx, scored) in ranked.iter().enumerate() {
        if count >= plan.total {
            break;
        }
        let fits = if scored.source_type().is_corpus() {
            documents < plan.document
        } else {
            webs < plan.web
        };
        if fits {
            taken[idx] = true;
            count += 1;
            if scored.source_type().is_corpus() {
                documents += 1;
            } else {
                webs += 1;
            }
        }
    }
    for slot in taken.iter_mut() {
        if count >= plan.total {
            break;
        }
        if !*slot {
            *slot = true;
            count += 1;
        }
    }
    taken
        .iter()
        .enumerate()
        .filter_map(|(idx, taken)| taken.then_some(idx))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_protocol::{ModelEncoding, QueryIntent, QueryType, RetrievalResult, SourceType};
    use pretty_assertions::assert_eq;

    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }

        fn encoding(&self) -> ModelEncoding {
            ModelEncoding::Cl100kBase
        }
    }

    fn profile(complexity: f32) -> QueryProfile {
        QueryProfile {
            original_query: "q".into(),
            expanded_terms: Vec::new(),
            query_type: QueryType::Unknown,
            intent: QueryIntent::Browse,
            complexity_score: complexity,
            keywords: Vec::new(),
            is_time_sensitive: false,
            topic: None,
        }
    }

    fn item(id: &str, source: SourceType, words: usize) -> ScoredResult {
        ScoredResult::new(
            RetrievalResult::new(id, source, 0.5, vec!["word"; words].join(" ")),
            0,
        )
    }

    fn budget(max: usize, estimate: usize) -> ContextBudget {
        ContextBudget {
            max_total_tokens: max,
            per_item_estimate: estimate,
            ..ContextBudget::default()
        }
    }

    #[test]
    fn complex_queries_get_more_items() {
        let selector = ContextSelector::default();
        let budget = budget(8_000, 400);
        let simple = selector.plan(&profile(0.1), &budget);
        let complex = selector.plan(&profile(0.9), &budget);
        assert!(complex.total > simple.total);
        assert_eq!(simple.document + simple.web, simple.total);
    }

    #[test]
    fn plan_scales_down_to_budget() {
        let plan = ContextSelector::default().plan(&profile(1.0), &budget(1_000, 400));
        assert_eq!(plan.total, 2);
    }

    #[test]
    fn plan_scales_up_when_budget_is_underused() {
        let plan = ContextSelector::default().plan(&profile(0.0), &budget(100_000, 400));
        assert_eq!(plan.total, 15);
    }

    #[test]
    fn short_side_hands_slots_to_the_other() {
        let ranked = vec![
            item("w1", SourceType::Web, 10),
            item("w2", SourceType::Web, 10),
            item("w3", SourceType::Web, 10),
            item("d1", SourceType::Document, 10),
        ];
        let plan = SelectionPlan {
            total: 3,
            document: 2,
            web: 1,
            per_item_estimate: 10,
            available_tokens: 1_000,
            refined: false,
            reasoning: String::new(),
        };
        let picked: Vec<&str> = apply_plan(&ranked, &plan)
            .into_iter()
            .map(|idx| ranked[idx].result.source_id.as_str())
            .collect();
        assert_eq!(picked, vec!["w1", "w2", "d1"]);
    }

    #[test]
    fn refinement_uses_actual_token_counts_once() {
        let selector = ContextSelector::default();
        let ranked: Vec<ScoredResult> = (0..20)
            .map(|i| item(&format!("d{i}"), SourceType::Document, 750))
            .collect();
        let plan = selector.plan(&profile(0.5), &budget(6_000, 400));
        assert_eq!(plan.total, 9);
        let selection = selector.select(&ranked, plan, &WordCounter);
        assert!(selection.plan.refined);
        assert_eq!(selection.items.len(), 8);
        assert_eq!(selection.body_tokens, 6_000);
    }
}
