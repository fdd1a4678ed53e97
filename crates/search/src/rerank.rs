use crate::error::{Result, SearchError};
use crate::fusion::sort_by_combined;
use context_protocol::{QueryProfile, ScoredResult};
use context_text::{normalize, word_set, word_tokens};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankWeights {
    pub relevance: f32,
    pub authority: f32,
    pub freshness: f32,
    pub quality: f32,
    /// Weight of the source's own `raw_score`.
    pub original: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            relevance: 0.4,
            authority: 0.15,
            freshness: 0.1,
            quality: 0.15,
            original: 0.2,
        }
    }
}

impl RerankWeights {
    fn sum(&self) -> f32 {
        self.relevance + self.authority + self.freshness + self.quality + self.original
    }

    /// Weights scaled to sum to 1.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let sum = self.sum();
        if sum <= f32::EPSILON {
            return Self::default();
        }
        Self {
            relevance: self.relevance / sum,
            authority: self.authority / sum,
            freshness: self.freshness / sum,
            quality: self.quality / sum,
            original: self.original / sum,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let all = [
            self.relevance,
            self.authority,
            self.freshness,
            self.quality,
            self.original,
        ];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SearchError::InvalidConfig(
                "rerank weights must be finite and non-negative".to_string(),
            ));
        }
        if self.sum() <= f32::EPSILON {
            return Err(SearchError::InvalidConfig(
                "rerank weights must not all be zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub weights: RerankWeights,
    /// Share of relevance earned by title matches.
    pub title_share: f32,
    /// Added when the query phrase appears verbatim.
    pub phrase_boost: f32,
    /// Weight of an expansion term relative to a query keyword.
    pub expanded_weight: f32,
    /// Relevance when the query has no usable terms.
    pub neutral_relevance: f32,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            weights: RerankWeights::default(),
            title_share: 0.3,
            phrase_boost: 0.2,
            expanded_weight: 0.5,
            neutral_relevance: 0.5,
        }
    }
}

struct WeightedTerm {
    words: Vec<String>,
    weight: f32,
}

/// Query terms prepared once per request.
struct RelevanceQuery {
    terms: Vec<WeightedTerm>,
    total_weight: f32,
    phrases: Vec<String>,
}

impl RelevanceQuery {
    fn new(profile: &QueryProfile, expanded_weight: f32) -> Self {
        let mut terms: Vec<WeightedTerm> = profile
            .keywords
            .iter()
            .map(|keyword| WeightedTerm {
                words: vec![keyword.to_lowercase()],
                weight: 1.0,
            })
            .collect();
        let known: HashSet<String> = profile.keywords.iter().map(|k| k.to_lowercase()).collect();
        for term in &profile.expanded_terms {
            let words = word_tokens(term);
            if words.is_empty() || (words.len() == 1 && known.contains(&words[0])) {
                continue;
            }
            terms.push(WeightedTerm {
                words,
                weight: expanded_weight,
            });
        }
        let total_weight = terms.iter().map(|t| t.weight).sum();

        let mut phrases = Vec::new();
        let query = normalize(profile.original_query.trim_end_matches(['?', '.', '!']));
        if query.split(' ').count() >= 2 {
            phrases.push(query);
        }
        if profile.keywords.len() >= 2 {
            let joined = profile.keywords.join(" ");
            if !phrases.contains(&joined) {
                phrases.push(joined);
            }
        }
        Self {
            terms,
            total_weight,
            phrases,
        }
    }
}

/// Multi-factor re-ranker: keyword relevance blended with the authority,
/// freshness and quality annotations and the source score.
#[derive(Debug, Clone, Default)]
pub struct Reranker {
    config: RerankConfig,
}

impl Reranker {
    pub fn new(config: RerankConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &RerankConfig {
        &self.config
    }

    /// Query-term overlap in `[0, 1]`, weighted toward title matches and
    /// boosted for verbatim phrase matches.
    #[must_use]
    pub fn relevance(&self, profile: &QueryProfile, scored: &ScoredResult) -> f32 {
        self.relevance_with(&RelevanceQuery::new(profile, self.config.expanded_weight), scored)
    }

    fn relevance_with(&self, query: &RelevanceQuery, scored: &ScoredResult) -> f32 {
        if query.total_weight <= 0.0 {
            return self.config.neutral_relevance;
        }
        let content_words = word_set(&scored.result.content);
        let title_words = word_set(&scored.result.title);

        let mut any_hit = 0.0;
        let mut title_hit = 0.0;
        for term in &query.terms {
            let in_content = term.words.iter().all(|w| content_words.contains(w));
            let in_title = term.words.iter().all(|w| title_words.contains(w));
            if in_content || in_title {
                any_hit += term.weight;
            }
            if in_title {
                title_hit += term.weight;
            }
        }
        let share = self.config.title_share.clamp(0.0, 1.0);
        let mut relevance = (1.0 - share) * (any_hit / query.total_weight)
            + share * (title_hit / query.total_weight);

        if !query.phrases.is_empty() {
            let content = normalize(&scored.result.content);
            let title = normalize(&scored.result.title);
            let phrase_hit = query
                .phrases
                .iter()
                .any(|phrase| content.contains(phrase.as_str()) || title.contains(phrase.as_str()));
            if phrase_hit {
                relevance += self.config.phrase_boost;
            }
        }
        relevance.clamp(0.0, 1.0)
    }

    /// Fill `relevance_score` and `combined_score`. Quality, authority and
    /// freshness must already be annotated.
    pub fn score(&self, profile: &QueryProfile, results: &mut [ScoredResult]) {
        let query = RelevanceQuery::new(profile, self.config.expanded_weight);
        let weights = self.config.weights.normalized();
        for scored in results.iter_mut() {
            scored.relevance_score = self.relevance_with(&query, scored);
            scored.combined_score = (weights.relevance * scored.relevance_score
                + weights.authority * scored.authority_score
                + weights.freshness * scored.freshness_score
                + weights.quality * scored.quality_score
                + weights.original * scored.result.raw_score.clamp(0.0, 1.0))
            .clamp(0.0, 1.0);
        }
    }

    /// Stable sort, descending by combined score; ties keep fusion order.
    pub fn rank(&self, results: &mut [ScoredResult]) {
        sort_by_combined(results);
        if let (Some(first), Some(last)) = (results.first(), results.last()) {
            log::debug!(
                "Ranked {} results, combined {:.3}..{:.3}",
                results.len(),
                last.combined_score,
                first.combined_score
            );
        }
    }
}
