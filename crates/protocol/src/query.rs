use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Factual,
    Conceptual,
    Procedural,
    Exploratory,
    Analytical,
    Comparative,
    Unknown,
}

impl QueryType {
    pub const ALL: [QueryType; 7] = [
        QueryType::Factual,
        QueryType::Conceptual,
        QueryType::Procedural,
        QueryType::Exploratory,
        QueryType::Analytical,
        QueryType::Comparative,
        QueryType::Unknown,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Factual => "factual",
            Self::Conceptual => "conceptual",
            Self::Procedural => "procedural",
            Self::Exploratory => "exploratory",
            Self::Analytical => "analytical",
            Self::Comparative => "comparative",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user is trying to do, derived from the query type plus wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Lookup,
    Learn,
    HowTo,
    Compare,
    Analyze,
    Browse,
}

/// Per-request description of the query. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueryProfile {
    pub original_query: String,
    pub expanded_terms: Vec<String>,
    pub query_type: QueryType,
    pub intent: QueryIntent,
    /// `[0, 1]`; higher means more evidence is needed.
    pub complexity_score: f32,
    pub keywords: Vec<String>,
    pub is_time_sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl QueryProfile {
    /// Keywords followed by expansion terms, deduplicated, lowercased.
    #[must_use]
    pub fn search_terms(&self) -> Vec<String> {
        let mut terms: Vec<String> = Vec::with_capacity(self.keywords.len() + self.expanded_terms.len());
        for term in self.keywords.iter().chain(self.expanded_terms.iter()) {
            let lowered = term.trim().to_lowercase();
            if !lowered.is_empty() && !terms.contains(&lowered) {
                terms.push(lowered);
            }
        }
        terms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdStrategy {
    /// Percentile of the observed combined-score distribution.
    Distribution,
    /// Static per-query-type default.
    QueryType,
    /// Result-count targets forced a step adjustment, or no scores were usable.
    Fallback,
    /// Caller pinned the threshold.
    Override,
}

/// Summary statistics of a score list.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ScoreDistribution {
    pub count: usize,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub median: f32,
    pub std_dev: f32,
    pub p25: f32,
    pub p50: f32,
    pub p75: f32,
    pub p90: f32,
    pub p95: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ThresholdDecision {
    pub threshold: f32,
    pub strategy: ThresholdStrategy,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<ScoreDistribution>,
    /// Threshold before count-target adjustment, when one happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted_from: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_terms_merge_keywords_and_expansion() {
        let profile = QueryProfile {
            original_query: "rust async".to_string(),
            expanded_terms: vec!["Tokio".to_string(), "async".to_string(), " ".to_string()],
            query_type: QueryType::Exploratory,
            intent: QueryIntent::Browse,
            complexity_score: 0.2,
            keywords: vec!["rust".to_string(), "async".to_string()],
            is_time_sensitive: false,
            topic: None,
        };
        assert_eq!(profile.search_terms(), vec!["rust", "async", "tokio"]);
    }

    #[test]
    fn query_type_serializes_snake_case() {
        let json = serde_json::to_string(&QueryType::Comparative).unwrap();
        assert_eq!(json, "\"comparative\"");
    }
}
