use crate::error::{Result, SearchError};
use context_protocol::{ScoredResult, SourceType};
use context_text::{jaccard, word_set};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiversityConfig {
    pub enabled: bool,
    /// 1.0 is pure relevance, 0.0 pure novelty.
    pub lambda: f32,
    pub max_per_source: usize,
    /// Cap per origin (web domain, document id).
    pub max_per_domain: usize,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lambda: 0.7,
            max_per_source: 10,
            max_per_domain: 3,
        }
    }
}

impl DiversityConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.lambda) {
            return Err(SearchError::InvalidConfig(format!(
                "diversity.lambda must be within [0, 1], got {}",
                self.lambda
            )));
        }
        if self.max_per_source == 0 || self.max_per_domain == 0 {
            return Err(SearchError::InvalidConfig(
                "diversity caps must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// MMR selection: repeatedly take the candidate maximizing
/// `λ·combined − (1−λ)·max_similarity_to_selected`, skipping candidates whose
/// source or origin is already at its cap.
#[derive(Debug, Clone, Default)]
pub struct DiversityFilter {
    config: DiversityConfig,
}

impl DiversityFilter {
    pub fn new(config: DiversityConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &DiversityConfig {
        &self.config
    }

    /// Select up to `target` results from `ranked` (already sorted by
    /// combined score). `lambda` overrides the configured trade-off.
    #[must_use]
    pub fn select(
        &self,
        ranked: Vec<ScoredResult>,
        target: usize,
        lambda: Option<f32>,
    ) -> Vec<ScoredResult> {
        if !self.config.enabled {
            let mut top = ranked;
            top.truncate(target);
            return top;
        }
        let lambda = lambda.unwrap_or(self.config.lambda).clamp(0.0, 1.0);
        let words: Vec<HashSet<String>> = ranked
            .iter()
            .map(|scored| word_set(&scored.result.content))
            .collect();
        let origins: Vec<String> = ranked.iter().map(|s| s.result.origin_key()).collect();

        let mut remaining: Vec<usize> = (0..ranked.len()).collect();
        let mut chosen: Vec<usize> = Vec::with_capacity(target.min(ranked.len()));
        let mut per_source: BTreeMap<SourceType, usize> = BTreeMap::new();
        let mut per_origin: HashMap<&str, usize> = HashMap::new();
        // Max similarity of each candidate to anything chosen so far.
        let mut redundancy = vec![0.0_f32; ranked.len()];

        while chosen.len() < target && !remaining.is_empty() {
            let mut best: Option<(usize, f32)> = None;
            for (pos, &idx) in remaining.iter().enumerate() {
                let source = ranked[idx].source_type();
                if per_source.get(&source).copied().unwrap_or(0) >= self.config.max_per_source {
                    continue;
                }
                if per_origin.get(origins[idx].as_str()).copied().unwrap_or(0)
                    >= self.config.max_per_domain
                {
                    continue;
                }
                let mmr = lambda * ranked[idx].combined_score - (1.0 - lambda) * redundancy[idx];
                if best.map_or(true, |(_, score)| mmr > score) {
                    best = Some((pos, mmr));
                }
            }
            let Some((pos, _)) = best else {
                break;
            };
            let idx = remaining.remove(pos);
            *per_source.entry(ranked[idx].source_type()).or_insert(0) += 1;
            *per_origin.entry(origins[idx].as_str()).or_insert(0) += 1;
            for &other in &remaining {
                let sim = jaccard(&words[idx], &words[other]);
                if sim > redundancy[other] {
                    redundancy[other] = sim;
                }
            }
            chosen.push(idx);
        }

        log::debug!(
            "Diversity: selected {} of {} (lambda {:.2})",
            chosen.len(),
            ranked.len(),
            lambda
        );
        let mut slots: Vec<Option<ScoredResult>> = ranked.into_iter().map(Some).collect();
        chosen
            .into_iter()
            .filter_map(|idx| slots[idx].take())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_protocol::RetrievalResult;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn web(id: &str, url: &str, content: &str, combined: f32) -> ScoredResult {
        let mut scored = ScoredResult::new(
            RetrievalResult::new(id, SourceType::Web, combined, content).with_url(url),
            0,
        );
        scored.combined_score = combined;
        scored
    }

    fn ids(results: &[ScoredResult]) -> Vec<&str> {
        results.iter().map(|r| r.result.source_id.as_str()).collect()
    }

    #[test]
    fn redundant_results_give_way_to_novel_ones() {
        let ranked = vec![
            web("a", "https://a.com/1", "solar panels convert sunlight to electricity", 0.9),
            web("b", "https://b.com/1", "solar panels convert sunlight into electricity", 0.85),
            web("c", "https://c.com/1", "wind turbines generate power from moving air", 0.7),
        ];
        let filter = DiversityFilter::new(DiversityConfig {
            lambda: 0.5,
            ..DiversityConfig::default()
        });
        assert_eq!(ids(&filter.select(ranked, 2, None)), vec!["a", "c"]);
    }

    #[test]
    fn lambda_one_is_pure_relevance() {
        let ranked = vec![
            web("a", "https://a.com/1", "same words here", 0.9),
            web("b", "https://b.com/1", "same words here", 0.85),
            web("c", "https://c.com/1", "different topic entirely", 0.7),
        ];
        let filter = DiversityFilter::default();
        assert_eq!(ids(&filter.select(ranked, 2, Some(1.0))), vec!["a", "b"]);
    }

    #[test]
    fn domain_cap_is_enforced() {
        let ranked: Vec<ScoredResult> = (0..6)
            .map(|i| {
                web(
                    &format!("r{i}"),
                    &format!("https://www.same.org/{i}"),
                    &format!("topic {i} unique{i}"),
                    0.9 - i as f32 * 0.01,
                )
            })
            .chain(std::iter::once(web("other", "https://other.net/", "another", 0.1)))
            .collect();
        let filter = DiversityFilter::new(DiversityConfig {
            max_per_domain: 2,
            ..DiversityConfig::default()
        });
        let selected = filter.select(ranked, 5, None);
        assert_eq!(ids(&selected), vec!["r0", "r1", "other"]);
    }

    #[test]
    fn disabled_filter_is_plain_top_k() {
        let ranked = vec![
            web("a", "https://a.com", "x", 0.9),
            web("b", "https://a.com", "x", 0.8),
            web("c", "https://a.com", "x", 0.7),
            web("d", "https://a.com", "x", 0.6),
        ];
        let filter = DiversityFilter::new(DiversityConfig {
            enabled: false,
            max_per_domain: 1,
            ..DiversityConfig::default()
        });
        assert_eq!(ids(&filter.select(ranked, 3, None)), vec!["a", "b", "c"]);
    }

    proptest! {
        #[test]
        fn no_origin_or_source_exceeds_its_cap(
            items in prop::collection::vec((0usize..4, 0usize..3, 0.0f32..=1.0), 0..30),
            target in 0usize..20,
            max_per_domain in 1usize..4,
            max_per_source in 1usize..6,
        ) {
            let ranked: Vec<ScoredResult> = items
                .iter()
                .enumerate()
                .map(|(i, (domain, source, score))| {
                    let mut scored = ScoredResult::new(
                        RetrievalResult::new(format!("r{i}"), SourceType::ALL[*source], *score, format!("text {i}"))
                            .with_url(format!("https://d{domain}.example.com/{i}")),
                        i,
                    );
                    scored.combined_score = *score;
                    scored
                })
                .collect();
            let filter = DiversityFilter::new(DiversityConfig {
                max_per_domain,
                max_per_source,
                ..DiversityConfig::default()
            });
            let selected = filter.select(ranked, target, None);
            prop_assert!(selected.len() <= target);
            let mut domains: HashMap<String, usize> = HashMap::new();
            let mut sources: HashMap<SourceType, usize> = HashMap::new();
            for s in &selected {
                *domains.entry(s.result.origin_key()).or_default() += 1;
                *sources.entry(s.source_type()).or_default() += 1;
            }
            prop_assert!(domains.values().all(|n| *n <= max_per_domain));
            prop_assert!(sources.values().all(|n| *n <= max_per_source));
        }
    }
}
