use context_protocol::{DedupStats, RetrievalResult, ScoredResult};
use context_text::{SimilarityWeights, TextFingerprint, DEFAULT_LCS_CHAR_CAP};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Tier 3 cutoff on combined similarity.
    pub similarity_threshold: f32,
    /// Char similarity that confirms a content-hash match.
    pub exact_confirm: f32,
    /// Tier 2 cutoff on combined similarity.
    pub near_threshold: f32,
    pub char_weight: f32,
    pub word_weight: f32,
    /// Characters of normalized text fed to the LCS table.
    pub lcs_char_cap: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            exact_confirm: 0.98,
            near_threshold: 0.95,
            char_weight: 0.6,
            word_weight: 0.4,
            lcs_char_cap: DEFAULT_LCS_CHAR_CAP,
        }
    }
}

impl DedupConfig {
    #[must_use]
    pub fn weights(&self) -> SimilarityWeights {
        SimilarityWeights {
            char_weight: self.char_weight,
            word_weight: self.word_weight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Exact,
    Near,
    Similar,
}

/// Three-tier duplicate removal: exact (hash, confirmed by char similarity),
/// near (combined similarity at `near_threshold`) and similar (combined
/// similarity at `similarity_threshold`).
///
/// Results are visited from highest `raw_score` down, ties broken by source
/// priority then input position. A result is dropped when it matches a result
/// already kept, so the kept member of any duplicate pair always has the
/// higher score. Matching is pairwise: A~B and B~C does not imply A~C.
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    config: DedupConfig,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Survivors in fusion order (score descending, deterministic ties).
    pub fn deduplicate(&self, results: Vec<RetrievalResult>) -> (Vec<RetrievalResult>, DedupStats) {
        let mut stats = DedupStats {
            input: results.len(),
            ..DedupStats::default()
        };
        let weights = self.config.weights();
        let cutoff = self
            .config
            .similarity_threshold
            .min(self.config.near_threshold);

        let fingerprints: Vec<TextFingerprint> = results
            .iter()
            .map(|result| TextFingerprint::new(&result.content, self.config.lcs_char_cap))
            .collect();

        let mut kept: Vec<usize> = Vec::with_capacity(results.len());
        let mut by_hash: HashMap<&str, Vec<usize>> = HashMap::new();

        for idx in fusion_order(&results) {
            let fingerprint = &fingerprints[idx];
            match self.match_tier(fingerprint, &fingerprints, &kept, &by_hash, weights, cutoff) {
                Some((Tier::Exact, survivor)) => {
                    stats.exact_removed += 1;
                    log::trace!(
                        "Exact duplicate {} merged into {}",
                        results[idx].source_id,
                        results[survivor].source_id
                    );
                }
                Some((Tier::Near, survivor)) => {
                    stats.near_removed += 1;
                    log::trace!(
                        "Near duplicate {} merged into {}",
                        results[idx].source_id,
                        results[survivor].source_id
                    );
                }
                Some((Tier::Similar, survivor)) => {
                    stats.similar_removed += 1;
                    log::trace!(
                        "Similar result {} merged into {}",
                        results[idx].source_id,
                        results[survivor].source_id
                    );
                }
                None => {
                    by_hash.entry(fingerprint.hash.as_str()).or_default().push(idx);
                    kept.push(idx);
                }
            }
        }

        let mut slots: Vec<Option<RetrievalResult>> = results.into_iter().map(Some).collect();
        let survivors = kept
            .into_iter()
            .filter_map(|idx| slots[idx].take())
            .collect();
        (survivors, stats)
    }

    fn match_tier(
        &self,
        fingerprint: &TextFingerprint,
        fingerprints: &[TextFingerprint],
        kept: &[usize],
        by_hash: &HashMap<&str, Vec<usize>>,
        weights: SimilarityWeights,
        cutoff: f32,
    ) -> Option<(Tier, usize)> {
        if let Some(group) = by_hash.get(fingerprint.hash.as_str()) {
            let confirmed = group.iter().find(|&&other| {
                fingerprints[other].char_similarity(fingerprint) >= self.config.exact_confirm
            });
            if let Some(&other) = confirmed {
                return Some((Tier::Exact, other));
            }
        }

        let mut best: Option<(f32, usize)> = None;
        for &other in kept {
            let Some(score) = fingerprints[other].combined_at_least(fingerprint, weights, cutoff)
            else {
                continue;
            };
            if best.map_or(true, |(best_score, _)| score > best_score) {
                best = Some((score, other));
            }
            if score >= self.config.near_threshold {
                break;
            }
        }

        let (score, other) = best?;
        if score >= self.config.near_threshold {
            Some((Tier::Near, other))
        } else if score >= self.config.similarity_threshold {
            Some((Tier::Similar, other))
        } else {
            None
        }
    }
}

/// Indices ordered by `raw_score` descending, then source priority, then
/// input position.
fn fusion_order(results: &[RetrievalResult]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..results.len()).collect();
    order.sort_by(|&a, &b| {
        let (ra, rb) = (&results[a], &results[b]);
        rb.raw_score
            .total_cmp(&ra.raw_score)
            .then_with(|| ra.source_type.priority().cmp(&rb.source_type.priority()))
            .then_with(|| a.cmp(&b))
    });
    order
}

/// Fusion result: deduplicated survivors with their fusion rank.
#[derive(Debug, Clone, Default)]
pub struct FusionOutput {
    pub results: Vec<ScoredResult>,
    pub stats: DedupStats,
}

/// Merge per-source lists into one deduplicated, deterministically ordered list.
#[must_use]
pub fn fuse(results: Vec<RetrievalResult>, dedup: &Deduplicator) -> FusionOutput {
    let (survivors, stats) = dedup.deduplicate(results);
    log::debug!(
        "Fusion: {} in, {} out (exact -{}, near -{}, similar -{})",
        stats.input,
        survivors.len(),
        stats.exact_removed,
        stats.near_removed,
        stats.similar_removed
    );
    let results = survivors
        .into_iter()
        .enumerate()
        .map(|(rank, result)| ScoredResult::new(result, rank))
        .collect();
    FusionOutput { results, stats }
}

/// Descending by `combined_score`; equal scores keep their current order.
pub fn sort_by_combined(results: &mut [ScoredResult]) {
    results.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(Ordering::Equal)
    });
}
