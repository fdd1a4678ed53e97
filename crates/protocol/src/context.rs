use crate::error::Degradation;
use crate::query::{QueryProfile, ThresholdDecision};
use crate::result::{ScoredResult, SourceType};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Token allowance for the assembled context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ContextBudget {
    pub max_total_tokens: usize,
    pub reserved_for_history: usize,
    pub reserved_for_system_prompt: usize,
    pub per_item_estimate: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_total_tokens: 8_000,
            reserved_for_history: 0,
            reserved_for_system_prompt: 0,
            per_item_estimate: 400,
        }
    }
}

impl ContextBudget {
    #[must_use]
    pub fn with_max_tokens(max_total_tokens: usize) -> Self {
        Self {
            max_total_tokens,
            ..Self::default()
        }
    }

    /// Tokens left for evidence once the reservations are taken out.
    #[must_use]
    pub fn available(&self) -> usize {
        self.max_total_tokens
            .saturating_sub(self.reserved_for_history)
            .saturating_sub(self.reserved_for_system_prompt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CompressionKind {
    #[default]
    None,
    Truncated,
    Extracted,
    Summarized,
    /// Body removed entirely; only the citation header remains.
    HeaderOnly,
}

/// One entry of the assembled context.
///
/// `header` carries the citation marker and is never altered by compression;
/// only `body` shrinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContextItem {
    pub citation_id: usize,
    pub marker: String,
    pub header: String,
    pub body: String,
    pub tokens: usize,
    pub compression: CompressionKind,
    pub scored: ScoredResult,
}

impl ContextItem {
    /// Header and body as they appear in the context string.
    #[must_use]
    pub fn rendered(&self) -> String {
        render_entry(&self.header, &self.body)
    }
}

#[must_use]
pub fn render_entry(header: &str, body: &str) -> String {
    if body.is_empty() {
        header.to_string()
    } else {
        format!("{header}\n{body}")
    }
}

/// Source record a citation marker resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Citation {
    pub citation_id: usize,
    pub marker: String,
    pub source_id: String,
    pub source_type: SourceType,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct DedupStats {
    pub input: usize,
    pub exact_removed: usize,
    pub near_removed: usize,
    pub similar_removed: usize,
}

impl DedupStats {
    #[must_use]
    pub fn survivors(&self) -> usize {
        self.input
            .saturating_sub(self.exact_removed + self.near_removed + self.similar_removed)
    }
}

/// Wall-clock milliseconds spent in each pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct StageTimings {
    pub analyze_ms: u64,
    pub retrieve_ms: u64,
    pub fuse_ms: u64,
    pub rank_ms: u64,
    pub compress_ms: u64,
    pub assemble_ms: u64,
}

/// Counts and decisions from each stage, for observability.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct PipelineReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<QueryProfile>,
    pub retrieved: BTreeMap<SourceType, usize>,
    pub dedup: DedupStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<ThresholdDecision>,
    pub after_threshold: usize,
    pub after_diversity: usize,
    pub selected: usize,
    pub compressed: usize,
    pub timings: StageTimings,
}

/// Terminal output of the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct AssembledContext {
    pub text: String,
    pub items: Vec<ContextItem>,
    /// `citation_id -> source record`.
    pub citations: BTreeMap<usize, Citation>,
    /// Markers in `text` that resolve to no item.
    pub dangling_citations: Vec<String>,
    pub degradations: Vec<Degradation>,
    pub degraded: bool,
    pub total_tokens: usize,
    pub report: PipelineReport,
}

impl AssembledContext {
    /// Empty context carrying only degradation flags.
    #[must_use]
    pub fn empty(degradations: Vec<Degradation>, report: PipelineReport) -> Self {
        Self {
            degraded: !degradations.is_empty(),
            degradations,
            report,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn items_tokens(&self) -> usize {
        self.items.iter().map(|item| item.tokens).sum()
    }
}
