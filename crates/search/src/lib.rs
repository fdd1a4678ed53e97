//! # Context Search
//!
//! Everything between the raw query and a ranked, diversified result list:
//!
//! - **Query analysis**: type, intent, complexity, keywords, time sensitivity
//! - **Query expansion**: LLM, synonym-table and hybrid strategies behind a
//!   shared TTL + LRU cache
//! - **Fan-out**: concurrent semantic, keyword and web retrieval where each
//!   source degrades independently
//! - **Fusion**: exact, near and similarity-tier deduplication
//! - **Scoring**: content quality, domain authority, freshness
//! - **Threshold**: per-request cutoff from the score distribution
//! - **Ranking**: weighted re-rank followed by MMR diversity selection

mod diversity;
mod error;
mod fanout;
mod fusion;
mod quality;
mod query_classifier;
mod query_expansion;
mod rerank;
mod threshold;

pub use diversity::{DiversityConfig, DiversityFilter};
pub use error::{ExpansionError, Result, SearchError};
pub use fanout::{
    scope_query, FanoutConfig, FanoutOutcome, RetrievalFanout, RetrievalSources, SourceOutcome,
    SourceToggles,
};
pub use fusion::{fuse, sort_by_combined, DedupConfig, Deduplicator, FusionOutput};
pub use quality::{
    freshness_score, AuthorityConfig, AuthorityPattern, AuthorityTable, DomainAuthority,
    FreshnessConfig, QualityConfig, QualityScorer, ResultScorer,
};
pub use query_classifier::{QueryAnalyzer, QueryClassifier};
pub use query_expansion::{
    Expansion, ExpansionCache, ExpansionCacheStats, ExpansionConfig, ExpansionStrategy,
    QueryExpander, SynonymTable,
};
pub use rerank::{RerankConfig, RerankWeights, Reranker};
pub use threshold::{
    apply_threshold, score_distribution, QueryTypeValues, ThresholdConfig, ThresholdOptimizer,
    ThresholdOverrides,
};
