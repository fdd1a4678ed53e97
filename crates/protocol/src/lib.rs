//! # Context Protocol
//!
//! Shared vocabulary of the context fusion engine: the tagged retrieval result,
//! the per-request query profile and threshold decision, the assembled context
//! returned to callers, and the collaborator contracts the engine consumes.
//!
//! Everything here is plain data plus traits; no pipeline logic.

mod cancel;
mod collaborators;
mod context;
mod error;
mod query;
mod result;

pub use cancel::{CancelHandle, CancelSignal};
pub use collaborators::{
    EmbeddingProvider, GenerationProvider, KeywordIndex, ModelEncoding, SearchFilter,
    TokenCounter, VectorIndex, WebSearch, WebSearchOptions,
};
pub use context::{
    render_entry, AssembledContext, Citation, CompressionKind, ContextBudget, ContextItem,
    DedupStats, PipelineReport, StageTimings,
};
pub use error::{CollaboratorError, CollaboratorResult, Degradation, DegradedReason};
pub use query::{
    QueryIntent, QueryProfile, QueryType, ScoreDistribution, ThresholdDecision,
    ThresholdStrategy,
};
pub use result::{host_of, RetrievalResult, ScoredResult, SourceType};
