//! Contracts for the external systems the engine consumes.
//!
//! None of these are implemented here; the engine only interprets their
//! results and failures. Retry and circuit breaking live behind these traits.

use crate::error::CollaboratorResult;
use crate::result::RetrievalResult;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str, model: &str) -> CollaboratorResult<Vec<f32>>;
}

/// Metadata filter passed through to the vector index untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    #[serde(default)]
    pub document_ids: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Nearest neighbours of `vector`; scores are already in `[0, 1]`.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> CollaboratorResult<Vec<RetrievalResult>>;
}

#[async_trait]
pub trait KeywordIndex: Send + Sync {
    /// Lexical search; scores are unbounded BM25-style values.
    async fn search(&self, query: &str, top_k: usize) -> CollaboratorResult<Vec<RetrievalResult>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSearchOptions {
    pub max_results: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness_days: Option<u32>,
    #[serde(default)]
    pub safe_search: bool,
}

impl Default for WebSearchOptions {
    fn default() -> Self {
        Self {
            max_results: 10,
            freshness_days: None,
            safe_search: true,
        }
    }
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        options: &WebSearchOptions,
    ) -> CollaboratorResult<Vec<RetrievalResult>>;
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: usize) -> CollaboratorResult<String>;
}

/// BPE encodings the token counter can load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ModelEncoding {
    #[default]
    Cl100kBase,
    O200kBase,
    P50kBase,
}

impl ModelEncoding {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cl100kBase => "cl100k_base",
            Self::O200kBase => "o200k_base",
            Self::P50kBase => "p50k_base",
        }
    }
}

impl fmt::Display for ModelEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact token counting for one model encoding.
///
/// Implementations must match the target model's tokenizer; length-based
/// estimates are not acceptable here.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    fn encoding(&self) -> ModelEncoding;
}
