//! Collaborators backed by a JSON fixture of pre-computed per-source results.

use anyhow::{Context as AnyhowContext, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use context_engine::EngineBuilder;
use context_protocol::{
    CollaboratorError, CollaboratorResult, EmbeddingProvider, GenerationProvider, KeywordIndex,
    RetrievalResult, SearchFilter, SourceType, VectorIndex, WebSearch, WebSearchOptions,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureResult {
    pub id: String,
    pub score: f32,
    pub content: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl FixtureResult {
    fn into_result(self, source_type: SourceType) -> RetrievalResult {
        let mut result = RetrievalResult::new(self.id, source_type, self.score, self.content)
            .with_title(self.title);
        result.url = self.url;
        result.document_id = self.document_id;
        result.published_at = self.published_at;
        result.author = self.author;
        result.metadata = self.metadata;
        result
    }
}

/// A source is either its result list or `{"error": "..."}` to simulate an
/// outage.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FixtureSource {
    Results(Vec<FixtureResult>),
    Failure { error: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FixtureGeneration {
    Response { response: String },
    Failure { error: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fixture {
    #[serde(default)]
    pub semantic: Option<FixtureSource>,
    #[serde(default)]
    pub keyword: Option<FixtureSource>,
    #[serde(default)]
    pub web: Option<FixtureSource>,
    #[serde(default)]
    pub generation: Option<FixtureGeneration>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid fixture {}", path.display()))
    }

    #[must_use]
    pub fn has_generation(&self) -> bool {
        self.generation.is_some()
    }

    /// Register every source present in the fixture on `builder`.
    pub fn install(&self, mut builder: EngineBuilder) -> EngineBuilder {
        if let Some(source) = &self.semantic {
            let index = Arc::new(FixtureIndex::new(source, SourceType::Document));
            builder = builder.semantic(Arc::new(FixtureEmbedder), index);
        }
        if let Some(source) = &self.keyword {
            builder = builder.keyword(Arc::new(FixtureIndex::new(source, SourceType::Keyword)));
        }
        if let Some(source) = &self.web {
            builder = builder.web(Arc::new(FixtureIndex::new(source, SourceType::Web)));
        }
        if let Some(generation) = &self.generation {
            builder = builder.generator(Arc::new(FixtureGenerator(generation.clone())));
        }
        builder
    }
}

struct FixtureIndex {
    outcome: Result<Vec<RetrievalResult>, String>,
}

impl FixtureIndex {
    fn new(source: &FixtureSource, source_type: SourceType) -> Self {
        let outcome = match source {
            FixtureSource::Results(results) => Ok(results
                .iter()
                .cloned()
                .map(|result| result.into_result(source_type))
                .collect()),
            FixtureSource::Failure { error } => Err(error.clone()),
        };
        Self { outcome }
    }

    fn top(&self, top_k: usize) -> CollaboratorResult<Vec<RetrievalResult>> {
        match &self.outcome {
            Ok(results) => Ok(results.iter().take(top_k).cloned().collect()),
            Err(error) => Err(CollaboratorError::Unavailable(error.clone())),
        }
    }
}

#[async_trait]
impl VectorIndex for FixtureIndex {
    async fn query(
        &self,
        _vector: &[f32],
        top_k: usize,
        _filter: Option<&SearchFilter>,
    ) -> CollaboratorResult<Vec<RetrievalResult>> {
        self.top(top_k)
    }
}

#[async_trait]
impl KeywordIndex for FixtureIndex {
    async fn search(&self, _query: &str, top_k: usize) -> CollaboratorResult<Vec<RetrievalResult>> {
        self.top(top_k)
    }
}

#[async_trait]
impl WebSearch for FixtureIndex {
    async fn search(
        &self,
        _query: &str,
        options: &WebSearchOptions,
    ) -> CollaboratorResult<Vec<RetrievalResult>> {
        self.top(options.max_results)
    }
}

/// Fixture vectors are pre-ranked; the embedding is never inspected.
struct FixtureEmbedder;

#[async_trait]
impl EmbeddingProvider for FixtureEmbedder {
    async fn embed(&self, _text: &str, _model: &str) -> CollaboratorResult<Vec<f32>> {
        Ok(Vec::new())
    }
}

struct FixtureGenerator(FixtureGeneration);

#[async_trait]
impl GenerationProvider for FixtureGenerator {
    async fn complete(&self, _prompt: &str, _max_tokens: usize) -> CollaboratorResult<String> {
        match &self.0 {
            FixtureGeneration::Response { response } => Ok(response.clone()),
            FixtureGeneration::Failure { error } => Err(CollaboratorError::Unavailable(error.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_results_and_outages() {
        let fixture: Fixture = serde_json::from_str(
            r#"{
                "semantic": [{"id": "a", "score": 0.9, "content": "Alpha."}],
                "keyword": {"error": "index offline"},
                "generation": {"response": "short"}
            }"#,
        )
        .unwrap();
        assert!(matches!(fixture.semantic, Some(FixtureSource::Results(ref r)) if r.len() == 1));
        assert!(matches!(fixture.keyword, Some(FixtureSource::Failure { .. })));
        assert!(fixture.web.is_none());
        assert!(fixture.has_generation());
    }

    #[test]
    fn fixture_results_take_their_list_source_type() {
        let source = FixtureSource::Results(vec![FixtureResult {
            id: "w".into(),
            score: 0.5,
            content: "Body.".into(),
            title: "T".into(),
            url: Some("https://example.com".into()),
            document_id: None,
            published_at: None,
            author: None,
            metadata: BTreeMap::new(),
        }]);
        let index = FixtureIndex::new(&source, SourceType::Web);
        let results = index.top(10).unwrap();
        assert_eq!(results[0].source_type, SourceType::Web);
        assert_eq!(results[0].url.as_deref(), Some("https://example.com"));
    }
}
