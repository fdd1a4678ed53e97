#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use context_engine::{EngineConfig, RetrievalEngine};
use context_protocol::{
    CollaboratorError, CollaboratorResult, EmbeddingProvider, GenerationProvider, KeywordIndex,
    ModelEncoding, RetrievalResult, SearchFilter, SourceType, TokenCounter, VectorIndex,
    WebSearch, WebSearchOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// One token per whitespace-separated word.
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }

    fn encoding(&self) -> ModelEncoding {
        ModelEncoding::Cl100kBase
    }
}

/// Deterministic filler prose of random lowercase words, distinct per seed.
pub fn prose(seed: u64, words: usize) -> String {
    let mut state = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
    let mut next = move || {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (state >> 33) as usize
    };
    let mut out = String::new();
    for i in 0..words {
        let len = 3 + next() % 6;
        let word: String = (0..len)
            .map(|_| char::from(b'a' + (next() % 26) as u8))
            .collect();
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&word);
        if i % 12 == 11 {
            out.push('.');
        }
    }
    out.push('.');
    out
}

pub fn doc(id: &str, score: f32, content: impl Into<String>) -> RetrievalResult {
    RetrievalResult::new(id, SourceType::Document, score, content).with_title(format!("Doc {id}"))
}

pub fn page(id: &str, score: f32, url: &str, content: impl Into<String>) -> RetrievalResult {
    RetrievalResult::new(id, SourceType::Web, score, content)
        .with_title(format!("Page {id}"))
        .with_url(url)
}

#[derive(Clone)]
pub enum Behavior {
    Results(Vec<RetrievalResult>),
    Fail(String),
    Hang,
}

/// Plays one source: fixed results, a failure, or a call that never returns
/// in time. Counts calls.
pub struct Scripted {
    behavior: Behavior,
    pub calls: AtomicUsize,
}

impl Scripted {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn results(results: Vec<RetrievalResult>) -> Arc<Self> {
        Self::new(Behavior::Results(results))
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::new(Behavior::Fail(message.to_string()))
    }

    pub fn hanging() -> Arc<Self> {
        Self::new(Behavior::Hang)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn play(&self) -> CollaboratorResult<Vec<RetrievalResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Results(results) => Ok(results.clone()),
            Behavior::Fail(message) => Err(CollaboratorError::Unavailable(message.clone())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl VectorIndex for Scripted {
    async fn query(
        &self,
        _vector: &[f32],
        top_k: usize,
        _filter: Option<&SearchFilter>,
    ) -> CollaboratorResult<Vec<RetrievalResult>> {
        let mut results = self.play().await?;
        results.truncate(top_k);
        Ok(results)
    }
}

#[async_trait]
impl KeywordIndex for Scripted {
    async fn search(&self, _query: &str, top_k: usize) -> CollaboratorResult<Vec<RetrievalResult>> {
        let mut results = self.play().await?;
        results.truncate(top_k);
        Ok(results)
    }
}

#[async_trait]
impl WebSearch for Scripted {
    async fn search(
        &self,
        _query: &str,
        options: &WebSearchOptions,
    ) -> CollaboratorResult<Vec<RetrievalResult>> {
        let mut results = self.play().await?;
        results.truncate(options.max_results);
        Ok(results)
    }
}

pub struct FixedEmbedder;

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, _text: &str, _model: &str) -> CollaboratorResult<Vec<f32>> {
        Ok(vec![0.1, 0.2, 0.3])
    }
}

pub struct BrokenEmbedder;

#[async_trait]
impl EmbeddingProvider for BrokenEmbedder {
    async fn embed(&self, _text: &str, _model: &str) -> CollaboratorResult<Vec<f32>> {
        Err(CollaboratorError::Unavailable("embedding model offline".into()))
    }
}

/// Answers every prompt with the same short text.
pub struct ShortGenerator;

#[async_trait]
impl GenerationProvider for ShortGenerator {
    async fn complete(&self, _prompt: &str, _max_tokens: usize) -> CollaboratorResult<String> {
        Ok("Condensed passage.".to_string())
    }
}

pub struct Sources {
    pub semantic: Option<Arc<Scripted>>,
    pub keyword: Option<Arc<Scripted>>,
    pub web: Option<Arc<Scripted>>,
}

impl Sources {
    pub fn semantic(results: Vec<RetrievalResult>) -> Self {
        Self {
            semantic: Some(Scripted::results(results)),
            keyword: None,
            web: None,
        }
    }
}

pub fn engine_with(config: EngineConfig, sources: &Sources) -> RetrievalEngine {
    engine_with_counter(config, sources, Arc::new(WordCounter))
}

pub fn engine_with_counter(
    config: EngineConfig,
    sources: &Sources,
    counter: Arc<dyn TokenCounter>,
) -> RetrievalEngine {
    let mut builder = RetrievalEngine::builder(config).token_counter(counter);
    if let Some(semantic) = &sources.semantic {
        let vector: Arc<dyn VectorIndex> = semantic.clone();
        builder = builder.semantic(Arc::new(FixedEmbedder), vector);
    }
    if let Some(keyword) = &sources.keyword {
        let index: Arc<dyn KeywordIndex> = keyword.clone();
        builder = builder.keyword(index);
    }
    if let Some(web) = &sources.web {
        let web: Arc<dyn WebSearch> = web.clone();
        builder = builder.web(web);
    }
    builder.build().unwrap()
}
