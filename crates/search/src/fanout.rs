use context_protocol::{
    CancelSignal, DegradedReason, EmbeddingProvider, KeywordIndex, QueryProfile, QueryType,
    RetrievalResult, SourceType, VectorIndex, WebSearch, WebSearchOptions,
};
use context_text::word_tokens;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one retrieval source: results, or why it contributed nothing.
pub type SourceOutcome = Result<Vec<RetrievalResult>, DegradedReason>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Per-source wall-clock limit.
    pub timeout_ms: u64,
    pub top_k: usize,
    pub embedding_model: String,
    pub web_freshness_days: Option<u32>,
    pub web_safe_search: bool,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            top_k: 20,
            embedding_model: "text-embedding-3-small".to_string(),
            web_freshness_days: None,
            web_safe_search: true,
        }
    }
}

impl FanoutConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceToggles {
    pub semantic: bool,
    pub keyword: bool,
    pub web: bool,
}

impl Default for SourceToggles {
    fn default() -> Self {
        Self {
            semantic: true,
            keyword: true,
            web: true,
        }
    }
}

impl SourceToggles {
    #[must_use]
    pub fn enabled(&self, source: SourceType) -> bool {
        match source {
            SourceType::Document => self.semantic,
            SourceType::Keyword => self.keyword,
            SourceType::Web => self.web,
        }
    }

    #[must_use]
    pub fn any(&self) -> bool {
        self.semantic || self.keyword || self.web
    }
}

/// Collaborators backing the three retrieval sources. Absent collaborators
/// simply do not participate.
#[derive(Clone, Default)]
pub struct RetrievalSources {
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub vector: Option<Arc<dyn VectorIndex>>,
    pub keyword: Option<Arc<dyn KeywordIndex>>,
    pub web: Option<Arc<dyn WebSearch>>,
}

impl RetrievalSources {
    #[must_use]
    pub fn configured(&self, source: SourceType) -> bool {
        match source {
            SourceType::Document => self.embedder.is_some() && self.vector.is_some(),
            SourceType::Keyword => self.keyword.is_some(),
            SourceType::Web => self.web.is_some(),
        }
    }
}

/// Per-source outcomes of one fan-out, keyed in source priority order.
#[derive(Debug, Clone, Default)]
pub struct FanoutOutcome {
    pub outcomes: BTreeMap<SourceType, SourceOutcome>,
}

impl FanoutOutcome {
    /// All results, concatenated in source priority order.
    #[must_use]
    pub fn results(&self) -> Vec<RetrievalResult> {
        self.outcomes
            .values()
            .filter_map(|outcome| outcome.as_ref().ok())
            .flat_map(|results| results.iter().cloned())
            .collect()
    }

    #[must_use]
    pub fn degraded(&self) -> Vec<(SourceType, DegradedReason)> {
        self.outcomes
            .iter()
            .filter_map(|(source, outcome)| {
                outcome
                    .as_ref()
                    .err()
                    .map(|reason| (*source, reason.clone()))
            })
            .collect()
    }

    #[must_use]
    pub fn counts(&self) -> BTreeMap<SourceType, usize> {
        self.outcomes
            .iter()
            .map(|(source, outcome)| (*source, outcome.as_ref().map_or(0, Vec::len)))
            .collect()
    }

    #[cfg(test)]
    fn cancelled(&self) -> bool {
        self.outcomes
            .values()
            .any(|outcome| matches!(outcome, Err(DegradedReason::Cancelled)))
    }
}

/// Issues the semantic, keyword and web calls concurrently. Every source
/// completes, times out or is cancelled on its own; none can fail the request.
pub struct RetrievalFanout {
    sources: RetrievalSources,
    config: FanoutConfig,
}

impl RetrievalFanout {
    pub fn new(sources: RetrievalSources, config: FanoutConfig) -> Self {
        Self { sources, config }
    }

    #[must_use]
    pub fn config(&self) -> &FanoutConfig {
        &self.config
    }

    pub async fn retrieve(
        &self,
        profile: &QueryProfile,
        toggles: SourceToggles,
        cancel: &CancelSignal,
    ) -> FanoutOutcome {
        let scoped = scope_query(profile);
        let keyword_query = keyword_query(&scoped, &profile.expanded_terms);
        log::debug!("Fan-out query '{scoped}', keyword query '{keyword_query}'");

        let participates = |source: SourceType| {
            let participates = toggles.enabled(source) && self.sources.configured(source);
            if toggles.enabled(source) && !participates {
                log::debug!("Source {source} enabled but not configured; skipping");
            }
            participates
        };

        let semantic = async {
            if !participates(SourceType::Document) {
                return None;
            }
            Some(self.guarded(cancel, self.semantic(&scoped)).await)
        };
        let keyword = async {
            if !participates(SourceType::Keyword) {
                return None;
            }
            Some(self.guarded(cancel, self.keyword(&keyword_query)).await)
        };
        let web = async {
            if !participates(SourceType::Web) {
                return None;
            }
            Some(self.guarded(cancel, self.web(&scoped)).await)
        };
        let (semantic, keyword, web) = tokio::join!(semantic, keyword, web);

        let mut outcome = FanoutOutcome::default();
        for (source, result) in [
            (SourceType::Document, semantic),
            (SourceType::Keyword, keyword),
            (SourceType::Web, web),
        ] {
            let Some(result) = result else {
                continue;
            };
            let result = result.map(|results| normalize_results(source, results));
            match &result {
                Ok(results) => log::debug!("Source {source}: {} results", results.len()),
                Err(reason) => log::warn!("Source {source} degraded: {reason}"),
            }
            outcome.outcomes.insert(source, result);
        }
        outcome
    }

    async fn guarded<F>(&self, cancel: &CancelSignal, call: F) -> SourceOutcome
    where
        F: Future<Output = SourceOutcome>,
    {
        let timeout = self.config.timeout();
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(DegradedReason::Cancelled),
            result = tokio::time::timeout(timeout, call) => {
                result.unwrap_or_else(|_| Err(DegradedReason::timed_out(timeout)))
            }
        }
    }

    async fn semantic(&self, query: &str) -> SourceOutcome {
        let (Some(embedder), Some(vector)) = (&self.sources.embedder, &self.sources.vector) else {
            return Ok(Vec::new());
        };
        let embedding = embedder
            .embed(query, &self.config.embedding_model)
            .await
            .map_err(|err| DegradedReason::EmbeddingFailed(err.to_string()))?;
        Ok(vector.query(&embedding, self.config.top_k, None).await?)
    }

    async fn keyword(&self, query: &str) -> SourceOutcome {
        let Some(index) = &self.sources.keyword else {
            return Ok(Vec::new());
        };
        Ok(index.search(query, self.config.top_k).await?)
    }

    async fn web(&self, query: &str) -> SourceOutcome {
        let Some(web) = &self.sources.web else {
            return Ok(Vec::new());
        };
        let options = WebSearchOptions {
            max_results: self.config.top_k,
            freshness_days: self.config.web_freshness_days,
            safe_search: self.config.web_safe_search,
        };
        Ok(web.search(query, &options).await?)
    }
}

/// Tags results with their source, drops empty content and maps scores into
/// `[0, 1]`. Keyword scores are BM25-style and unbounded, so they are divided
/// by the list maximum; other sources are clamped.
fn normalize_results(source: SourceType, mut results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    results.retain(|result| !result.content.trim().is_empty());
    for result in &mut results {
        result.source_type = source;
        if !result.raw_score.is_finite() {
            result.raw_score = 0.0;
        }
    }
    if source == SourceType::Keyword {
        let max = results
            .iter()
            .map(|result| result.raw_score)
            .fold(0.0_f32, f32::max);
        if max > 0.0 {
            for result in &mut results {
                result.raw_score = (result.raw_score / max).clamp(0.0, 1.0);
            }
        }
    } else {
        for result in &mut results {
            result.raw_score = result.raw_score.clamp(0.0, 1.0);
        }
    }
    results
}

/// Injects the request topic into the query, phrased per query type. Topic
/// words already in the query are never repeated.
#[must_use]
pub fn scope_query(profile: &QueryProfile) -> String {
    let query = profile.original_query.trim();
    let Some(topic) = profile.topic.as_deref() else {
        return query.to_string();
    };
    let present = word_tokens(query);
    let missing: Vec<String> = word_tokens(topic)
        .into_iter()
        .filter(|word| !present.contains(word))
        .collect();
    if missing.is_empty() {
        return query.to_string();
    }
    let topic = missing.join(" ");

    match profile.query_type {
        QueryType::Factual | QueryType::Procedural => {
            let body = query.trim_end_matches(['?', '.', '!']);
            let punctuation = &query[body.len()..];
            format!("{body} in {topic}{punctuation}")
        }
        QueryType::Conceptual | QueryType::Analytical | QueryType::Comparative => {
            format!("{topic}: {query}")
        }
        QueryType::Exploratory | QueryType::Unknown => format!("{query} {topic}"),
    }
}

fn keyword_query(scoped: &str, expanded: &[String]) -> String {
    let present = word_tokens(scoped);
    let mut query = scoped.to_string();
    for term in expanded {
        if word_tokens(term).iter().all(|word| present.contains(word)) {
            continue;
        }
        query.push(' ');
        query.push_str(term);
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueryAnalyzer;
    use async_trait::async_trait;
    use context_protocol::{CollaboratorError, CollaboratorResult, SearchFilter};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str, _model: &str) -> CollaboratorResult<Vec<f32>> {
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    struct FixedVector(Vec<RetrievalResult>);

    #[async_trait]
    impl VectorIndex for FixedVector {
        async fn query(
            &self,
            _vector: &[f32],
            top_k: usize,
            _filter: Option<&SearchFilter>,
        ) -> CollaboratorResult<Vec<RetrievalResult>> {
            Ok(self.0.iter().take(top_k).cloned().collect())
        }
    }

    struct RecordingKeyword {
        results: Vec<RetrievalResult>,
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl KeywordIndex for RecordingKeyword {
        async fn search(&self, query: &str, _top_k: usize) -> CollaboratorResult<Vec<RetrievalResult>> {
            self.queries
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(query.to_string());
            Ok(self.results.clone())
        }
    }

    struct BrokenWeb(CollaboratorError);

    #[async_trait]
    impl WebSearch for BrokenWeb {
        async fn search(
            &self,
            _query: &str,
            _options: &WebSearchOptions,
        ) -> CollaboratorResult<Vec<RetrievalResult>> {
            Err(self.0.clone())
        }
    }

    struct HangingWeb;

    #[async_trait]
    impl WebSearch for HangingWeb {
        async fn search(
            &self,
            _query: &str,
            _options: &WebSearchOptions,
        ) -> CollaboratorResult<Vec<RetrievalResult>> {
            std::future::pending().await
        }
    }

    fn doc(id: &str, score: f32) -> RetrievalResult {
        RetrievalResult::new(id, SourceType::Web, score, format!("content of {id}"))
    }

    fn keyword_index(results: Vec<RetrievalResult>) -> Arc<RecordingKeyword> {
        Arc::new(RecordingKeyword {
            results,
            queries: Mutex::new(Vec::new()),
        })
    }

    fn sources(web: Arc<dyn WebSearch>, keyword: Arc<dyn KeywordIndex>) -> RetrievalSources {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(FixedEmbedder);
        let vector: Arc<dyn VectorIndex> =
            Arc::new(FixedVector(vec![doc("d1", 0.9), doc("d2", 1.7)]));
        RetrievalSources {
            embedder: Some(embedder),
            vector: Some(vector),
            keyword: Some(keyword),
            web: Some(web),
        }
    }

    fn profile(query: &str, topic: Option<&str>) -> QueryProfile {
        QueryAnalyzer::new().unwrap().analyze(query, topic)
    }

    #[tokio::test]
    async fn failing_source_degrades_without_blocking_others() {
        let keyword = keyword_index(vec![doc("k1", 12.0), doc("k2", 6.0)]);
        let fanout = RetrievalFanout::new(
            sources(Arc::new(BrokenWeb(CollaboratorError::CircuitOpen)), keyword),
            FanoutConfig::default(),
        );
        let outcome = fanout
            .retrieve(&profile("what is dns", None), SourceToggles::default(), &CancelSignal::never())
            .await;

        assert_eq!(
            outcome.degraded(),
            vec![(SourceType::Web, DegradedReason::CircuitOpen)]
        );
        let results = outcome.results();
        assert_eq!(results.len(), 4);
        assert!(results[..2]
            .iter()
            .all(|r| r.source_type == SourceType::Document));
        assert_eq!(results[1].raw_score, 1.0);
        assert_eq!(results[2].raw_score, 1.0);
        assert_eq!(results[3].raw_score, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_times_out() {
        let fanout = RetrievalFanout::new(
            sources(Arc::new(HangingWeb), keyword_index(vec![doc("k1", 3.0)])),
            FanoutConfig {
                timeout_ms: 50,
                ..FanoutConfig::default()
            },
        );
        let outcome = fanout
            .retrieve(&profile("what is dns", None), SourceToggles::default(), &CancelSignal::never())
            .await;
        assert_eq!(
            outcome.degraded(),
            vec![(SourceType::Web, DegradedReason::TimedOut { after_ms: 50 })]
        );
        assert_eq!(outcome.counts()[&SourceType::Keyword], 1);
    }

    #[tokio::test]
    async fn cancellation_marks_pending_sources() {
        let fanout = RetrievalFanout::new(
            sources(Arc::new(HangingWeb), keyword_index(Vec::new())),
            FanoutConfig::default(),
        );
        let (handle, signal) = CancelSignal::pair();
        handle.cancel();
        let outcome = fanout
            .retrieve(&profile("what is dns", None), SourceToggles::default(), &signal)
            .await;
        assert!(outcome.cancelled());
    }

    #[tokio::test]
    async fn disabled_sources_are_not_called() {
        let keyword = keyword_index(vec![doc("k1", 1.0)]);
        let fanout = RetrievalFanout::new(
            sources(Arc::new(HangingWeb), keyword.clone()),
            FanoutConfig::default(),
        );
        let toggles = SourceToggles {
            semantic: false,
            keyword: true,
            web: false,
        };
        let outcome = fanout
            .retrieve(&profile("what is dns", None), toggles, &CancelSignal::never())
            .await;
        assert_eq!(outcome.outcomes.len(), 1);
        assert_eq!(keyword.queries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn keyword_query_carries_expansion_terms() {
        let keyword = keyword_index(Vec::new());
        let index: Arc<dyn KeywordIndex> = keyword.clone();
        let fanout = RetrievalFanout::new(
            RetrievalSources {
                keyword: Some(index),
                ..RetrievalSources::default()
            },
            FanoutConfig::default(),
        );
        let mut profile = profile("cheap car", None);
        profile.expanded_terms = vec!["automobile".into(), "car".into()];
        fanout
            .retrieve(&profile, SourceToggles::default(), &CancelSignal::never())
            .await;
        assert_eq!(
            keyword.queries.lock().unwrap().as_slice(),
            ["cheap car automobile".to_string()]
        );
    }

    #[test]
    fn topic_scoping_follows_query_type() {
        assert_eq!(
            scope_query(&profile("What is photosynthesis?", Some("biology"))),
            "What is photosynthesis in biology?"
        );
        assert_eq!(
            scope_query(&profile("Explain entropy", Some("thermodynamics"))),
            "thermodynamics: Explain entropy"
        );
        assert_eq!(
            scope_query(&profile("tell me about jaguars", Some("cars"))),
            "tell me about jaguars cars"
        );
    }

    #[test]
    fn topic_scoping_never_repeats_query_words() {
        assert_eq!(
            scope_query(&profile("What is Rust ownership?", Some("rust"))),
            "What is Rust ownership?"
        );
        assert_eq!(
            scope_query(&profile("tell me about rust", Some("Rust programming"))),
            "tell me about rust programming"
        );
    }
}
