use crate::config::EngineConfig;
use crate::error::Result;
use crate::options::RetrieveOptions;
use chrono::Utc;
use context_assembly::{
    CitationLinker, CompressionStrategy, ContextAssembler, ContextCompressor, ContextSelector,
};
use context_protocol::{
    AssembledContext, CancelSignal, Degradation, DegradedReason, EmbeddingProvider,
    GenerationProvider, KeywordIndex, PipelineReport, QueryProfile, StageTimings, TokenCounter,
    VectorIndex, WebSearch,
};
use context_search::{
    apply_threshold, fuse, AuthorityTable, Deduplicator, DiversityFilter, ExpansionCache,
    QueryAnalyzer, QueryExpander, QualityScorer, Reranker, ResultScorer, RetrievalFanout,
    RetrievalSources, ThresholdOptimizer,
};
use context_text::CachedTokenCounter;
use std::sync::Arc;
use tokio::time::Instant;

/// Wires collaborators and config into a [`RetrievalEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    sources: RetrievalSources,
    generator: Option<Arc<dyn GenerationProvider>>,
    counter: Option<Arc<dyn TokenCounter>>,
    expansion_cache: Option<Arc<ExpansionCache>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sources: RetrievalSources::default(),
            generator: None,
            counter: None,
            expansion_cache: None,
        }
    }

    #[must_use]
    pub fn sources(mut self, sources: RetrievalSources) -> Self {
        self.sources = sources;
        self
    }

    /// Semantic search needs both the embedder and the vector index.
    #[must_use]
    pub fn semantic(
        mut self,
        embedder: Arc<dyn EmbeddingProvider>,
        vector: Arc<dyn VectorIndex>,
    ) -> Self {
        self.sources.embedder = Some(embedder);
        self.sources.vector = Some(vector);
        self
    }

    #[must_use]
    pub fn keyword(mut self, index: Arc<dyn KeywordIndex>) -> Self {
        self.sources.keyword = Some(index);
        self
    }

    #[must_use]
    pub fn web(mut self, web: Arc<dyn WebSearch>) -> Self {
        self.sources.web = Some(web);
        self
    }

    /// Used for LLM expansion and for extraction/summarization compression.
    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn GenerationProvider>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Defaults to a cached tiktoken counter for `assembly.encoding`.
    #[must_use]
    pub fn token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Share one expansion cache between engines.
    #[must_use]
    pub fn expansion_cache(mut self, cache: Arc<ExpansionCache>) -> Self {
        self.expansion_cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<RetrievalEngine> {
        let config = self.config;
        config.validate()?;
        let counter: Arc<dyn TokenCounter> = match self.counter {
            Some(counter) => counter,
            None => Arc::new(CachedTokenCounter::tiktoken(config.assembly.encoding)?),
        };
        let cache = self
            .expansion_cache
            .unwrap_or_else(|| Arc::new(ExpansionCache::from_config(&config.expansion)));

        Ok(RetrievalEngine {
            expander: QueryExpander::new(config.expansion.clone(), self.generator.clone(), cache),
            fanout: RetrievalFanout::new(self.sources, config.fanout.clone()),
            dedup: Deduplicator::new(config.dedup.clone()),
            scorer: ResultScorer::new(
                QualityScorer::new(config.quality.clone()),
                AuthorityTable::from_config(&config.authority),
                config.freshness.clone(),
            ),
            threshold: ThresholdOptimizer::new(config.threshold.clone()),
            reranker: Reranker::new(config.rerank.clone()),
            diversity: DiversityFilter::new(config.diversity.clone()),
            selector: ContextSelector::new(config.selector.clone()),
            compressor: ContextCompressor::new(
                config.compression.clone(),
                self.generator,
                Arc::clone(&counter),
            ),
            assembler: ContextAssembler::new(config.assembly.clone()),
            linker: CitationLinker::new()?,
            analyzer: QueryAnalyzer::new()?,
            counter,
            config,
        })
    }
}

/// Query in, cited context out. Holds no per-request state; one engine
/// serves concurrent requests.
pub struct RetrievalEngine {
    config: EngineConfig,
    analyzer: QueryAnalyzer,
    expander: QueryExpander,
    fanout: RetrievalFanout,
    dedup: Deduplicator,
    scorer: ResultScorer,
    threshold: ThresholdOptimizer,
    reranker: Reranker,
    diversity: DiversityFilter,
    selector: ContextSelector,
    compressor: ContextCompressor,
    assembler: ContextAssembler,
    linker: CitationLinker,
    counter: Arc<dyn TokenCounter>,
}

impl RetrievalEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn expansion_cache(&self) -> &Arc<ExpansionCache> {
        self.expander.cache()
    }

    #[must_use]
    pub fn token_counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }

    /// Analyze and expand `query` without retrieving anything.
    pub async fn profile(&self, query: &str, options: &RetrieveOptions) -> Result<QueryProfile> {
        options.validate(query)?;
        let (profile, _) = self.analyze(query, options, &CancelSignal::never()).await;
        Ok(profile)
    }

    /// Only invalid options fail; every collaborator problem is reported as
    /// a degradation on the returned context.
    pub async fn retrieve_context(
        &self,
        query: &str,
        options: &RetrieveOptions,
    ) -> Result<AssembledContext> {
        self.retrieve_context_with_cancel(query, options, CancelSignal::never())
            .await
    }

    /// As [`Self::retrieve_context`]; when `cancel` fires (or the options
    /// deadline passes) in-flight calls are dropped and whatever arrived is
    /// assembled, flagged [`Degradation::Cancelled`].
    pub async fn retrieve_context_with_cancel(
        &self,
        query: &str,
        options: &RetrieveOptions,
        cancel: CancelSignal,
    ) -> Result<AssembledContext> {
        options.validate(query)?;
        let Some(deadline) = options.deadline() else {
            return Ok(self.run(query, options, &cancel).await);
        };

        let (trigger, bounded) = CancelSignal::pair();
        let watchdog = async {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(deadline) => {
                    log::warn!("Request deadline of {deadline:?} reached");
                }
            }
            trigger.cancel();
            std::future::pending::<AssembledContext>().await
        };
        let context = tokio::select! {
            context = self.run(query, options, &bounded) => context,
            never = watchdog => never,
        };
        Ok(context)
    }

    async fn analyze(
        &self,
        query: &str,
        options: &RetrieveOptions,
        cancel: &CancelSignal,
    ) -> (QueryProfile, Option<Degradation>) {
        let mut profile = self.analyzer.analyze(query, options.topic.as_deref());
        let strategy = options.expansion.unwrap_or(self.config.expansion.strategy);
        let expansion = tokio::select! {
            biased;
            () = cancel.cancelled() => return (profile, None),
            expansion = self.expander.expand(&profile.original_query, strategy) => expansion,
        };
        match expansion {
            Ok(expansion) => {
                profile.expanded_terms = expansion.terms;
                (profile, None)
            }
            Err(err) => {
                log::warn!("Query expansion failed, using the original query: {err}");
                (
                    profile,
                    Some(Degradation::ExpansionFailed {
                        reason: err.to_string(),
                    }),
                )
            }
        }
    }

    async fn run(&self, query: &str, options: &RetrieveOptions, cancel: &CancelSignal) -> AssembledContext {
        let started = Instant::now();
        let counter = self.counter.as_ref();
        let mut timings = StageTimings::default();
        let mut report = PipelineReport::default();
        let mut degradations = Vec::new();

        let stage = Instant::now();
        let (profile, expansion_failure) = self.analyze(query, options, cancel).await;
        degradations.extend(expansion_failure);
        timings.analyze_ms = elapsed_ms(stage);

        let stage = Instant::now();
        let fanout = self.fanout.retrieve(&profile, options.sources, cancel).await;
        report.retrieved = fanout.counts();
        for (source, reason) in fanout.degraded() {
            if reason != DegradedReason::Cancelled {
                degradations.push(Degradation::SourceUnavailable { source, reason });
            }
        }
        timings.retrieve_ms = elapsed_ms(stage);

        let stage = Instant::now();
        let fused = fuse(fanout.results(), &self.dedup);
        report.dedup = fused.stats;
        let mut results = fused.results;
        timings.fuse_ms = elapsed_ms(stage);

        if results.is_empty() {
            degradations.push(Degradation::NoResults);
            if cancel.is_cancelled() {
                degradations.push(Degradation::Cancelled);
            }
            log::info!(
                "No results for '{}' ({} degradation(s))",
                profile.original_query,
                degradations.len()
            );
            report.profile = Some(profile);
            report.timings = timings;
            return AssembledContext::empty(degradations, report);
        }

        let stage = Instant::now();
        let now = options.now.unwrap_or_else(Utc::now);
        self.scorer.annotate(&mut results, now);
        self.reranker.score(&profile, &mut results);
        let scores: Vec<f32> = results.iter().map(|scored| scored.combined_score).collect();
        let decision = self
            .threshold
            .decide(&scores, profile.query_type, &options.threshold_overrides());
        let mut results = apply_threshold(results, decision.threshold);
        report.after_threshold = results.len();
        report.threshold = Some(decision);
        self.reranker.rank(&mut results);

        let plan = self.selector.plan(&profile, &options.budget);
        let pool = plan.total.max(self.selector.config().max_items);
        let diverse = self.diversity.select(results, pool, options.lambda);
        report.after_diversity = diverse.len();
        let selection = self.selector.select(&diverse, plan, counter);
        report.selected = selection.items.len();
        log::debug!(
            "Selected {} of {} ({})",
            selection.items.len(),
            diverse.len(),
            selection.plan.reasoning
        );
        timings.rank_ms = elapsed_ms(stage);

        let stage = Instant::now();
        let ordering = options
            .ordering
            .unwrap_or_else(|| self.assembler.ordering_for(profile.is_time_sensitive));
        let items = self.assembler.prepare(selection.items, ordering, counter);
        let strategy = if cancel.is_cancelled() {
            CompressionStrategy::Truncation
        } else {
            options.compression.unwrap_or(self.config.compression.strategy)
        };
        let compressed = self
            .compressor
            .compress(items, options.budget.available(), strategy, cancel)
            .await;
        degradations.extend(compressed.degradations);
        timings.compress_ms = elapsed_ms(stage);

        let stage = Instant::now();
        if cancel.is_cancelled() {
            degradations.push(Degradation::Cancelled);
        }
        report.profile = Some(profile);
        let mut context = self.assembler.finish(
            compressed.items,
            degradations,
            report,
            counter,
            &self.linker,
        );
        context.report.timings = StageTimings {
            assemble_ms: elapsed_ms(stage),
            ..timings
        };

        log::info!(
            "Assembled {} item(s), {} tokens of {} for '{query}' in {}ms{}",
            context.items.len(),
            context.items_tokens(),
            options.budget.available(),
            elapsed_ms(started),
            if context.degraded {
                format!(" ({} degradation(s))", context.degradations.len())
            } else {
                String::new()
            }
        );
        context
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

