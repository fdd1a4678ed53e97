use crate::error::{AssemblyError, Result};
use context_protocol::{
    render_entry, CancelSignal, CompressionKind, ContextItem, Degradation, GenerationProvider,
    TokenCounter,
};
use context_text::truncate_to_tokens;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Hard cap on concurrent generation calls.
pub const MAX_COMPRESSION_CONCURRENCY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStrategy {
    /// Sentence-boundary cut; no generation calls.
    Truncation,
    /// Key points as bullets via the generation collaborator. Failed items
    /// are reported as `CompressionFailed`.
    Extraction,
    /// Paraphrase via the generation collaborator. Failed items are reported
    /// as `CompressionFailed`.
    Summarization,
    /// Summarization, quietly truncating on failure or no gain.
    #[default]
    Hybrid,
}

impl CompressionStrategy {
    fn uses_generation(self) -> bool {
        !matches!(self, Self::Truncation)
    }

    /// Truncation is part of the strategy rather than a failure mode.
    fn falls_back(self) -> bool {
        matches!(self, Self::Hybrid)
    }
}

impl fmt::Display for CompressionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Truncation => "truncation",
            Self::Extraction => "extraction",
            Self::Summarization => "summarization",
            Self::Hybrid => "hybrid",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub strategy: CompressionStrategy,
    /// Wall-clock budget for all generation calls of one request.
    pub time_budget_ms: u64,
    pub max_concurrency: usize,
    /// Bodies are never squeezed below this many tokens while the budget
    /// allows it.
    pub min_item_tokens: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            strategy: CompressionStrategy::default(),
            time_budget_ms: 2_500,
            max_concurrency: MAX_COMPRESSION_CONCURRENCY,
            min_item_tokens: 32,
        }
    }
}

impl CompressionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 || self.max_concurrency > MAX_COMPRESSION_CONCURRENCY {
            return Err(AssemblyError::InvalidConfig(format!(
                "compression.max_concurrency must be within 1..={MAX_COMPRESSION_CONCURRENCY}, got {}",
                self.max_concurrency
            )));
        }
        if self.time_budget_ms == 0 {
            return Err(AssemblyError::InvalidConfig(
                "compression.time_budget_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompressionOutcome {
    pub items: Vec<ContextItem>,
    pub degradations: Vec<Degradation>,
    /// Items whose body changed.
    pub compressed: usize,
}

/// Shrinks item bodies until the sum of rendered item tokens fits the budget.
/// Headers, which hold the citation markers, are never touched.
pub struct ContextCompressor {
    config: CompressionConfig,
    generator: Option<Arc<dyn GenerationProvider>>,
    counter: Arc<dyn TokenCounter>,
}

impl ContextCompressor {
    pub fn new(
        config: CompressionConfig,
        generator: Option<Arc<dyn GenerationProvider>>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            config,
            generator,
            counter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Token count of one rendered item.
    #[must_use]
    pub fn item_tokens(&self, header: &str, body: &str) -> usize {
        self.counter.count(&render_entry(header, body))
    }

    pub async fn compress(
        &self,
        mut items: Vec<ContextItem>,
        budget_tokens: usize,
        strategy: CompressionStrategy,
        cancel: &CancelSignal,
    ) -> CompressionOutcome {
        let mut outcome = CompressionOutcome::default();
        for item in &mut items {
            item.tokens = self.item_tokens(&item.header, &item.body);
        }
        let total: usize = items.iter().map(|item| item.tokens).sum();
        if total <= budget_tokens {
            outcome.items = items;
            return outcome;
        }
        log::debug!(
            "Compressing {} items from {total} to {budget_tokens} tokens via {strategy}",
            items.len()
        );

        let allowances = self.allowances(&items, budget_tokens);
        let targets: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(idx, item)| self.counter.count(&item.body) > allowances[*idx])
            .map(|(idx, _)| idx)
            .collect();

        let generator = self.generator.as_ref().filter(|_| strategy.uses_generation());
        if let Some(generator) = generator {
            let report = self
                .generate(generator, &items, &targets, &allowances, strategy, cancel)
                .await;
            for (idx, body) in &report.bodies {
                let kind = if strategy == CompressionStrategy::Extraction {
                    CompressionKind::Extracted
                } else {
                    CompressionKind::Summarized
                };
                let item = &mut items[*idx];
                item.body = body.clone();
                item.compression = kind;
            }
            for &idx in &targets {
                if !report.bodies.contains_key(&idx) {
                    self.truncate_body(&mut items[idx], allowances[idx]);
                }
            }
            if report.timed_out > 0 {
                outcome.degradations.push(Degradation::CompressionTimeout {
                    items_truncated: report.timed_out,
                });
            }
            if let Some(reason) = report.failure {
                if strategy.falls_back() {
                    log::debug!(
                        "{} item(s) truncated instead of summarized: {reason}",
                        report.failed
                    );
                } else {
                    outcome.degradations.push(Degradation::CompressionFailed {
                        reason: format!(
                            "{strategy} failed for {} item(s), truncated instead: {reason}",
                            report.failed
                        ),
                    });
                }
            }
        } else {
            if strategy.falls_back() {
                log::debug!("No generation provider; {strategy} compression truncates");
            } else if strategy.uses_generation() {
                log::warn!("No generation provider; {strategy} compression falls back to truncation");
                outcome.degradations.push(Degradation::CompressionFailed {
                    reason: "no generation provider configured".to_string(),
                });
            }
            for &idx in &targets {
                self.truncate_body(&mut items[idx], allowances[idx]);
            }
        }

        for item in &mut items {
            item.tokens = self.item_tokens(&item.header, &item.body);
        }
        let dropped = self.enforce_budget(&mut items, budget_tokens);
        if dropped > 0 {
            outcome.degradations.push(Degradation::BudgetExceededUnrecoverable {
                dropped_items: dropped,
                budget_tokens,
            });
        }
        outcome.compressed = items
            .iter()
            .filter(|item| item.compression != CompressionKind::None)
            .count();
        outcome.items = items;
        outcome
    }

    /// Per-item body allowance, proportional to each body's share of the
    /// space left after headers.
    fn allowances(&self, items: &[ContextItem], budget_tokens: usize) -> Vec<usize> {
        let header_tokens: usize = items
            .iter()
            .map(|item| self.item_tokens(&item.header, ""))
            .sum();
        // One token per item for the header/body line break.
        let body_space = budget_tokens.saturating_sub(header_tokens + items.len());
        let body_tokens: Vec<usize> = items
            .iter()
            .map(|item| self.counter.count(&item.body))
            .collect();
        let total_body: usize = body_tokens.iter().sum::<usize>().max(1);
        let floor = self.config.min_item_tokens.min(body_space / items.len().max(1));
        body_tokens
            .iter()
            .map(|&tokens| {
                let share = (body_space as u128 * tokens as u128 / total_body as u128) as usize;
                share.max(floor).min(tokens)
            })
            .collect()
    }

    fn truncate_body(&self, item: &mut ContextItem, allowance: usize) {
        let cut = truncate_to_tokens(&item.body, allowance, self.counter.as_ref());
        if cut.truncated {
            item.body = cut.text;
            item.compression = if item.body.is_empty() {
                CompressionKind::HeaderOnly
            } else {
                CompressionKind::Truncated
            };
        }
    }

    async fn generate(
        &self,
        generator: &Arc<dyn GenerationProvider>,
        items: &[ContextItem],
        targets: &[usize],
        allowances: &[usize],
        strategy: CompressionStrategy,
        cancel: &CancelSignal,
    ) -> GenerationReport {
        let mut report = GenerationReport::default();
        if targets.is_empty() {
            return report;
        }
        let permits = Arc::new(Semaphore::new(
            self.config.max_concurrency.clamp(1, MAX_COMPRESSION_CONCURRENCY),
        ));
        let mut tasks = JoinSet::new();
        for &idx in targets {
            let allowance = allowances[idx];
            if allowance == 0 {
                continue;
            }
            let prompt = compression_prompt(&items[idx], allowance, strategy);
            let generator = Arc::clone(generator);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (idx, Err("compression permits closed".to_string()));
                };
                let result = generator
                    .complete(&prompt, allowance)
                    .await
                    .map_err(|err| err.to_string());
                (idx, result)
            });
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.time_budget_ms);
        let mut pending = tasks.len();
        while pending > 0 {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep_until(deadline) => break,
                joined = tasks.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    pending -= 1;
                    match joined {
                        Ok((idx, Ok(text))) => {
                            let text = text.trim();
                            let original = self.counter.count(&items[idx].body);
                            let produced = self.counter.count(text);
                            if text.is_empty() || produced >= original {
                                report.record_failure(format!("no gain compressing [{idx}]"));
                            } else {
                                let fitted = truncate_to_tokens(text, allowances[idx], self.counter.as_ref());
                                report.bodies.insert(idx, fitted.text);
                            }
                        }
                        Ok((idx, Err(err))) => {
                            log::warn!("Compression call for item {idx} failed: {err}");
                            report.record_failure(err);
                        }
                        Err(err) => report.record_failure(format!("compression task failed: {err}")),
                    }
                }
            }
        }
        if pending > 0 {
            tasks.abort_all();
            report.timed_out = pending;
            log::warn!("Compression budget expired with {pending} item(s) outstanding; truncating");
        }
        report
    }

    /// Truncate from the tail, then drop tail items, until the rendered
    /// items fit. Returns the number of dropped items.
    fn enforce_budget(&self, items: &mut Vec<ContextItem>, budget_tokens: usize) -> usize {
        let mut total: usize = items.iter().map(|item| item.tokens).sum();
        let mut cursor = items.len();
        while total > budget_tokens && cursor > 0 {
            let idx = cursor - 1;
            let overflow = total - budget_tokens;
            let item = &mut items[idx];
            if item.body.is_empty() {
                cursor -= 1;
                continue;
            }
            let body_tokens = self.counter.count(&item.body);
            let target = body_tokens.saturating_sub(overflow + 1);
            if target == 0 {
                item.body.clear();
                item.compression = CompressionKind::HeaderOnly;
            } else {
                self.truncate_body(item, target);
            }
            let before = item.tokens;
            item.tokens = self.item_tokens(&item.header, &item.body);
            total = total - before + item.tokens;
            if item.body.is_empty() || item.tokens >= before {
                cursor -= 1;
            }
        }

        let mut dropped = 0;
        while total > budget_tokens {
            let Some(item) = items.pop() else {
                break;
            };
            total -= item.tokens;
            dropped += 1;
        }
        if dropped > 0 {
            log::warn!("Dropped {dropped} item(s) to fit {budget_tokens} tokens");
        }
        dropped
    }
}

#[derive(Debug, Default)]
struct GenerationReport {
    bodies: BTreeMap<usize, String>,
    timed_out: usize,
    failed: usize,
    failure: Option<String>,
}

impl GenerationReport {
    /// Keeps the first reason; counts every failed item.
    fn record_failure(&mut self, reason: String) {
        self.failed += 1;
        if self.failure.is_none() {
            self.failure = Some(reason);
        }
    }
}

fn compression_prompt(item: &ContextItem, allowance: usize, strategy: CompressionStrategy) -> String {
    let result = &item.scored.result;
    let mut source = String::new();
    if !result.title.is_empty() {
        source.push_str(&format!("Title: {}\n", result.title));
    }
    if let Some(url) = &result.url {
        source.push_str(&format!("URL: {url}\n"));
    }
    let instruction = match strategy {
        CompressionStrategy::Extraction => format!(
            "Extract the key points of the passage below as short bullet points, using at most \
             {allowance} tokens. Copy names, dates, numbers and figures exactly as written."
        ),
        _ => format!(
            "Summarize the passage below in at most {allowance} tokens. Preserve every fact, \
             date and number exactly and keep the source title and URL if given."
        ),
    };
    format!("{instruction}\n\n{source}\n{}", item.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use context_protocol::{
        CollaboratorError, CollaboratorResult, ModelEncoding, RetrievalResult, ScoredResult,
        SourceType,
    };
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }

        fn encoding(&self) -> ModelEncoding {
            ModelEncoding::Cl100kBase
        }
    }

    struct ShortSummary {
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ShortSummary {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl GenerationProvider for ShortSummary {
        async fn complete(&self, _prompt: &str, _max_tokens: usize) -> CollaboratorResult<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("short summary".to_string())
        }
    }

    struct Failing;

    #[async_trait]
    impl GenerationProvider for Failing {
        async fn complete(&self, _prompt: &str, _max_tokens: usize) -> CollaboratorResult<String> {
            Err(CollaboratorError::Unavailable("model offline".into()))
        }
    }

    fn item(id: usize, words: usize) -> ContextItem {
        let body = (0..words)
            .map(|w| format!("w{w}."))
            .collect::<Vec<_>>()
            .join(" ");
        ContextItem {
            citation_id: id,
            marker: format!("[Document {id}]"),
            header: format!("[Document {id}] Title {id}"),
            body: body.clone(),
            tokens: 0,
            compression: CompressionKind::None,
            scored: ScoredResult::new(
                RetrievalResult::new(format!("d{id}"), SourceType::Document, 0.5, body),
                id,
            ),
        }
    }

    fn compressor(generator: Option<Arc<dyn GenerationProvider>>) -> ContextCompressor {
        ContextCompressor::new(CompressionConfig::default(), generator, Arc::new(WordCounter))
    }

    fn with_generator(generator: Arc<dyn GenerationProvider>) -> ContextCompressor {
        compressor(Some(generator))
    }

    fn total(items: &[ContextItem]) -> usize {
        items.iter().map(|i| i.tokens).sum()
    }

    #[tokio::test]
    async fn under_budget_is_untouched() {
        let outcome = compressor(None)
            .compress(vec![item(1, 10)], 100, CompressionStrategy::Truncation, &CancelSignal::never())
            .await;
        assert_eq!(outcome.compressed, 0);
        assert_eq!(outcome.items[0].tokens, 14);
        assert!(outcome.degradations.is_empty());
    }

    #[tokio::test]
    async fn truncation_fits_budget_and_keeps_headers() {
        let items: Vec<ContextItem> = (1..=20).map(|i| item(i, 750)).collect();
        let outcome = compressor(None)
            .compress(items, 8_000, CompressionStrategy::Truncation, &CancelSignal::never())
            .await;
        assert!(total(&outcome.items) <= 8_000);
        assert_eq!(outcome.items.len(), 20);
        for (i, item) in outcome.items.iter().enumerate() {
            assert!(item.rendered().starts_with(&format!("[Document {}]", i + 1)));
            assert_eq!(item.compression, CompressionKind::Truncated);
        }
    }

    #[tokio::test]
    async fn summarization_replaces_bodies() {
        let generator = ShortSummary::new(Duration::from_millis(1));
        let outcome = with_generator(generator)
            .compress(
                vec![item(1, 200), item(2, 200)],
                150,
                CompressionStrategy::Summarization,
                &CancelSignal::never(),
            )
            .await;
        assert!(outcome.items.iter().all(|i| i.body == "short summary"));
        assert!(outcome
            .items
            .iter()
            .all(|i| i.compression == CompressionKind::Summarized));
        assert!(outcome.degradations.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn generation_concurrency_is_capped_at_three() {
        let generator = ShortSummary::new(Duration::from_millis(100));
        let items: Vec<ContextItem> = (1..=8).map(|i| item(i, 200)).collect();
        let outcome = with_generator(generator.clone())
            .compress(items, 400, CompressionStrategy::Hybrid, &CancelSignal::never())
            .await;
        assert_eq!(generator.peak.load(Ordering::SeqCst), 3);
        assert!(total(&outcome.items) <= 400);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_time_budget_truncates_remaining_items() {
        let generator = ShortSummary::new(Duration::from_secs(2));
        let items: Vec<ContextItem> = (1..=6).map(|i| item(i, 200)).collect();
        let outcome = with_generator(generator)
            .compress(items, 400, CompressionStrategy::Hybrid, &CancelSignal::never())
            .await;
        // Three calls finish at 2s; the other three are still queued at 2.5s.
        assert_eq!(
            outcome.degradations,
            vec![Degradation::CompressionTimeout { items_truncated: 3 }]
        );
        let truncated = outcome
            .items
            .iter()
            .filter(|i| i.compression == CompressionKind::Truncated)
            .count();
        assert_eq!(truncated, 3);
        assert!(total(&outcome.items) <= 400);
    }

    #[tokio::test]
    async fn hybrid_falls_back_to_truncation_quietly() {
        let outcome = with_generator(Arc::new(Failing))
            .compress(vec![item(1, 300)], 100, CompressionStrategy::Hybrid, &CancelSignal::never())
            .await;
        assert_eq!(outcome.items[0].compression, CompressionKind::Truncated);
        assert!(outcome.degradations.is_empty());
        assert!(total(&outcome.items) <= 100);

        let outcome = compressor(None)
            .compress(vec![item(1, 300)], 100, CompressionStrategy::Hybrid, &CancelSignal::never())
            .await;
        assert!(outcome.degradations.is_empty());
    }

    #[tokio::test]
    async fn failed_summarization_is_reported() {
        let items = vec![item(1, 300), item(2, 300)];
        let outcome = with_generator(Arc::new(Failing))
            .compress(items, 200, CompressionStrategy::Summarization, &CancelSignal::never())
            .await;
        assert!(total(&outcome.items) <= 200);
        assert!(outcome
            .items
            .iter()
            .all(|i| i.compression == CompressionKind::Truncated));
        match outcome.degradations.as_slice() {
            [Degradation::CompressionFailed { reason }] => {
                assert!(reason.starts_with("summarization failed for 2 item(s)"), "{reason}");
                assert!(reason.contains("model offline"), "{reason}");
            }
            other => panic!("expected one CompressionFailed, got {other:?}"),
        }

        let outcome = compressor(None)
            .compress(vec![item(1, 300)], 100, CompressionStrategy::Extraction, &CancelSignal::never())
            .await;
        assert!(matches!(
            outcome.degradations.as_slice(),
            [Degradation::CompressionFailed { .. }]
        ));
    }

    #[tokio::test]
    async fn impossible_budget_drops_tail_items() {
        let items: Vec<ContextItem> = (1..=5).map(|i| item(i, 50)).collect();
        // Each header alone is 4 words.
        let outcome = compressor(None)
            .compress(items, 10, CompressionStrategy::Truncation, &CancelSignal::never())
            .await;
        assert_eq!(outcome.items.len(), 2);
        assert!(outcome
            .items
            .iter()
            .all(|i| i.compression == CompressionKind::HeaderOnly));
        assert_eq!(
            outcome.degradations,
            vec![Degradation::BudgetExceededUnrecoverable {
                dropped_items: 3,
                budget_tokens: 10
            }]
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]
        #[test]
        fn every_strategy_respects_the_budget(
            sizes in prop::collection::vec(1usize..300, 1..12),
            budget in 0usize..2_000,
            strategy_idx in 0usize..4,
        ) {
            let strategy = [
                CompressionStrategy::Truncation,
                CompressionStrategy::Extraction,
                CompressionStrategy::Summarization,
                CompressionStrategy::Hybrid,
            ][strategy_idx];
            let items: Vec<ContextItem> = sizes.iter().enumerate().map(|(i, w)| item(i + 1, *w)).collect();
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let outcome = runtime.block_on(
                with_generator(ShortSummary::new(Duration::from_millis(0)))
                    .compress(items, budget, strategy, &CancelSignal::never()),
            );
            prop_assert!(total(&outcome.items) <= budget);
            for item in &outcome.items {
                prop_assert!(item.rendered().starts_with(&item.marker));
            }
        }
    }
}
