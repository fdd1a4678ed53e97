use crate::citation::CitationLinker;
use context_protocol::{
    AssembledContext, Citation, CompressionKind, ContextItem, Degradation, ModelEncoding, PipelineReport,
    RetrievalResult, ScoredResult, SourceType, TokenCounter,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextOrdering {
    /// Combined score, descending.
    #[default]
    Relevance,
    /// Newest first; undated items after dated ones.
    Chronological,
    /// Blend of combined score and freshness.
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub ordering: ContextOrdering,
    /// Ordering used instead of `ordering` for time-sensitive queries.
    pub time_sensitive_ordering: ContextOrdering,
    /// Weight of the combined score in hybrid ordering; freshness gets the rest.
    pub hybrid_weight: f32,
    pub include_scores: bool,
    pub encoding: ModelEncoding,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            ordering: ContextOrdering::Relevance,
            time_sensitive_ordering: ContextOrdering::Hybrid,
            hybrid_weight: 0.7,
            include_scores: true,
            encoding: ModelEncoding::default(),
        }
    }
}

/// Orders selected results, formats their entries and builds the citation map.
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    config: AssemblyConfig,
}

impl ContextAssembler {
    pub fn new(config: AssemblyConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    #[must_use]
    pub fn ordering_for(&self, time_sensitive: bool) -> ContextOrdering {
        if time_sensitive {
            self.config.time_sensitive_ordering
        } else {
            self.config.ordering
        }
    }

    /// Order `selected` and turn each result into a numbered context item.
    /// Citation ids run 1..=N in final order across document and web items.
    pub fn prepare(
        &self,
        mut selected: Vec<ScoredResult>,
        ordering: ContextOrdering,
        counter: &dyn TokenCounter,
    ) -> Vec<ContextItem> {
        self.order(&mut selected, ordering);
        selected
            .into_iter()
            .enumerate()
            .map(|(idx, scored)| {
                let citation_id = idx + 1;
                let marker = marker_for(scored.source_type(), citation_id);
                let header = self.header(&marker, &scored);
                let body = scored.result.content.trim().to_string();
                let mut item = ContextItem {
                    citation_id,
                    marker,
                    header,
                    body,
                    tokens: 0,
                    compression: CompressionKind::None,
                    scored,
                };
                item.tokens = counter.count(&item.rendered());
                item
            })
            .collect()
    }

    fn order(&self, selected: &mut [ScoredResult], ordering: ContextOrdering) {
        match ordering {
            ContextOrdering::Relevance => selected.sort_by(|a, b| {
                b.combined_score
                    .total_cmp(&a.combined_score)
                    .then(a.fusion_rank.cmp(&b.fusion_rank))
            }),
            ContextOrdering::Chronological => {
                selected.sort_by(|a, b| match (a.result.published_at, b.result.published_at) {
                    (Some(x), Some(y)) => y.cmp(&x),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => b.combined_score.total_cmp(&a.combined_score),
                });
            }
            ContextOrdering::Hybrid => {
                let w = self.config.hybrid_weight.clamp(0.0, 1.0);
                let key = |s: &ScoredResult| w * s.combined_score + (1.0 - w) * s.freshness_score;
                selected.sort_by(|a, b| {
                    key(b)
                        .total_cmp(&key(a))
                        .then(a.fusion_rank.cmp(&b.fusion_rank))
                });
            }
        }
    }

    fn header(&self, marker: &str, scored: &ScoredResult) -> String {
        let result = &scored.result;
        let title = display_title(result);
        let mut lines = vec![format!("{marker} {title}")];
        lines.extend(link_line(scored));

        let mut meta = vec![format!("type: {}", result.source_type)];
        if self.config.include_scores {
            meta.push(format!("score: {:.3}", scored.combined_score));
        }
        if let Some(author) = result.author.as_deref().filter(|a| !a.trim().is_empty()) {
            meta.push(format!("author: {}", author.trim()));
        }
        if let Some(published) = result.published_at {
            meta.push(format!("published: {}", published.format("%Y-%m-%d")));
        }
        lines.push(meta.join(" | "));
        lines.join("\n")
    }

    /// Join the (possibly compressed) items into the final context and link
    /// the markers that appear in it.
    pub fn finish(
        &self,
        items: Vec<ContextItem>,
        degradations: Vec<Degradation>,
        mut report: PipelineReport,
        counter: &dyn TokenCounter,
        linker: &CitationLinker,
    ) -> AssembledContext {
        let text = items
            .iter()
            .map(ContextItem::rendered)
            .collect::<Vec<_>>()
            .join("\n\n");
        let citations: BTreeMap<usize, Citation> = items
            .iter()
            .map(|item| (item.citation_id, citation_for(item)))
            .collect();
        // Source bodies may carry their own bracketed footnotes; only the
        // markers and links written here are checked.
        let emitted = items
            .iter()
            .map(|item| {
                let mut markers = item.marker.clone();
                if let Some(link) = link_line(&item.scored) {
                    markers.push('\n');
                    markers.push_str(&link);
                }
                markers
            })
            .collect::<Vec<_>>()
            .join("\n");
        let links = linker.link(&emitted, &citations);
        if !links.is_clean() {
            log::warn!("Dangling citation markers: {:?}", links.dangling);
        }
        report.compressed = items
            .iter()
            .filter(|item| item.compression != CompressionKind::None)
            .count();

        AssembledContext {
            total_tokens: counter.count(&text),
            text,
            items,
            citations,
            dangling_citations: links.dangling,
            degraded: !degradations.is_empty(),
            degradations,
            report,
        }
    }
}

#[must_use]
pub fn marker_for(source_type: SourceType, citation_id: usize) -> String {
    if source_type == SourceType::Web {
        format!("[Web {citation_id}]")
    } else {
        format!("[Document {citation_id}]")
    }
}

fn display_title(result: &RetrievalResult) -> &str {
    if result.title.trim().is_empty() {
        result.source_id.as_str()
    } else {
        result.title.trim()
    }
}

fn link_line(scored: &ScoredResult) -> Option<String> {
    let result = &scored.result;
    result
        .url
        .as_deref()
        .map(|url| format!("[{}]({url})", display_title(result)))
}

fn citation_for(item: &ContextItem) -> Citation {
    let result = &item.scored.result;
    Citation {
        citation_id: item.citation_id,
        marker: item.marker.clone(),
        source_id: result.source_id.clone(),
        source_type: result.source_type,
        title: result.title.clone(),
        url: result.url.clone(),
        document_id: result.document_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use context_protocol::RetrievalResult;
    use pretty_assertions::assert_eq;

    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }

        fn encoding(&self) -> ModelEncoding {
            ModelEncoding::Cl100kBase
        }
    }

    fn scored(id: &str, source: SourceType, combined: f32, rank: usize) -> ScoredResult {
        let mut s = ScoredResult::new(
            RetrievalResult::new(id, source, combined, format!("Body of {id}."))
                .with_title(format!("Title {id}")),
            rank,
        );
        s.combined_score = combined;
        s
    }

    fn ids(items: &[ContextItem]) -> Vec<&str> {
        items
            .iter()
            .map(|i| i.scored.result.source_id.as_str())
            .collect()
    }

    #[test]
    fn relevance_order_numbers_citations_globally() {
        let assembler = ContextAssembler::default();
        let web = {
            let mut s = scored("w", SourceType::Web, 0.9, 2);
            s.result.url = Some("https://example.com/w".into());
            s
        };
        let items = assembler.prepare(
            vec![
                scored("a", SourceType::Document, 0.5, 0),
                web,
                scored("k", SourceType::Keyword, 0.5, 1),
            ],
            ContextOrdering::Relevance,
            &WordCounter,
        );
        assert_eq!(ids(&items), vec!["w", "a", "k"]);
        let markers: Vec<&str> = items.iter().map(|i| i.marker.as_str()).collect();
        assert_eq!(markers, vec!["[Web 1]", "[Document 2]", "[Document 3]"]);
        assert_eq!(
            items[0].header,
            "[Web 1] Title w\n[Title w](https://example.com/w)\ntype: web | score: 0.900"
        );
    }

    #[test]
    fn chronological_puts_undated_last() {
        let assembler = ContextAssembler::default();
        let mut old = scored("old", SourceType::Web, 0.9, 0);
        old.result.published_at = Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        let mut new = scored("new", SourceType::Web, 0.1, 1);
        new.result.published_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let undated = scored("undated", SourceType::Document, 1.0, 2);
        let items = assembler.prepare(
            vec![undated, old, new],
            ContextOrdering::Chronological,
            &WordCounter,
        );
        assert_eq!(ids(&items), vec!["new", "old", "undated"]);
        assert!(items[0].header.contains("published: 2024-01-01"));
    }

    #[test]
    fn hybrid_blends_freshness() {
        let assembler = ContextAssembler::default();
        let mut stale = scored("stale", SourceType::Web, 0.6, 0);
        stale.freshness_score = 0.3;
        let mut fresh = scored("fresh", SourceType::Web, 0.55, 1);
        fresh.freshness_score = 1.0;
        let items = assembler.prepare(vec![stale, fresh], ContextOrdering::Hybrid, &WordCounter);
        assert_eq!(ids(&items), vec!["fresh", "stale"]);
        assert_eq!(assembler.ordering_for(true), ContextOrdering::Hybrid);
        assert_eq!(assembler.ordering_for(false), ContextOrdering::Relevance);
    }

    #[test]
    fn finish_builds_a_clean_citation_map() {
        let assembler = ContextAssembler::default();
        let mut web = scored("w", SourceType::Web, 0.8, 1);
        web.result.url = Some("https://example.com/w".into());
        let mut items = assembler.prepare(
            vec![scored("a", SourceType::Document, 0.9, 0), web],
            ContextOrdering::Relevance,
            &WordCounter,
        );
        items[1].compression = CompressionKind::Truncated;
        let linker = CitationLinker::new().unwrap();
        let context = assembler.finish(
            items,
            Vec::new(),
            PipelineReport::default(),
            &WordCounter,
            &linker,
        );
        assert!(context.dangling_citations.is_empty());
        assert!(!context.degraded);
        assert_eq!(context.citations.len(), 2);
        assert_eq!(context.citations[&2].url.as_deref(), Some("https://example.com/w"));
        assert_eq!(context.report.compressed, 1);
        assert!(context.text.starts_with("[Document 1] Title a"));
        assert!(context.text.contains("\n\n[Web 2] Title w"));
        assert_eq!(context.total_tokens, WordCounter.count(&context.text));
    }

    #[test]
    fn source_text_does_not_break_citation_integrity() {
        let assembler = ContextAssembler::default();
        let mut wiki = scored("wiki", SourceType::Web, 0.9, 0);
        wiki.result.title = "Rust".into();
        wiki.result.url = Some("https://en.wikipedia.org/wiki/Rust_(programming_language)".into());
        let mut footnoted = scored("notes", SourceType::Document, 0.8, 1);
        footnoted.result.content = "Ownership is checked at compile time, see footnote [7] and [1].".into();
        let items = assembler.prepare(vec![wiki, footnoted], ContextOrdering::Relevance, &WordCounter);

        let context = assembler.finish(
            items,
            Vec::new(),
            PipelineReport::default(),
            &WordCounter,
            &CitationLinker::new().unwrap(),
        );
        assert!(context.dangling_citations.is_empty(), "{:?}", context.dangling_citations);
        assert!(context
            .text
            .contains("[Rust](https://en.wikipedia.org/wiki/Rust_(programming_language))"));
        assert!(context.text.contains("footnote [7]"));
    }
}
