use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which retrieval adapter produced a result.
///
/// Downstream stages switch on this tag instead of inspecting result shape.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Semantic vector search over the document corpus.
    Document,
    /// Lexical (BM25-style) search over the document corpus.
    Keyword,
    /// Web search.
    Web,
}

impl SourceType {
    pub const ALL: [SourceType; 3] = [SourceType::Document, SourceType::Keyword, SourceType::Web];

    /// Fixed tie-break priority: semantic > keyword > web. Lower wins.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Document => 0,
            Self::Keyword => 1,
            Self::Web => 2,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Keyword => "keyword",
            Self::Web => "web",
        }
    }

    /// Document and keyword hits both come from the local corpus.
    #[must_use]
    pub const fn is_corpus(self) -> bool {
        matches!(self, Self::Document | Self::Keyword)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One piece of evidence returned by a retrieval adapter.
///
/// Immutable once produced: later stages wrap it in [`ScoredResult`] and only
/// attach derived scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RetrievalResult {
    pub source_id: String,
    pub source_type: SourceType,
    /// Adapter score normalized to `[0, 1]`.
    pub raw_score: f32,
    pub content: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl RetrievalResult {
    pub fn new(
        source_id: impl Into<String>,
        source_type: SourceType,
        raw_score: f32,
        content: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            source_type,
            raw_score,
            content: content.into(),
            title: String::new(),
            url: None,
            document_id: None,
            published_at: None,
            author: None,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    #[must_use]
    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }

    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Lowercased host of `url` without `www.` and port, if any.
    #[must_use]
    pub fn domain(&self) -> Option<String> {
        self.url.as_deref().and_then(host_of)
    }

    /// Grouping key for per-domain caps: the url host, else the parent
    /// document, else the result itself.
    #[must_use]
    pub fn origin_key(&self) -> String {
        if let Some(domain) = self.domain() {
            return domain;
        }
        match &self.document_id {
            Some(doc) => format!("doc:{doc}"),
            None => format!("{}:{}", self.source_type, self.source_id),
        }
    }
}

/// Extract the host portion of a URL-ish string.
#[must_use]
pub fn host_of(url: &str) -> Option<String> {
    let trimmed = url.trim();
    let rest = trimmed
        .split_once("://")
        .map_or(trimmed, |(_, rest)| rest);
    let authority = rest
        .split(|c| matches!(c, '/' | '?' | '#'))
        .next()
        .unwrap_or_default();
    let authority = authority.rsplit('@').next().unwrap_or_default();
    let host = authority.split(':').next().unwrap_or_default();
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() || !host.contains('.') {
        return None;
    }
    Some(host)
}

/// A retrieval result plus the separately named sub-scores each stage attaches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScoredResult {
    pub result: RetrievalResult,
    /// Position after fusion; used as the stable tie-break downstream.
    pub fusion_rank: usize,
    pub quality_score: f32,
    pub authority_score: f32,
    pub freshness_score: f32,
    pub relevance_score: f32,
    pub combined_score: f32,
}

impl ScoredResult {
    #[must_use]
    pub fn new(result: RetrievalResult, fusion_rank: usize) -> Self {
        let combined_score = result.raw_score;
        Self {
            result,
            fusion_rank,
            quality_score: 0.0,
            authority_score: 0.5,
            freshness_score: 0.5,
            relevance_score: 0.0,
            combined_score,
        }
    }

    #[must_use]
    pub fn source_type(&self) -> SourceType {
        self.result.source_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn host_extraction_strips_scheme_port_and_www() {
        assert_eq!(
            host_of("https://www.Example.com:8443/a/b?q=1"),
            Some("example.com".to_string())
        );
        assert_eq!(
            host_of("docs.python.org/3/library"),
            Some("docs.python.org".to_string())
        );
        assert_eq!(host_of("http://user@wiki.org#x"), Some("wiki.org".to_string()));
        assert_eq!(host_of("localhost"), None);
        assert_eq!(host_of(""), None);
    }

    #[test]
    fn origin_key_falls_back_to_document_then_source() {
        let web = RetrievalResult::new("w1", SourceType::Web, 0.5, "x")
            .with_url("https://news.example.com/story");
        assert_eq!(web.origin_key(), "news.example.com");

        let doc = RetrievalResult::new("c7", SourceType::Document, 0.5, "x").with_document_id("d1");
        assert_eq!(doc.origin_key(), "doc:d1");

        let bare = RetrievalResult::new("k3", SourceType::Keyword, 0.5, "x");
        assert_eq!(bare.origin_key(), "keyword:k3");
    }

    #[test]
    fn source_priority_orders_semantic_first() {
        let mut types = vec![SourceType::Web, SourceType::Keyword, SourceType::Document];
        types.sort_by_key(|t| t.priority());
        assert_eq!(types, SourceType::ALL.to_vec());
    }

    #[test]
    fn results_deserialize_with_optional_fields_missing() {
        let raw = r#"{"source_id":"a","source_type":"web","raw_score":0.4,"content":"hello"}"#;
        let parsed: RetrievalResult = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.source_type, SourceType::Web);
        assert!(parsed.title.is_empty());
        assert!(parsed.published_at.is_none());
    }
}
