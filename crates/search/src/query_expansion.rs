use crate::error::ExpansionError;
use context_protocol::GenerationProvider;
use context_text::{normalize, word_tokens};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

const LLM_CONFIDENCE: f32 = 0.8;
const SYNONYM_CONFIDENCE: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionStrategy {
    /// Ask the generation collaborator for related terms.
    Llm,
    /// Static synonym lookup.
    SynonymTable,
    /// Both concurrently, terms unioned.
    #[default]
    Hybrid,
    None,
}

impl fmt::Display for ExpansionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Llm => "llm",
            Self::SynonymTable => "synonym_table",
            Self::Hybrid => "hybrid",
            Self::None => "none",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub strategy: ExpansionStrategy,
    pub max_terms: usize,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub timeout_ms: u64,
    pub llm_max_tokens: usize,
    /// Extra synonym entries merged over the built-in table.
    pub synonyms: BTreeMap<String, Vec<String>>,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            strategy: ExpansionStrategy::default(),
            max_terms: 5,
            cache_ttl_secs: 3_600,
            cache_capacity: 1_000,
            timeout_ms: 1_500,
            llm_max_tokens: 64,
            synonyms: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub terms: Vec<String>,
    pub confidence: f32,
    pub strategy: ExpansionStrategy,
    pub cached: bool,
    /// Hybrid expansion whose LLM half failed; never cached.
    pub partial: bool,
}

impl Expansion {
    fn empty(strategy: ExpansionStrategy) -> Self {
        Self {
            terms: Vec::new(),
            confidence: 1.0,
            strategy,
            cached: false,
            partial: false,
        }
    }
}

/// Static related-term lookup.
#[derive(Debug, Clone)]
pub struct SynonymTable {
    synonyms: HashMap<String, Vec<String>>,
}

impl SynonymTable {
    /// Built-in general-purpose table.
    #[must_use]
    pub fn builtin() -> Self {
        let entries: &[(&str, &[&str])] = &[
            ("buy", &["purchase", "order", "acquire"]),
            ("price", &["cost", "pricing", "fee"]),
            ("cheap", &["affordable", "inexpensive", "budget"]),
            ("car", &["automobile", "vehicle"]),
            ("doctor", &["physician", "clinician"]),
            ("illness", &["disease", "condition", "disorder"]),
            ("symptom", &["sign", "indication"]),
            ("medicine", &["medication", "drug", "treatment"]),
            ("error", &["failure", "issue", "fault", "bug"]),
            ("fix", &["repair", "resolve", "troubleshoot"]),
            ("install", &["setup", "installation", "configure"]),
            ("guide", &["tutorial", "walkthrough", "instructions"]),
            ("law", &["legislation", "regulation", "statute"]),
            ("company", &["business", "firm", "corporation"]),
            ("job", &["employment", "career", "position"]),
            ("salary", &["pay", "wage", "compensation"]),
            ("climate", &["weather", "environment"]),
            ("energy", &["power", "electricity"]),
            ("study", &["research", "paper", "analysis"]),
            ("history", &["origin", "background", "timeline"]),
            ("benefit", &["advantage", "pro"]),
            ("risk", &["danger", "hazard", "downside"]),
            ("fast", &["quick", "rapid", "speed"]),
            ("big", &["large", "major"]),
            ("photosynthesis", &["chlorophyll", "light reaction", "calvin cycle"]),
        ];
        let synonyms = entries
            .iter()
            .map(|(term, syns)| {
                (
                    (*term).to_string(),
                    syns.iter().map(|s| (*s).to_string()).collect(),
                )
            })
            .collect();
        Self { synonyms }
    }

    /// Merge `extra` over the table; lowercased keys, duplicates skipped.
    pub fn extend(&mut self, extra: &BTreeMap<String, Vec<String>>) {
        for (term, syns) in extra {
            let entry = self.synonyms.entry(term.trim().to_lowercase()).or_default();
            for syn in syns {
                let syn = syn.trim().to_lowercase();
                if !syn.is_empty() && !entry.contains(&syn) {
                    entry.push(syn);
                }
            }
        }
    }

    /// Related terms for the words of `query`, excluding words already present.
    #[must_use]
    pub fn lookup(&self, query: &str, max_terms: usize) -> Vec<String> {
        let tokens = word_tokens(query);
        let mut terms: Vec<String> = Vec::new();
        for token in &tokens {
            let singular = token.strip_suffix('s').filter(|s| s.len() > 2);
            let syns = self
                .synonyms
                .get(token)
                .or_else(|| singular.and_then(|s| self.synonyms.get(s)));
            let Some(syns) = syns else {
                continue;
            };
            for syn in syns {
                if !tokens.contains(syn) && !terms.contains(syn) {
                    terms.push(syn.clone());
                }
            }
        }
        terms.truncate(max_terms);
        terms
    }
}

impl Default for SynonymTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpansionCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
}

struct CachedExpansion {
    expansion: Expansion,
    inserted_at: Instant,
}

/// Process-wide expansion cache: LRU bounded, entries expire after `ttl`.
///
/// Created once at startup and injected into every [`QueryExpander`].
pub struct ExpansionCache {
    entries: Mutex<LruCache<String, CachedExpansion>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ExpansionCache {
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn from_config(config: &ExpansionConfig) -> Self {
        Self::new(
            config.cache_capacity,
            Duration::from_secs(config.cache_ttl_secs),
        )
    }

    /// Cache key: strategy plus lowercased, trimmed, whitespace-collapsed query.
    #[must_use]
    pub fn key(query: &str, strategy: ExpansionStrategy) -> String {
        format!("{strategy}:{}", normalize(query))
    }

    pub fn get(&self, key: &str) -> Option<Expansion> {
        let mut entries = self.lock();
        let fresh = entries
            .get(key)
            .map(|entry| entry.inserted_at.elapsed() <= self.ttl);
        match fresh {
            Some(true) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                entries.get(key).map(|entry| Expansion {
                    cached: true,
                    ..entry.expansion.clone()
                })
            }
            Some(false) => {
                entries.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: String, expansion: Expansion) {
        let mut entries = self.lock();
        let evicted = entries.push(
            key.clone(),
            CachedExpansion {
                expansion,
                inserted_at: Instant::now(),
            },
        );
        if evicted.is_some_and(|(old_key, _)| old_key != key) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> ExpansionCacheStats {
        ExpansionCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            len: self.lock().len(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CachedExpansion>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for ExpansionCache {
    fn default() -> Self {
        Self::from_config(&ExpansionConfig::default())
    }
}

/// Produces related search terms for a query.
pub struct QueryExpander {
    generator: Option<Arc<dyn GenerationProvider>>,
    synonyms: SynonymTable,
    cache: Arc<ExpansionCache>,
    config: ExpansionConfig,
}

impl QueryExpander {
    pub fn new(
        config: ExpansionConfig,
        generator: Option<Arc<dyn GenerationProvider>>,
        cache: Arc<ExpansionCache>,
    ) -> Self {
        let mut synonyms = SynonymTable::builtin();
        synonyms.extend(&config.synonyms);
        Self {
            generator,
            synonyms,
            cache,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ExpansionConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ExpansionCache> {
        &self.cache
    }

    /// Expand `query`. Errors mean "use the raw query"; they never block
    /// retrieval.
    pub async fn expand(
        &self,
        query: &str,
        strategy: ExpansionStrategy,
    ) -> Result<Expansion, ExpansionError> {
        if strategy == ExpansionStrategy::None || query.trim().is_empty() {
            return Ok(Expansion::empty(strategy));
        }

        let key = ExpansionCache::key(query, strategy);
        if let Some(hit) = self.cache.get(&key) {
            log::debug!("Expansion cache hit for '{key}'");
            return Ok(hit);
        }

        let expansion = match strategy {
            ExpansionStrategy::Llm => self.expand_llm(query).await?,
            ExpansionStrategy::SynonymTable => self.expand_synonyms(query),
            ExpansionStrategy::Hybrid => self.expand_hybrid(query).await,
            ExpansionStrategy::None => Expansion::empty(strategy),
        };

        log::debug!(
            "Expanded '{}' via {}: {:?} (confidence {:.2})",
            query,
            strategy,
            expansion.terms,
            expansion.confidence
        );
        if !expansion.partial {
            self.cache.insert(key, expansion.clone());
        }
        Ok(expansion)
    }

    fn expand_synonyms(&self, query: &str) -> Expansion {
        Expansion {
            terms: self.synonyms.lookup(query, self.config.max_terms),
            confidence: SYNONYM_CONFIDENCE,
            strategy: ExpansionStrategy::SynonymTable,
            cached: false,
            partial: false,
        }
    }

    async fn expand_llm(&self, query: &str) -> Result<Expansion, ExpansionError> {
        let generator = self.generator.as_ref().ok_or(ExpansionError::NoGenerator)?;
        let prompt = expansion_prompt(query, self.config.max_terms);
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let response = tokio::time::timeout(
            timeout,
            generator.complete(&prompt, self.config.llm_max_tokens),
        )
        .await
        .map_err(|_| ExpansionError::Timeout(timeout))??;

        let terms = parse_terms(&response, query, self.config.max_terms);
        if terms.is_empty() {
            return Err(ExpansionError::EmptyResponse);
        }
        Ok(Expansion {
            terms,
            confidence: LLM_CONFIDENCE,
            strategy: ExpansionStrategy::Llm,
            cached: false,
            partial: false,
        })
    }

    async fn expand_hybrid(&self, query: &str) -> Expansion {
        let (llm, synonyms) = tokio::join!(self.expand_llm(query), async {
            self.expand_synonyms(query)
        });
        let llm = match llm {
            Ok(llm) => llm,
            Err(ExpansionError::NoGenerator) => {
                return Expansion {
                    strategy: ExpansionStrategy::Hybrid,
                    ..synonyms
                };
            }
            Err(err) => {
                log::warn!("LLM expansion failed, keeping synonym terms: {err}");
                return Expansion {
                    strategy: ExpansionStrategy::Hybrid,
                    partial: true,
                    ..synonyms
                };
            }
        };

        let mut terms = llm.terms;
        for term in synonyms.terms {
            if !terms.contains(&term) {
                terms.push(term);
            }
        }
        terms.truncate(self.config.max_terms);
        Expansion {
            terms,
            confidence: (llm.confidence + synonyms.confidence) / 2.0,
            strategy: ExpansionStrategy::Hybrid,
            cached: false,
            partial: false,
        }
    }
}

fn expansion_prompt(query: &str, max_terms: usize) -> String {
    format!(
        "Generate up to {max_terms} short search terms closely related to the query below. \
         Return one term per line with no numbering or commentary.\n\nQuery: {}",
        query.trim()
    )
}

/// Parse a generated term list: one per line or comma separated, bullets and
/// numbering stripped, lowercased, deduplicated.
fn parse_terms(response: &str, query: &str, max_terms: usize) -> Vec<String> {
    let query_norm = normalize(query);
    let mut terms: Vec<String> = Vec::new();
    for raw in response.split(['\n', ',', ';']) {
        let cleaned = raw
            .trim()
            .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*' | '•'))
            .trim()
            .trim_matches(|c: char| matches!(c, '"' | '\'' | '`'));
        let term = normalize(cleaned);
        if term.is_empty() || term == query_norm || term.len() > 64 || terms.contains(&term) {
            continue;
        }
        terms.push(term);
        if terms.len() >= max_terms {
            break;
        }
    }
    terms
}
