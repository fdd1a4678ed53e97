use chrono::{DateTime, Utc};
use context_protocol::{host_of, RetrievalResult, ScoredResult};
use context_text::{split_sentences, word_count};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Content shorter than this (chars) is penalized.
    pub min_length: usize,
    /// Content longer than this (chars) is penalized.
    pub max_length: usize,
    pub ideal_sentence_words_min: usize,
    pub ideal_sentence_words_max: usize,
    /// Sentence count at which the readability sentence factor saturates.
    pub sentence_floor: usize,
    pub optimal_word_count: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_length: 50,
            max_length: 5_000,
            ideal_sentence_words_min: 5,
            ideal_sentence_words_max: 25,
            sentence_floor: 3,
            optimal_word_count: 300,
        }
    }
}

/// Content-only quality estimate in `[0, 1]`.
#[derive(Debug, Clone, Default)]
pub struct QualityScorer {
    config: QualityConfig,
}

impl QualityScorer {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn score(&self, result: &RetrievalResult) -> f32 {
        let content = result.content.trim();
        if content.is_empty() {
            return 0.0;
        }
        let score = 0.25 * self.length_fit(content)
            + 0.3 * self.readability(content)
            + 0.2 * structure(result)
            + 0.25 * self.completeness(content);
        score.clamp(0.0, 1.0)
    }

    fn length_fit(&self, content: &str) -> f32 {
        let len = content.chars().count();
        if len < self.config.min_length {
            len as f32 / self.config.min_length.max(1) as f32
        } else if len > self.config.max_length {
            (self.config.max_length as f32 / len as f32).max(0.3)
        } else {
            1.0
        }
    }

    fn readability(&self, content: &str) -> f32 {
        let sentences = split_sentences(content);
        if sentences.is_empty() {
            return 0.0;
        }
        let words = word_count(content) as f32;
        let avg = words / sentences.len() as f32;
        let (lo, hi) = (
            self.config.ideal_sentence_words_min as f32,
            self.config.ideal_sentence_words_max as f32,
        );
        let length_factor = if avg < lo {
            avg / lo.max(1.0)
        } else if avg > hi {
            (hi / avg).max(0.2)
        } else {
            1.0
        };
        let sentence_factor =
            (sentences.len() as f32 / self.config.sentence_floor.max(1) as f32).min(1.0);
        0.7 * length_factor + 0.3 * sentence_factor
    }

    fn completeness(&self, content: &str) -> f32 {
        let words = word_count(content) as f32;
        let optimal = self.config.optimal_word_count.max(1) as f32;
        if words <= optimal {
            words / optimal
        } else {
            (optimal / words).sqrt()
        }
    }
}

fn structure(result: &RetrievalResult) -> f32 {
    let content = &result.content;
    let mut score = 0.0;
    if !result.title.trim().is_empty() {
        score += 0.4;
    }
    if content.contains("\n\n") {
        score += 0.3;
    }
    let marked = content.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with('#')
            || line.starts_with("- ")
            || line.starts_with("* ")
            || line.starts_with("• ")
            || line
                .split_once(". ")
                .is_some_and(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
    });
    if marked {
        score += 0.3;
    }
    score
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainAuthority {
    pub domain: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityPattern {
    /// Host suffix such as `.edu` or `.ac.uk`.
    pub suffix: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Entries merged over the built-in table.
    pub domains: Vec<DomainAuthority>,
    /// Entries merged over the built-in suffix rules.
    pub patterns: Vec<AuthorityPattern>,
    /// Applied to matches scoring at least `high_trust`.
    pub boost: f32,
    pub high_trust: f32,
    pub default_score: f32,
    pub use_builtin: bool,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            patterns: Vec::new(),
            boost: 1.1,
            high_trust: 0.85,
            default_score: 0.5,
            use_builtin: true,
        }
    }
}

const BUILTIN_DOMAINS: &[(&str, f32)] = &[
    ("wikipedia.org", 0.85),
    ("britannica.com", 0.85),
    ("nature.com", 0.95),
    ("science.org", 0.95),
    ("nih.gov", 0.95),
    ("who.int", 0.95),
    ("arxiv.org", 0.85),
    ("acm.org", 0.9),
    ("ieee.org", 0.9),
    ("python.org", 0.9),
    ("rust-lang.org", 0.9),
    ("mozilla.org", 0.9),
    ("w3.org", 0.9),
    ("ietf.org", 0.9),
    ("github.com", 0.7),
    ("stackoverflow.com", 0.75),
    ("reuters.com", 0.85),
    ("apnews.com", 0.85),
    ("bbc.co.uk", 0.8),
    ("nytimes.com", 0.8),
    ("medium.com", 0.5),
    ("reddit.com", 0.4),
    ("quora.com", 0.35),
    ("pinterest.com", 0.2),
];

const BUILTIN_PATTERNS: &[(&str, f32)] = &[
    (".gov", 0.9),
    (".mil", 0.85),
    (".edu", 0.85),
    (".ac.uk", 0.85),
    (".int", 0.85),
    (".org", 0.6),
];

/// Domain authority lookup: exact host, then registrable parents, then the
/// longest matching suffix rule, then the neutral default.
#[derive(Debug, Clone)]
pub struct AuthorityTable {
    domains: HashMap<String, f32>,
    patterns: Vec<(String, f32)>,
    boost: f32,
    high_trust: f32,
    default_score: f32,
}

impl AuthorityTable {
    #[must_use]
    pub fn from_config(config: &AuthorityConfig) -> Self {
        let mut domains: HashMap<String, f32> = HashMap::new();
        let mut patterns: Vec<(String, f32)> = Vec::new();
        if config.use_builtin {
            domains.extend(BUILTIN_DOMAINS.iter().map(|(d, s)| ((*d).to_string(), *s)));
            patterns.extend(BUILTIN_PATTERNS.iter().map(|(p, s)| ((*p).to_string(), *s)));
        }
        for entry in &config.domains {
            let domain = entry.domain.trim().to_lowercase();
            let domain = domain.trim_start_matches("www.");
            if !domain.is_empty() {
                domains.insert(domain.to_string(), entry.score.clamp(0.0, 1.0));
            }
        }
        for entry in &config.patterns {
            let suffix = entry.suffix.trim().to_lowercase();
            if suffix.is_empty() {
                continue;
            }
            let suffix = if suffix.starts_with('.') {
                suffix
            } else {
                format!(".{suffix}")
            };
            patterns.retain(|(existing, _)| *existing != suffix);
            patterns.push((suffix, entry.score.clamp(0.0, 1.0)));
        }
        // Longest suffix first so `.ac.uk` wins over shorter rules.
        patterns.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self {
            domains,
            patterns,
            boost: config.boost.max(1.0),
            high_trust: config.high_trust,
            default_score: config.default_score.clamp(0.0, 1.0),
        }
    }

    #[must_use]
    pub fn default_score(&self) -> f32 {
        self.default_score
    }

    /// Authority for a bare host.
    #[must_use]
    pub fn score_host(&self, host: &str) -> f32 {
        let host = host.trim().trim_start_matches("www.").to_lowercase();
        let matched = self.lookup_domain(&host).or_else(|| {
            self.patterns
                .iter()
                .find(|(suffix, _)| host.ends_with(suffix.as_str()))
                .map(|(_, score)| *score)
        });
        match matched {
            Some(score) if score >= self.high_trust => (score * self.boost).min(1.0),
            Some(score) => score,
            None => self.default_score,
        }
    }

    /// Authority for a result; results without a URL get the default.
    #[must_use]
    pub fn score(&self, result: &RetrievalResult) -> f32 {
        result
            .url
            .as_deref()
            .and_then(host_of)
            .map_or(self.default_score, |host| self.score_host(&host))
    }

    fn lookup_domain(&self, host: &str) -> Option<f32> {
        let mut candidate = host;
        loop {
            if let Some(score) = self.domains.get(candidate) {
                return Some(*score);
            }
            let (_, parent) = candidate.split_once('.')?;
            if !parent.contains('.') {
                return None;
            }
            candidate = parent;
        }
    }
}

impl Default for AuthorityTable {
    fn default() -> Self {
        Self::from_config(&AuthorityConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
    pub week_score: f32,
    pub month_score: f32,
    pub year_score: f32,
    /// Per-year multiplicative decay past the first year.
    pub yearly_decay: f32,
    pub floor: f32,
    /// Score for results without a publication date.
    pub unknown_score: f32,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            week_score: 1.0,
            month_score: 0.85,
            year_score: 0.6,
            yearly_decay: 0.7,
            floor: 0.3,
            unknown_score: 0.5,
        }
    }
}

/// Age-based freshness: boosted within a week or month, neutral within a
/// year, geometric decay to `floor` after that.
#[must_use]
pub fn freshness_score(
    published_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    config: &FreshnessConfig,
) -> f32 {
    let Some(published_at) = published_at else {
        return config.unknown_score;
    };
    let age_days = (now - published_at).num_days().max(0);
    let score = match age_days {
        0..=7 => config.week_score,
        8..=30 => config.month_score,
        31..=365 => config.year_score,
        _ => {
            let years = (age_days - 365) as f32 / 365.0;
            config.year_score * config.yearly_decay.powf(years.ceil())
        }
    };
    score.clamp(config.floor, 1.0)
}

/// Attaches quality, authority and freshness annotations.
#[derive(Debug, Clone, Default)]
pub struct ResultScorer {
    quality: QualityScorer,
    authority: AuthorityTable,
    freshness: FreshnessConfig,
}

impl ResultScorer {
    pub fn new(quality: QualityScorer, authority: AuthorityTable, freshness: FreshnessConfig) -> Self {
        Self {
            quality,
            authority,
            freshness,
        }
    }

    pub fn annotate(&self, results: &mut [ScoredResult], now: DateTime<Utc>) {
        for scored in results.iter_mut() {
            scored.quality_score = self.quality.score(&scored.result);
            scored.authority_score = self.authority.score(&scored.result);
            scored.freshness_score =
                freshness_score(scored.result.published_at, now, &self.freshness);
        }
    }
}
