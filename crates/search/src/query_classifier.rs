use crate::error::Result;
use context_protocol::{QueryIntent, QueryProfile, QueryType};
use context_text::{normalize, word_tokens};
use regex::Regex;

/// Ordered classification rules; the first matching rule wins. Each entry is
/// a regex alternative matched on word boundaries against the normalized
/// query.
///
/// Procedural runs before conceptual so "how do I ..." is not read as an
/// explanation request, and conceptual runs before factual so "explain what
/// is X" is not read as a lookup.
const RULES: &[(QueryType, &[&str])] = &[
    (
        QueryType::Comparative,
        &[
            r"compar(?:e|es|ed|ing|ison|isons)",
            r"vs\.?",
            r"versus",
            r"differences? between",
            r"better than",
            r"similarities between",
        ],
    ),
    (
        QueryType::Procedural,
        &[
            r"how to",
            r"how (?:do|can|should) i",
            r"steps to",
            r"step by step",
            r"guide to",
            r"tutorials?",
            r"install(?:s|ed|ing|ation)?",
            r"set up",
            r"configur(?:e|ing)",
        ],
    ),
    (
        QueryType::Conceptual,
        &[
            r"explain(?:s|ed|ing)?",
            r"why",
            r"how (?:does|do)",
            r"concept of",
            r"meaning of",
            r"what does it mean",
            r"describe",
            r"understand(?:ing)?",
            r"theory of",
        ],
    ),
    (
        QueryType::Analytical,
        &[
            r"analy[sz](?:e|es|ed|ing)",
            r"analysis",
            r"evaluat(?:e|es|ed|ing)",
            r"assess(?:es|ed|ing|ment)?",
            r"impact of",
            r"implications?",
            r"pros and cons",
            r"trade-?offs?",
            r"effects? of",
        ],
    ),
    (
        QueryType::Factual,
        &[
            r"what (?:is|are|was|were)",
            r"who",
            r"when",
            r"where",
            r"which",
            r"how (?:many|much)",
            r"define",
            r"definition of",
        ],
    ),
    (
        QueryType::Exploratory,
        &[
            r"tell me about",
            r"overview",
            r"learn about",
            r"explor(?:e|ing)",
            r"anything about",
            r"introduction to",
            r"information about",
            r"more about",
            r"ideas for",
        ],
    ),
];

const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "between", "by", "can", "could", "did",
    "do", "does", "explain", "for", "from", "had", "has", "have", "how", "i", "in", "into", "is",
    "it", "its", "me", "my", "of", "on", "or", "please", "should", "tell", "than", "that", "the",
    "their", "there", "these", "this", "those", "to", "vs", "was", "we", "were", "what", "when",
    "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

const TIME_WORDS: &[&str] = &[
    "latest",
    "recent",
    "recently",
    "today",
    "yesterday",
    "tonight",
    "current",
    "currently",
    "now",
    "news",
    "upcoming",
    "breaking",
    "this week",
    "this month",
    "this year",
];

#[derive(Debug, Clone)]
pub struct QueryClassifier {
    rules: Vec<(QueryType, Regex)>,
}

impl QueryClassifier {
    pub fn new() -> Result<Self> {
        let rules = RULES
            .iter()
            .map(|(query_type, patterns)| {
                let pattern = format!(r"\b(?:{})\b", patterns.join("|"));
                Ok((*query_type, Regex::new(&pattern)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    #[must_use]
    pub fn classify(&self, query: &str) -> QueryType {
        let padded = padded(query);
        if padded.trim().is_empty() {
            return QueryType::Unknown;
        }
        self.rules
            .iter()
            .find(|(_, rule)| rule.is_match(&padded))
            .map_or(QueryType::Unknown, |(query_type, _)| *query_type)
    }

    #[must_use]
    pub fn intent(query: &str, query_type: QueryType) -> QueryIntent {
        match query_type {
            QueryType::Factual => QueryIntent::Lookup,
            QueryType::Conceptual => QueryIntent::Learn,
            QueryType::Procedural => QueryIntent::HowTo,
            QueryType::Comparative => QueryIntent::Compare,
            QueryType::Analytical => QueryIntent::Analyze,
            QueryType::Exploratory => QueryIntent::Browse,
            QueryType::Unknown => {
                if query.trim_end().ends_with('?') {
                    QueryIntent::Lookup
                } else {
                    QueryIntent::Browse
                }
            }
        }
    }

    /// Content words in first-seen order, stopwords removed.
    #[must_use]
    pub fn keywords(query: &str) -> Vec<String> {
        let mut keywords: Vec<String> = Vec::new();
        for word in word_tokens(query) {
            let keep = word.chars().count() >= 2 || word.chars().all(|c| c.is_ascii_digit());
            if !keep || STOPWORDS.contains(&word.as_str()) {
                continue;
            }
            if !keywords.contains(&word) {
                keywords.push(word);
            }
        }
        keywords
    }

    #[must_use]
    pub fn is_time_sensitive(query: &str) -> bool {
        let padded = padded(query);
        if TIME_WORDS
            .iter()
            .any(|word| padded.contains(&format!(" {word} ")))
        {
            return true;
        }
        word_tokens(query).iter().any(|word| is_year(word))
    }

    /// `[0, 1]` blend of query length, keyword count and how much evidence
    /// the query type usually needs.
    #[must_use]
    pub fn complexity(query: &str, keywords: usize, query_type: QueryType) -> f32 {
        let words = query.split_whitespace().count();
        let length_factor = (words as f32 / 20.0).min(1.0);
        let keyword_factor = (keywords as f32 / 8.0).min(1.0);
        let type_factor = match query_type {
            QueryType::Factual => 0.2,
            QueryType::Unknown => 0.4,
            QueryType::Procedural | QueryType::Exploratory => 0.5,
            QueryType::Conceptual => 0.6,
            QueryType::Comparative => 0.8,
            QueryType::Analytical => 0.9,
        };
        let padded = padded(query);
        let compound = if padded.contains(" and ") || query.matches('?').count() > 1 {
            0.1
        } else {
            0.0
        };
        (0.35 * length_factor + 0.3 * keyword_factor + 0.35 * type_factor + compound)
            .clamp(0.0, 1.0)
    }
}

/// Builds the per-request [`QueryProfile`].
#[derive(Debug, Clone)]
pub struct QueryAnalyzer {
    classifier: QueryClassifier,
}

impl QueryAnalyzer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            classifier: QueryClassifier::new()?,
        })
    }

    /// Profile without expansion terms; those are attached once expansion
    /// settles, before the profile is shared.
    #[must_use]
    pub fn analyze(&self, query: &str, topic: Option<&str>) -> QueryProfile {
        let query_type = self.classifier.classify(query);
        let keywords = QueryClassifier::keywords(query);
        let complexity_score = QueryClassifier::complexity(query, keywords.len(), query_type);
        let profile = QueryProfile {
            original_query: query.trim().to_string(),
            expanded_terms: Vec::new(),
            query_type,
            intent: QueryClassifier::intent(query, query_type),
            complexity_score,
            keywords,
            is_time_sensitive: QueryClassifier::is_time_sensitive(query),
            topic: topic
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        };
        log::debug!(
            "Analyzed query '{}': type={}, complexity={:.2}, keywords={:?}",
            profile.original_query,
            profile.query_type,
            profile.complexity_score,
            profile.keywords
        );
        profile
    }
}

fn padded(query: &str) -> String {
    let normalized = normalize(query);
    let stripped: String = normalized
        .chars()
        .map(|c| if matches!(c, '?' | '!' | ',' | ';' | ':') { ' ' } else { c })
        .collect();
    format!(" {} ", stripped.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn is_year(word: &str) -> bool {
    word.len() == 4
        && word.chars().all(|c| c.is_ascii_digit())
        && (word.starts_with("19") || word.starts_with("20"))
}
