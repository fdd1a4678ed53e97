use context_protocol::TokenCounter;
use unicode_segmentation::UnicodeSegmentation;

pub const ELLIPSIS: &str = "…";

/// Non-blank sentences, trimmed.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

#[must_use]
pub fn word_count(text: &str) -> usize {
    text.unicode_words().count()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    pub text: String,
    pub truncated: bool,
}

/// Cut `text` to at most `max_tokens`, preferring sentence boundaries.
///
/// Keeps as many leading sentences as fit. When not even the first sentence
/// fits, falls back to word boundaries. A trailing ellipsis marks any cut and
/// is included in the token count.
#[must_use]
pub fn truncate_to_tokens(text: &str, max_tokens: usize, counter: &dyn TokenCounter) -> Truncation {
    if counter.count(text) <= max_tokens {
        return Truncation {
            text: text.to_string(),
            truncated: false,
        };
    }
    if max_tokens == 0 {
        return Truncation {
            text: String::new(),
            truncated: true,
        };
    }

    let sentence_ends: Vec<usize> = text
        .split_sentence_bound_indices()
        .map(|(start, sentence)| start + sentence.len())
        .collect();
    if let Some(cut) = longest_fitting_prefix(text, &sentence_ends, max_tokens, counter) {
        return Truncation { text: cut, truncated: true };
    }

    let word_ends: Vec<usize> = text
        .split_word_bound_indices()
        .filter(|(_, word)| !word.trim().is_empty())
        .map(|(start, word)| start + word.len())
        .collect();
    if let Some(cut) = longest_fitting_prefix(text, &word_ends, max_tokens, counter) {
        return Truncation { text: cut, truncated: true };
    }

    Truncation {
        text: String::new(),
        truncated: true,
    }
}

/// Binary search over candidate cut offsets for the longest prefix that fits
/// together with the ellipsis. Token counts are monotone in prefix length for
/// practical purposes; the winner is re-verified before returning.
fn longest_fitting_prefix(
    text: &str,
    ends: &[usize],
    max_tokens: usize,
    counter: &dyn TokenCounter,
) -> Option<String> {
    let render = |end: usize| format!("{}{ELLIPSIS}", text[..end].trim_end());
    let fits = |end: usize| counter.count(&render(end)) <= max_tokens;

    let (mut lo, mut hi) = (0usize, ends.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if fits(ends[mid]) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    let mut idx = lo;
    while idx > 0 {
        let end = ends[idx - 1];
        if text[..end].trim().is_empty() {
            return None;
        }
        if fits(end) {
            return Some(render(end));
        }
        idx -= 1;
    }
    None
}
