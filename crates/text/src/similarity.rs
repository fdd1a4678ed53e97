use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::hash::Hash;
use unicode_segmentation::UnicodeSegmentation;

/// Default number of leading characters compared by the LCS measure.
pub const DEFAULT_LCS_CHAR_CAP: usize = 600;

/// Lowercase, trim and collapse runs of whitespace to a single space.
#[must_use]
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().flat_map(char::to_lowercase));
    }
    out
}

/// Hex SHA-256 of the normalized text.
#[must_use]
pub fn content_hash(text: &str) -> String {
    sha256_hex(&normalize(text))
}

fn sha256_hex(normalized: &str) -> String {
    let digest = Sha256::digest(normalized.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Lowercased unicode words.
#[must_use]
pub fn word_tokens(text: &str) -> Vec<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}

#[must_use]
pub fn word_set(text: &str) -> HashSet<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}

/// Intersection over union. Two empty sets are identical.
#[must_use]
pub fn jaccard<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let intersection = small.iter().filter(|item| large.contains(item)).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f32 / union as f32
}

/// Length of the longest common subsequence, two-row DP.
#[must_use]
pub fn lcs_len<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (outer, inner) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let mut prev = vec![0u32; inner.len() + 1];
    let mut curr = vec![0u32; inner.len() + 1];
    for x in outer {
        for (j, y) in inner.iter().enumerate() {
            curr[j + 1] = if x == y {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[inner.len()] as usize
}

/// LCS-based character similarity in `[0, 1]` of the normalized texts.
#[must_use]
pub fn char_similarity(a: &str, b: &str) -> f32 {
    TextFingerprint::new(a, DEFAULT_LCS_CHAR_CAP)
        .char_similarity(&TextFingerprint::new(b, DEFAULT_LCS_CHAR_CAP))
}

/// Jaccard over lowercased word sets.
#[must_use]
pub fn word_similarity(a: &str, b: &str) -> f32 {
    jaccard(&word_set(a), &word_set(b))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityWeights {
    pub char_weight: f32,
    pub word_weight: f32,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            char_weight: 0.6,
            word_weight: 0.4,
        }
    }
}

impl SimilarityWeights {
    fn normalized(self) -> (f32, f32) {
        let total = self.char_weight + self.word_weight;
        if total <= f32::EPSILON || !total.is_finite() {
            return (0.6, 0.4);
        }
        (self.char_weight / total, self.word_weight / total)
    }
}

/// `char_weight * charSim + word_weight * wordSim`.
#[must_use]
pub fn combined_similarity(a: &str, b: &str, weights: SimilarityWeights) -> f32 {
    TextFingerprint::new(a, DEFAULT_LCS_CHAR_CAP)
        .combined(&TextFingerprint::new(b, DEFAULT_LCS_CHAR_CAP), weights)
}

/// Precomputed comparison material for one text.
///
/// The LCS measure only looks at the first `char_cap` normalized characters
/// and scales by the ratio of full lengths, which is the exact upper bound of
/// full-text LCS similarity.
#[derive(Debug, Clone)]
pub struct TextFingerprint {
    pub hash: String,
    chars: Vec<char>,
    full_len: usize,
    words: HashSet<String>,
}

impl TextFingerprint {
    #[must_use]
    pub fn new(text: &str, char_cap: usize) -> Self {
        let normalized = normalize(text);
        let hash = sha256_hex(&normalized);
        let full_len = normalized.chars().count();
        let chars = normalized.chars().take(char_cap.max(1)).collect();
        let words = word_set(&normalized);
        Self {
            hash,
            chars,
            full_len,
            words,
        }
    }

    #[must_use]
    pub fn char_len(&self) -> usize {
        self.full_len
    }

    #[must_use]
    pub fn words(&self) -> &HashSet<String> {
        &self.words
    }

    #[must_use]
    pub fn length_ratio(&self, other: &Self) -> f32 {
        let (min, max) = if self.full_len <= other.full_len {
            (self.full_len, other.full_len)
        } else {
            (other.full_len, self.full_len)
        };
        if max == 0 {
            return 1.0;
        }
        min as f32 / max as f32
    }

    #[must_use]
    pub fn char_similarity(&self, other: &Self) -> f32 {
        let max_prefix = self.chars.len().max(other.chars.len());
        if max_prefix == 0 {
            return if self.full_len == other.full_len { 1.0 } else { 0.0 };
        }
        let lcs = lcs_len(&self.chars, &other.chars);
        let prefix_sim = lcs as f32 / max_prefix as f32;
        let truncated = self.chars.len() < self.full_len || other.chars.len() < other.full_len;
        if truncated {
            prefix_sim * self.length_ratio(other)
        } else {
            prefix_sim
        }
    }

    #[must_use]
    pub fn word_similarity(&self, other: &Self) -> f32 {
        jaccard(&self.words, &other.words)
    }

    #[must_use]
    pub fn combined(&self, other: &Self, weights: SimilarityWeights) -> f32 {
        let (cw, ww) = weights.normalized();
        cw * self.char_similarity(other) + ww * self.word_similarity(other)
    }

    /// Cheap ceiling on [`Self::combined`] that skips the LCS table.
    #[must_use]
    pub fn combined_upper_bound(&self, other: &Self, weights: SimilarityWeights) -> f32 {
        let (cw, ww) = weights.normalized();
        cw * self.length_ratio(other) + ww * self.word_similarity(other)
    }

    /// Combined similarity, or `None` when the cheap bound already rules out
    /// reaching `threshold`.
    #[must_use]
    pub fn combined_at_least(
        &self,
        other: &Self,
        weights: SimilarityWeights,
        threshold: f32,
    ) -> Option<f32> {
        if self.combined_upper_bound(other, weights) < threshold {
            return None;
        }
        let score = self.combined(other, weights);
        (score >= threshold).then_some(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn normalize_collapses_case_and_whitespace() {
        assert_eq!(normalize("  Hello \n\t WORLD  "), "hello world");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn content_hash_ignores_case_and_spacing() {
        assert_eq!(content_hash("The Cat  sat"), content_hash("the cat sat"));
        assert_ne!(content_hash("the cat sat"), content_hash("the dog sat"));
        assert_eq!(content_hash("x").len(), 64);
    }

    #[test]
    fn fingerprint_hash_is_the_content_hash() {
        let fingerprint = TextFingerprint::new("The Cat  sat", 4);
        assert_eq!(fingerprint.hash, content_hash("the cat sat"));
    }

    #[test]
    fn jaccard_basics() {
        let a: HashSet<_> = ["a", "b", "c"].into_iter().collect();
        let b: HashSet<_> = ["b", "c", "d"].into_iter().collect();
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-6);
        let empty: HashSet<&str> = HashSet::new();
        assert_eq!(jaccard(&empty, &empty), 1.0);
        assert_eq!(jaccard(&a, &empty), 0.0);
    }

    #[test]
    fn lcs_matches_known_values() {
        let a: Vec<char> = "ABCBDAB".chars().collect();
        let b: Vec<char> = "BDCABA".chars().collect();
        assert_eq!(lcs_len(&a, &b), 4);
        assert_eq!(lcs_len::<char>(&[], &b), 0);
    }

    #[test]
    fn identical_texts_are_fully_similar() {
        let text = "Photosynthesis converts light energy into chemical energy.";
        assert!((char_similarity(text, &text.to_uppercase()) - 1.0).abs() < 1e-6);
        assert!(
            (combined_similarity(text, text, SimilarityWeights::default()) - 1.0).abs() < 1e-6
        );
    }

    #[test]
    fn unrelated_texts_score_low() {
        let sim = combined_similarity(
            "The mitochondria is the powerhouse of the cell.",
            "Quarterly revenue rose by twelve percent in Europe.",
            SimilarityWeights::default(),
        );
        assert!(sim < 0.5, "sim = {sim}");
    }

    #[test]
    fn capped_prefix_scales_by_length_ratio() {
        let base = "lorem ipsum dolor sit amet ".repeat(10);
        let long = base.repeat(4);
        let a = TextFingerprint::new(&base, 50);
        let b = TextFingerprint::new(&long, 50);
        let sim = a.char_similarity(&b);
        assert!((sim - a.length_ratio(&b)).abs() < 1e-3, "sim = {sim}");
    }

    #[test]
    fn bound_prunes_without_false_negatives() {
        let a = TextFingerprint::new("short note", 600);
        let b = TextFingerprint::new(&"a much longer unrelated passage ".repeat(20), 600);
        assert!(a.combined_at_least(&b, SimilarityWeights::default(), 0.85).is_none());
        let c = TextFingerprint::new("Short note", 600);
        assert!(a.combined_at_least(&c, SimilarityWeights::default(), 0.85).is_some());
    }

    proptest! {
        #[test]
        fn combined_is_symmetric_and_bounded(a in "[a-z ]{0,60}", b in "[a-z ]{0,60}") {
            let w = SimilarityWeights::default();
            let fa = TextFingerprint::new(&a, 600);
            let fb = TextFingerprint::new(&b, 600);
            let ab = fa.combined(&fb, w);
            let ba = fb.combined(&fa, w);
            prop_assert!((ab - ba).abs() < 1e-5);
            prop_assert!((0.0..=1.0 + 1e-5).contains(&ab));
            prop_assert!(fa.combined_upper_bound(&fb, w) + 1e-5 >= ab);
        }
    }
}
