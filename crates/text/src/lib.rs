//! # Context Text
//!
//! Leaf utilities shared by every pipeline stage:
//!
//! - **Similarity**: normalized content hashing, word Jaccard, LCS character
//!   similarity and their weighted combination
//! - **Token accounting**: exact `tiktoken` counts with a per-string cache
//! - **Sentences**: unicode sentence splitting and sentence-aware truncation

mod error;
mod sentences;
mod similarity;
mod tokens;

pub use error::{Result, TokenizerError};
pub use sentences::{split_sentences, truncate_to_tokens, word_count, Truncation, ELLIPSIS};
pub use similarity::{
    char_similarity, combined_similarity, content_hash, jaccard, lcs_len, normalize,
    word_set, word_similarity, word_tokens, SimilarityWeights, TextFingerprint,
    DEFAULT_LCS_CHAR_CAP,
};
pub use tokens::{
    CachedTokenCounter, TiktokenCounter, TokenCacheStats, DEFAULT_TOKEN_CACHE_CAPACITY,
};
