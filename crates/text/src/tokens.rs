use crate::error::{Result, TokenizerError};
use context_protocol::{ModelEncoding, TokenCounter};
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tiktoken_rs::CoreBPE;

pub const DEFAULT_TOKEN_CACHE_CAPACITY: usize = 10_000;

/// Exact BPE token counter backed by `tiktoken-rs`.
#[derive(Clone)]
pub struct TiktokenCounter {
    bpe: Arc<CoreBPE>,
    encoding: ModelEncoding,
}

impl TiktokenCounter {
    pub fn new(encoding: ModelEncoding) -> Result<Self> {
        let loaded = match encoding {
            ModelEncoding::Cl100kBase => tiktoken_rs::cl100k_base(),
            ModelEncoding::O200kBase => tiktoken_rs::o200k_base(),
            ModelEncoding::P50kBase => tiktoken_rs::p50k_base(),
        };
        let bpe = loaded.map_err(|err| TokenizerError::Load {
            encoding,
            message: err.to_string(),
        })?;
        log::debug!("Loaded {encoding} tokenizer");
        Ok(Self {
            bpe: Arc::new(bpe),
            encoding,
        })
    }
}

impl std::fmt::Debug for TiktokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenCounter")
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_ordinary(text).len()
    }

    fn encoding(&self) -> ModelEncoding {
        self.encoding
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
}

/// Memoizes counts per string, keyed by SHA-256 of the text.
pub struct CachedTokenCounter<C> {
    inner: C,
    cache: Mutex<LruCache<[u8; 32], usize>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<C: TokenCounter> CachedTokenCounter<C> {
    pub fn new(inner: C, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> TokenCacheStats {
        TokenCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: self.lock().len(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<[u8; 32], usize>> {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl CachedTokenCounter<TiktokenCounter> {
    /// Cached tiktoken counter with the default capacity.
    pub fn tiktoken(encoding: ModelEncoding) -> Result<Self> {
        Ok(Self::new(
            TiktokenCounter::new(encoding)?,
            DEFAULT_TOKEN_CACHE_CAPACITY,
        ))
    }
}

impl<C: TokenCounter> TokenCounter for CachedTokenCounter<C> {
    fn count(&self, text: &str) -> usize {
        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(text.as_bytes()));
        if let Some(count) = self.lock().get(&key).copied() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return count;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        // Count outside the lock; a racing duplicate insert is harmless.
        let count = self.inner.count(text);
        self.lock().put(key, count);
        count
    }

    fn encoding(&self) -> ModelEncoding {
        self.inner.encoding()
    }
}
