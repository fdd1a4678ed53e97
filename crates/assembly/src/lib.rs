//! # Context Assembly
//!
//! The budget-constrained tail of the pipeline:
//!
//! - **Selection**: item count from query complexity and the token budget,
//!   refined once against actual token counts
//! - **Compression**: truncation, extraction, summarization or hybrid under a
//!   wall-clock budget and a bounded number of concurrent generation calls
//! - **Assembly**: final ordering, `[Document N]` / `[Web N]` formatting and
//!   the citation map
//! - **Citations**: marker parsing and dangling-reference detection
//!
//! The budget invariant holds for every strategy: the rendered items of a
//! compressed context never exceed the token budget.

mod assembler;
mod citation;
mod compressor;
mod error;
mod selector;

pub use assembler::{marker_for, AssemblyConfig, ContextAssembler, ContextOrdering};
pub use citation::{CitationLinker, CitationReport};
pub use compressor::{
    CompressionConfig, CompressionOutcome, CompressionStrategy, ContextCompressor,
    MAX_COMPRESSION_CONCURRENCY,
};
pub use error::{AssemblyError, Result};
pub use selector::{ContextSelector, Selection, SelectionPlan, SelectorConfig};
