//! # Context Engine
//!
//! One call from a user query to a token-budgeted, cited context:
//!
//! ```text
//! query -> analyze -> expand -> fan-out (semantic | keyword | web)
//!       -> fuse/dedup -> score -> threshold -> re-rank -> diversify
//!       -> select -> compress -> assemble -> AssembledContext
//! ```
//!
//! Only invalid options are errors. Failing sources, expansion, compression
//! timeouts and cancellation all come back as [`Degradation`] entries on a
//! (possibly empty) context.
//!
//! ```no_run
//! # async fn demo(web: std::sync::Arc<dyn context_protocol::WebSearch>) -> context_engine::Result<()> {
//! use context_engine::{EngineConfig, RetrievalEngine, RetrieveOptions};
//!
//! let engine = RetrievalEngine::builder(EngineConfig::default()).web(web).build()?;
//! let context = engine
//!     .retrieve_context("latest rust release notes", &RetrieveOptions::default().with_budget(4_000))
//!     .await?;
//! println!("{}", context.text);
//! # Ok(())
//! # }
//! ```
//!
//! [`Degradation`]: context_protocol::Degradation

mod config;
mod engine;
mod error;
mod options;

pub use config::{EngineConfig, CONFIG_ENV};
pub use engine::{EngineBuilder, RetrievalEngine};
pub use error::{EngineError, Result};
pub use options::RetrieveOptions;

pub use context_assembly::{CompressionStrategy, ContextOrdering};
pub use context_search::{ExpansionStrategy, SourceToggles};
