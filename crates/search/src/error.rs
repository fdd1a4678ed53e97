use context_protocol::CollaboratorError;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid classifier pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Why expansion produced nothing. The caller falls back to the raw query.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpansionError {
    #[error("No generation provider configured")]
    NoGenerator,

    #[error("Generation failed: {0}")]
    Generation(#[from] CollaboratorError),

    #[error("Expansion timed out after {0:?}")]
    Timeout(Duration),

    #[error("Generation returned no usable terms")]
    EmptyResponse,
}
