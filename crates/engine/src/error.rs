use context_assembly::AssemblyError;
use context_search::SearchError;
use context_text::TokenizerError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Fatal errors. Everything a collaborator can do wrong is a degradation on
/// the returned context instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Query is empty")]
    EmptyQuery,

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),
}

impl From<SearchError> for EngineError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidConfig(msg) => Self::Config(msg),
            other => Self::Config(other.to_string()),
        }
    }
}

impl From<AssemblyError> for EngineError {
    fn from(err: AssemblyError) -> Self {
        Self::Config(err.to_string())
    }
}
