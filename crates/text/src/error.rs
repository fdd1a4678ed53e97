use context_protocol::ModelEncoding;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TokenizerError>;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Failed to load {encoding} tokenizer: {message}")]
    Load {
        encoding: ModelEncoding,
        message: String,
    },
}
