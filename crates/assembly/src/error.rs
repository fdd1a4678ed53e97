use thiserror::Error;

pub type Result<T> = std::result::Result<T, AssemblyError>;

#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Citation pattern error: {0}")]
    Pattern(#[from] regex::Error),
}
