use crate::result::SourceType;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Failure reported by an external collaborator (index, search, model).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Collaborator timed out after {0:?}")]
    Timeout(Duration),

    #[error("Circuit open")]
    CircuitOpen,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

/// Why a retrieval source contributed nothing. Treated as data, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DegradedReason {
    Failed(String),
    TimedOut { after_ms: u64 },
    CircuitOpen,
    Cancelled,
    EmbeddingFailed(String),
}

impl DegradedReason {
    #[must_use]
    pub fn timed_out(after: Duration) -> Self {
        Self::TimedOut {
            after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl From<CollaboratorError> for DegradedReason {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::CircuitOpen => Self::CircuitOpen,
            CollaboratorError::Timeout(after) => Self::timed_out(after),
            other => Self::Failed(other.to_string()),
        }
    }
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(msg) => write!(f, "failed: {msg}"),
            Self::TimedOut { after_ms } => write!(f, "timed out after {after_ms}ms"),
            Self::CircuitOpen => f.write_str("circuit open"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::EmbeddingFailed(msg) => write!(f, "embedding failed: {msg}"),
        }
    }
}

/// A degrade-and-continue event surfaced on the returned context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    SourceUnavailable {
        source: SourceType,
        reason: DegradedReason,
    },
    NoResults,
    ExpansionFailed {
        reason: String,
    },
    CompressionTimeout {
        items_truncated: usize,
    },
    CompressionFailed {
        reason: String,
    },
    BudgetExceededUnrecoverable {
        dropped_items: usize,
        budget_tokens: usize,
    },
    Cancelled,
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceUnavailable { source, reason } => {
                write!(f, "{source} source unavailable ({reason})")
            }
            Self::NoResults => f.write_str("no results from any source"),
            Self::ExpansionFailed { reason } => write!(f, "query expansion failed: {reason}"),
            Self::CompressionTimeout { items_truncated } => write!(
                f,
                "compression budget expired; {items_truncated} item(s) truncated instead"
            ),
            Self::CompressionFailed { reason } => write!(f, "compression fell back: {reason}"),
            Self::BudgetExceededUnrecoverable {
                dropped_items,
                budget_tokens,
            } => write!(
                f,
                "{dropped_items} item(s) dropped to fit {budget_tokens} tokens"
            ),
            Self::Cancelled => f.write_str("request cancelled; partial context returned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collaborator_errors_map_to_degraded_reasons() {
        assert_eq!(
            DegradedReason::from(CollaboratorError::CircuitOpen),
            DegradedReason::CircuitOpen
        );
        assert_eq!(
            DegradedReason::from(CollaboratorError::Timeout(Duration::from_millis(1500))),
            DegradedReason::TimedOut { after_ms: 1500 }
        );
        assert!(matches!(
            DegradedReason::from(CollaboratorError::Unavailable("503".into())),
            DegradedReason::Failed(msg) if msg.contains("503")
        ));
    }

    #[test]
    fn degradations_serialize_with_kind_tag() {
        let value = serde_json::to_value(Degradation::SourceUnavailable {
            source: SourceType::Web,
            reason: DegradedReason::CircuitOpen,
        })
        .unwrap();
        assert_eq!(value["kind"], "source_unavailable");
        assert_eq!(value["source"], "web");
    }
}
