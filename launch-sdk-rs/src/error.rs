use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised while driving an agent turn.
///
/// `Upstream` covers everything that crossed the process boundary (model,
/// embedding backend, persistent memory). `MalformedResponse` is reserved for
/// our own parsing of a result that is missing expected pieces.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("agent stopped after {0} iterations without a final answer")]
    MaxIterations(usize),

    #[error("turn cancelled")]
    Cancelled,

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),
}

/// Coarse classification surfaced to callers of a soft-failed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Upstream,
    MalformedResponse,
    Cancelled,
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            AgentError::Cancelled => ErrorKind::Cancelled,
            AgentError::Upstream(_) | AgentError::MaxIterations(_) | AgentError::Memory(_) => {
                ErrorKind::Upstream
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("memory serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding backend error: {0}")]
    Embedding(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),
}

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("version '{0}' not found")]
    NotFound(String),

    #[error("version io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("version serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("score must be between 1 and 5, got {0}")]
    InvalidScore(i64),

    #[error("run_id must not be empty")]
    EmptyRunId,

    #[error("feedback io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("feedback serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error(transparent)]
    Model(#[from] AgentError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_separates_parsing_from_upstream() {
        assert_eq!(
            AgentError::Upstream("timeout".into()).kind(),
            ErrorKind::Upstream
        );
        assert_eq!(
            AgentError::MalformedResponse("no output".into()).kind(),
            ErrorKind::MalformedResponse
        );
        assert_eq!(AgentError::MaxIterations(5).kind(), ErrorKind::Upstream);
        assert_eq!(AgentError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::MalformedResponse).unwrap();
        assert_eq!(json, "\"malformed_response\"");
    }
}
