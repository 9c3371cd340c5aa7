use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NarcissusError {
    // Context errors
    #[error("Context key not found: {0}")]
    MissingKey(String),

    #[error("Context key '{key}' is not {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    // Collaborator errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    #[error("Search failed for query '{query}': {message}")]
    Search { query: String, message: String },

    // Run errors
    #[error("Workflow timed out after {0:?}")]
    Timeout(Duration),

    #[error("Workflow cancelled")]
    Cancelled,

    #[error("Workflow stalled: no pending events and no stop event")]
    Stalled,

    // Engine errors
    #[error("No step accepts event kind: {0}")]
    Unrouted(String),

    #[error("Step '{step}' emitted undeclared event kind: {kind}")]
    UndeclaredEmit { step: String, kind: String },

    #[error("Step '{step}' panicked: {message}")]
    StepPanicked { step: String, message: String },

    #[error("Barrier error: {0}")]
    Barrier(String),

    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(String),

    #[error("Prompt template error: {0}")]
    Template(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NarcissusError {
    /// True for failures raised by the completion, prediction or search services.
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            Self::LlmRequest(_) | Self::LlmParse(_) | Self::Search { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, NarcissusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_grouping() {
        assert!(NarcissusError::LlmRequest("500".into()).is_collaborator_failure());
        assert!(NarcissusError::Search {
            query: "q".into(),
            message: "boom".into()
        }
        .is_collaborator_failure());
        assert!(!NarcissusError::MissingKey("plan".into()).is_collaborator_failure());
        assert!(!NarcissusError::Timeout(Duration::from_secs(1)).is_collaborator_failure());
    }

    #[test]
    fn test_display() {
        let e = NarcissusError::UndeclaredEmit {
            step: "plan".into(),
            kind: "stop".into(),
        };
        assert_eq!(e.to_string(), "Step 'plan' emitted undeclared event kind: stop");
    }
}
