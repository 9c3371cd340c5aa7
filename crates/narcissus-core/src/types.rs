use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one workflow run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One result returned by the search service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    /// URL or other origin of the content.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl SearchHit {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            title: None,
        }
    }
}

/// Events published on the [`EventBus`](crate::event::EventBus) while a run executes.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Run started.
    RunStarted { run_id: RunId },
    /// A step picked up an event.
    StepStarted {
        run_id: RunId,
        step: String,
        kind: String,
    },
    /// A step returned events.
    StepFinished {
        run_id: RunId,
        step: String,
        emitted: Vec<String>,
        elapsed_ms: u64,
    },
    /// A step is waiting on a barrier.
    BarrierWaiting { run_id: RunId, step: String },
    /// Run reached the stop event.
    RunComplete {
        run_id: RunId,
        dispatched: usize,
        elapsed_ms: u64,
    },
    /// Run aborted.
    RunFailed { run_id: RunId, error: String },
}
