use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use narcissus_core::config::WorkflowConfig;
use narcissus_core::error::{NarcissusError, Result};
use narcissus_core::event::EventBus;
use narcissus_core::types::{RunEvent, RunId};

use super::context::Context;
use super::event::Event;
use super::router::Router;
use super::workflow::Workflow;

/// Limits applied to every run of a supervisor.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub timeout: Duration,
    /// Log each dispatch at info instead of debug.
    pub verbose: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            verbose: false,
        }
    }
}

impl From<&WorkflowConfig> for RunSettings {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            timeout: config.timeout(),
            verbose: config.verbose,
        }
    }
}

/// Result of a run that reached the terminal event.
#[derive(Debug, Clone)]
pub struct RunReport<O> {
    pub run_id: RunId,
    /// Payload of the terminal event.
    pub output: O,
    /// Final contents of the run's context.
    pub context: HashMap<String, Value>,
    /// Step invocations dispatched, fan-out included.
    pub dispatched: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Drives workflow runs from a seed event to the terminal event.
pub struct Supervisor {
    settings: RunSettings,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(settings: RunSettings, bus: Arc<EventBus>) -> Self {
        Self {
            settings,
            bus,
            cancel: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Token that aborts every run of this supervisor, current and later ones.
    ///
    /// To cancel a single run, pass a token to [`run_with_cancel`](Self::run_with_cancel).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute one run of `workflow` starting with `seed`.
    pub async fn run<E: Event>(
        &self,
        workflow: &Workflow<E>,
        seed: E,
    ) -> Result<RunReport<E::Output>> {
        self.run_with_cancel(workflow, seed, CancellationToken::new())
            .await
    }

    /// Execute one run that also stops when `cancel` fires.
    ///
    /// Each run gets a fresh context and fresh worker pools. When the timeout
    /// elapses or either token is cancelled, every in-flight step is aborted
    /// and no partial result is returned. Cancelling `cancel` leaves later
    /// runs unaffected.
    pub async fn run_with_cancel<E: Event>(
        &self,
        workflow: &Workflow<E>,
        seed: E,
        cancel: CancellationToken,
    ) -> Result<RunReport<E::Output>> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let clock = Instant::now();
        let ctx = Context::new();
        let token = self.cancel.child_token();

        info!(
            run_id = %run_id,
            steps = workflow.len(),
            timeout_secs = self.settings.timeout.as_secs(),
            "Workflow run started"
        );
        self.bus.publish(RunEvent::RunStarted {
            run_id: run_id.clone(),
        });

        let router = Router::new(
            workflow,
            ctx.clone(),
            self.bus.clone(),
            run_id.clone(),
            self.settings.verbose,
        );

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(NarcissusError::Cancelled),
            _ = cancel.cancelled() => Err(NarcissusError::Cancelled),
            result = tokio::time::timeout(self.settings.timeout, router.drive(seed)) => {
                match result {
                    Ok(finished) => finished,
                    Err(_) => Err(NarcissusError::Timeout(self.settings.timeout)),
                }
            }
        };

        let elapsed = clock.elapsed();
        match outcome {
            Ok(finished) => {
                info!(
                    run_id = %run_id,
                    dispatched = finished.dispatched,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Workflow run complete"
                );
                self.bus.publish(RunEvent::RunComplete {
                    run_id: run_id.clone(),
                    dispatched: finished.dispatched,
                    elapsed_ms: elapsed.as_millis() as u64,
                });
                Ok(RunReport {
                    run_id,
                    output: finished.output,
                    context: ctx.snapshot().await,
                    dispatched: finished.dispatched,
                    started_at,
                    elapsed,
                })
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Workflow run failed");
                self.bus.publish(RunEvent::RunFailed {
                    run_id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }
}
