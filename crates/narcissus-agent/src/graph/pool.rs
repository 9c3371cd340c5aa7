use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use narcissus_core::error::{NarcissusError, Result};

/// Bounded set of workers for one step.
///
/// Each invocation holds a permit for as long as it runs; invocations past
/// `size` wait for a permit to be released.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    step: String,
    size: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(step: impl Into<String>, size: usize) -> Self {
        Self {
            step: step.into(),
            size,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free worker.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| NarcissusError::Cancelled)
    }
}
