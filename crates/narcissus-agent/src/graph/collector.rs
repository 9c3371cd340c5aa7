use serde::{Deserialize, Serialize};

use narcissus_core::error::{NarcissusError, Result};

use super::context::Context;

/// State of a collector after opening a batch or recording an arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    /// More arrivals are needed.
    Waiting { received: usize, expected: usize },
    /// The batch is complete and has been closed.
    Released,
}

impl Barrier {
    pub fn is_released(&self) -> bool {
        matches!(self, Self::Released)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Batch {
    expected: usize,
    received: usize,
}

/// Join point that waits for a fixed number of arrivals per batch.
///
/// Batch bookkeeping lives in the run's [`Context`], so one collector value
/// can serve any number of runs. Arrival order does not matter; only the
/// count does. One batch may be open at a time.
#[derive(Debug, Clone)]
pub struct Collector {
    key: String,
}

impl Collector {
    pub fn new(name: &str) -> Self {
        Self {
            key: format!("__collector.{}", name),
        }
    }

    /// Start a batch that releases after `expected` arrivals.
    ///
    /// An empty batch is released at once: nothing will ever arrive for it.
    pub async fn open(&self, ctx: &Context, expected: usize) -> Result<Barrier> {
        let key = self.key.clone();
        ctx.update(move |data| {
            if data.contains_key(&key) {
                return Err(NarcissusError::Barrier(format!(
                    "{}: batch opened while another is still waiting",
                    key
                )));
            }
            if expected == 0 {
                return Ok(Barrier::Released);
            }
            let batch = Batch {
                expected,
                received: 0,
            };
            data.insert(key, serde_json::to_value(batch)?);
            Ok(Barrier::Waiting {
                received: 0,
                expected,
            })
        })
        .await
    }

    /// Record one arrival for the open batch.
    pub async fn arrive(&self, ctx: &Context) -> Result<Barrier> {
        let key = self.key.clone();
        ctx.update(move |data| {
            let value = data.remove(&key).ok_or_else(|| {
                NarcissusError::Barrier(format!("{}: arrival with no open batch", key))
            })?;
            let mut batch: Batch = serde_json::from_value(value)?;
            batch.received += 1;

            if batch.received >= batch.expected {
                return Ok(Barrier::Released);
            }

            let state = Barrier::Waiting {
                received: batch.received,
                expected: batch.expected,
            };
            data.insert(key, serde_json::to_value(batch)?);
            Ok(state)
        })
        .await
    }

    /// Whether a batch is currently waiting.
    pub async fn is_open(&self, ctx: &Context) -> bool {
        ctx.contains(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_releases_after_expected_arrivals() {
        let ctx = Context::new();
        let collector = Collector::new("research");

        assert_eq!(
            collector.open(&ctx, 3).await.unwrap(),
            Barrier::Waiting {
                received: 0,
                expected: 3
            }
        );
        assert!(!collector.arrive(&ctx).await.unwrap().is_released());
        assert!(!collector.arrive(&ctx).await.unwrap().is_released());
        assert!(collector.is_open(&ctx).await);
        assert_eq!(collector.arrive(&ctx).await.unwrap(), Barrier::Released);
        assert!(!collector.is_open(&ctx).await);
    }

    #[tokio::test]
    async fn test_empty_batch_releases_immediately() {
        let ctx = Context::new();
        let collector = Collector::new("research");
        assert_eq!(collector.open(&ctx, 0).await.unwrap(), Barrier::Released);
        assert!(!collector.is_open(&ctx).await);
    }

    #[tokio::test]
    async fn test_arrival_without_batch() {
        let ctx = Context::new();
        let collector = Collector::new("research");
        assert!(matches!(
            collector.arrive(&ctx).await,
            Err(NarcissusError::Barrier(_))
        ));
    }

    #[tokio::test]
    async fn test_second_open_while_waiting() {
        let ctx = Context::new();
        let collector = Collector::new("research");
        collector.open(&ctx, 2).await.unwrap();
        assert!(collector.open(&ctx, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_batches_reset_between_rounds() {
        let ctx = Context::new();
        let collector = Collector::new("research");

        collector.open(&ctx, 1).await.unwrap();
        assert!(collector.arrive(&ctx).await.unwrap().is_released());

        collector.open(&ctx, 2).await.unwrap();
        assert!(!collector.arrive(&ctx).await.unwrap().is_released());
        assert!(collector.arrive(&ctx).await.unwrap().is_released());
    }

    #[tokio::test]
    async fn test_collectors_are_independent() {
        let ctx = Context::new();
        let a = Collector::new("a");
        let b = Collector::new("b");
        a.open(&ctx, 1).await.unwrap();
        b.open(&ctx, 1).await.unwrap();
        assert!(a.arrive(&ctx).await.unwrap().is_released());
        assert!(b.is_open(&ctx).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_arrivals_release_exactly_once() {
        let ctx = Context::new();
        let collector = Collector::new("fan");
        collector.open(&ctx, 16).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ctx = ctx.clone();
            let collector = collector.clone();
            handles.push(tokio::spawn(async move { collector.arrive(&ctx).await.unwrap() }));
        }

        let mut released = 0;
        for handle in handles {
            if handle.await.unwrap().is_released() {
                released += 1;
            }
        }
        assert_eq!(released, 1);
    }
}
