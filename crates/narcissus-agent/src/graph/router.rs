use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use narcissus_core::error::{NarcissusError, Result};
use narcissus_core::event::EventBus;
use narcissus_core::types::{RunEvent, RunId};

use super::context::Context;
use super::event::Event;
use super::pool::WorkerPool;
use super::step::{Step, StepOutput};
use super::workflow::Workflow;

/// Outcome of a run that reached the terminal event.
#[derive(Debug)]
pub(crate) struct Finished<O> {
    pub output: O,
    pub dispatched: usize,
}

/// One step invocation, as reported back by its task.
struct Completed<E> {
    index: usize,
    elapsed_ms: u64,
    result: Result<StepOutput<E>>,
}

/// Per-run dispatcher.
///
/// Owns the event queue and every in-flight step invocation. Dropping the
/// router aborts all of them.
pub(crate) struct Router<'a, E: Event> {
    workflow: &'a Workflow<E>,
    ctx: Context,
    pools: Vec<WorkerPool>,
    queue: VecDeque<E>,
    tasks: JoinSet<Completed<E>>,
    bus: Arc<EventBus>,
    run_id: RunId,
    verbose: bool,
    dispatched: usize,
}

impl<'a, E: Event> Router<'a, E> {
    pub fn new(
        workflow: &'a Workflow<E>,
        ctx: Context,
        bus: Arc<EventBus>,
        run_id: RunId,
        verbose: bool,
    ) -> Self {
        Self {
            workflow,
            ctx,
            pools: workflow.pools(),
            queue: VecDeque::new(),
            tasks: JoinSet::new(),
            bus,
            run_id,
            verbose,
            dispatched: 0,
        }
    }

    /// Run from `seed` until the terminal event is dequeued.
    pub async fn drive(mut self, seed: E) -> Result<Finished<E::Output>> {
        self.queue.push_back(seed);

        loop {
            while let Some(event) = self.queue.pop_front() {
                match event.into_output() {
                    Ok(output) => {
                        self.tasks.abort_all();
                        return Ok(Finished {
                            output,
                            dispatched: self.dispatched,
                        });
                    }
                    Err(event) => self.dispatch(event)?,
                }
            }

            let Some(joined) = self.tasks.join_next().await else {
                return Err(NarcissusError::Stalled);
            };
            let completed = joined.map_err(|e| NarcissusError::StepPanicked {
                step: "<task>".to_string(),
                message: e.to_string(),
            })?;
            self.complete(completed)?;
        }
    }

    fn dispatch(&mut self, event: E) -> Result<()> {
        let kind = event.kind();
        let workflow = self.workflow;
        let targets = workflow.routes(kind);
        if targets.is_empty() {
            return Err(NarcissusError::Unrouted(kind.to_string()));
        }

        for &index in targets {
            let step = Arc::clone(workflow.step(index));
            self.dispatched += 1;
            if self.verbose {
                info!(run_id = %self.run_id, step = %step.name(), kind = %kind, "Dispatching event");
            } else {
                debug!(run_id = %self.run_id, step = %step.name(), kind = %kind, "Dispatching event");
            }

            self.tasks.spawn(invoke(
                index,
                step,
                self.pools[index].clone(),
                self.ctx.clone(),
                event.clone(),
                self.bus.clone(),
                self.run_id.clone(),
            ));
        }
        Ok(())
    }

    fn complete(&mut self, done: Completed<E>) -> Result<()> {
        let workflow = self.workflow;
        let step = workflow.step(done.index);

        let output = match done.result {
            Ok(output) => output,
            Err(e) => {
                error!(run_id = %self.run_id, step = %step.name(), error = %e, "Step failed");
                return Err(e);
            }
        };

        match output {
            StepOutput::Pending => {
                debug!(run_id = %self.run_id, step = %step.name(), "Waiting on barrier");
                self.bus.publish(RunEvent::BarrierWaiting {
                    run_id: self.run_id.clone(),
                    step: step.name().to_string(),
                });
            }
            StepOutput::Emit(events) => {
                let mut emitted = Vec::with_capacity(events.len());
                for event in events {
                    let kind = event.kind();
                    if !step.emits().contains(&kind) {
                        return Err(NarcissusError::UndeclaredEmit {
                            step: step.name().to_string(),
                            kind: kind.to_string(),
                        });
                    }
                    emitted.push(kind.to_string());
                    self.queue.push_back(event);
                }
                debug!(
                    run_id = %self.run_id,
                    step = %step.name(),
                    emitted = emitted.len(),
                    elapsed_ms = done.elapsed_ms,
                    "Step finished"
                );
                self.bus.publish(RunEvent::StepFinished {
                    run_id: self.run_id.clone(),
                    step: step.name().to_string(),
                    emitted,
                    elapsed_ms: done.elapsed_ms,
                });
            }
        }
        Ok(())
    }
}

/// Body of one step task: wait for a worker, then run the handler.
async fn invoke<E: Event>(
    index: usize,
    step: Arc<dyn Step<E>>,
    pool: WorkerPool,
    ctx: Context,
    event: E,
    bus: Arc<EventBus>,
    run_id: RunId,
) -> Completed<E> {
    let permit = match pool.acquire().await {
        Ok(permit) => permit,
        Err(e) => {
            return Completed {
                index,
                elapsed_ms: 0,
                result: Err(e),
            }
        }
    };

    bus.publish(RunEvent::StepStarted {
        run_id,
        step: step.name().to_string(),
        kind: event.kind().to_string(),
    });

    let started = Instant::now();
    let handled = AssertUnwindSafe(async { step.handle(ctx, event).await })
        .catch_unwind()
        .await;
    drop(permit);

    let result = match handled {
        Ok(result) => result,
        Err(payload) => Err(NarcissusError::StepPanicked {
            step: step.name().to_string(),
            message: panic_message(payload.as_ref()),
        }),
    };

    Completed {
        index,
        elapsed_ms: started.elapsed().as_millis() as u64,
        result,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }
}
