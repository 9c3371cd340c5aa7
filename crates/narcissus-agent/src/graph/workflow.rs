use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use narcissus_core::error::{NarcissusError, Result};

use super::event::Event;
use super::pool::WorkerPool;
use super::step::Step;

/// Registry of steps and the event kinds routed to each.
///
/// Immutable once built; every run gets its own context and worker pools.
pub struct Workflow<E: Event> {
    steps: Vec<Arc<dyn Step<E>>>,
    routes: HashMap<E::Kind, Vec<usize>>,
}

/// Read-only description of one registered step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepInfo<K> {
    pub name: String,
    pub accepts: Vec<K>,
    pub emits: Vec<K>,
    pub workers: usize,
}

impl<E: Event> Workflow<E> {
    pub fn builder() -> WorkflowBuilder<E> {
        WorkflowBuilder::new()
    }

    /// Indices of the steps registered for `kind`, in registration order.
    pub(crate) fn routes(&self, kind: E::Kind) -> &[usize] {
        self.routes.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn step(&self, index: usize) -> &Arc<dyn Step<E>> {
        &self.steps[index]
    }

    /// Fresh worker pools for one run, indexed like the steps.
    pub(crate) fn pools(&self) -> Vec<WorkerPool> {
        self.steps
            .iter()
            .map(|s| WorkerPool::new(s.name(), s.workers()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Describe every step in registration order.
    pub fn describe(&self) -> Vec<StepInfo<E::Kind>> {
        self.steps
            .iter()
            .map(|s| StepInfo {
                name: s.name().to_string(),
                accepts: s.accepts().to_vec(),
                emits: s.emits().to_vec(),
                workers: s.workers(),
            })
            .collect()
    }
}

/// Collects steps and validates the graph they form.
pub struct WorkflowBuilder<E: Event> {
    steps: Vec<Arc<dyn Step<E>>>,
}

impl<E: Event> Default for WorkflowBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> WorkflowBuilder<E> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Register a step.
    pub fn step(mut self, step: impl Step<E>) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Validate and build the workflow.
    ///
    /// Rejects duplicate step names, zero-sized worker pools, steps that
    /// accept nothing, and declared emitted kinds that no step accepts
    /// (other than the terminal kind).
    pub fn build(self) -> Result<Workflow<E>> {
        let mut names = HashSet::new();
        let mut routes: HashMap<E::Kind, Vec<usize>> = HashMap::new();

        for (index, step) in self.steps.iter().enumerate() {
            if !names.insert(step.name().to_string()) {
                return Err(NarcissusError::InvalidGraph(format!(
                    "duplicate step name '{}'",
                    step.name()
                )));
            }
            if step.workers() == 0 {
                return Err(NarcissusError::InvalidGraph(format!(
                    "step '{}' has no workers",
                    step.name()
                )));
            }
            if step.accepts().is_empty() {
                return Err(NarcissusError::InvalidGraph(format!(
                    "step '{}' accepts no events",
                    step.name()
                )));
            }
            for kind in step.accepts() {
                routes.entry(*kind).or_default().push(index);
            }
        }

        for step in &self.steps {
            for kind in step.emits() {
                if *kind != E::STOP && !routes.contains_key(kind) {
                    return Err(NarcissusError::InvalidGraph(format!(
                        "step '{}' emits '{}' but no step accepts it",
                        step.name(),
                        kind
                    )));
                }
            }
        }

        Ok(Workflow {
            steps: self.steps,
            routes,
        })
    }
}
