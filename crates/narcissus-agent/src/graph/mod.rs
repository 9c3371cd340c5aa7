//! Event-driven step engine.
//!
//! A workflow is a set of `Step`s, each bound to the event kinds it accepts.
//! The router keeps a queue of pending events and hands each one to every
//! step registered for its kind. Steps read and write a per-run `Context`
//! and return further events. A step with more than one worker runs its
//! invocations concurrently through a bounded `WorkerPool`; a `Collector`
//! joins a variable number of those results before the graph moves on.
//!
//! The `Supervisor` drives one run from a seed event to the terminal event
//! under a wall-clock timeout.

pub mod collector;
pub mod context;
pub mod diagram;
pub mod event;
pub mod pool;
pub mod router;
pub mod step;
pub mod supervisor;
pub mod workflow;

pub use collector::{Barrier, Collector};
pub use context::Context;
pub use diagram::render_mermaid;
pub use event::Event;
pub use pool::WorkerPool;
pub use step::{Step, StepOutput};
pub use supervisor::{RunReport, RunSettings, Supervisor};
pub use workflow::{StepInfo, Workflow, WorkflowBuilder};
