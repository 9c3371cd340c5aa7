use futures::future::BoxFuture;

use narcissus_core::error::Result;

use super::context::Context;
use super::event::Event;

/// What a step hands back to the router.
#[derive(Debug)]
pub enum StepOutput<E> {
    /// Events to queue next. Empty means this branch intentionally ends here.
    Emit(Vec<E>),
    /// A barrier is still waiting for more inputs; nothing to queue yet.
    Pending,
}

impl<E> StepOutput<E> {
    pub fn one(event: E) -> Self {
        Self::Emit(vec![event])
    }

    pub fn many(events: Vec<E>) -> Self {
        Self::Emit(events)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// A named unit of work bound to one or more event kinds.
pub trait Step<E: Event>: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Kinds this step is dispatched for.
    fn accepts(&self) -> &[E::Kind];

    /// Kinds this step may return. Returning anything else fails the run.
    fn emits(&self) -> &[E::Kind];

    /// Invocations allowed in flight at once. 1 means no fan-out.
    fn workers(&self) -> usize {
        1
    }

    fn handle(&self, ctx: Context, event: E) -> BoxFuture<'_, Result<StepOutput<E>>>;
}
