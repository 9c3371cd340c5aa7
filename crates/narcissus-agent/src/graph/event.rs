use std::fmt;
use std::hash::Hash;

/// A value passed between steps.
///
/// Implementors are closed enums: `Kind` is the fieldless mirror used for
/// routing, and exactly one kind (`STOP`) ends the run and carries its result.
pub trait Event: Clone + Send + Sync + fmt::Debug + 'static {
    type Kind: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;
    type Output: Send + 'static;

    /// The terminal kind.
    const STOP: Self::Kind;

    fn kind(&self) -> Self::Kind;

    /// Unwrap the run result from a terminal event, or hand the event back.
    fn into_output(self) -> Result<Self::Output, Self>;
}
