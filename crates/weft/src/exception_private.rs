//! Internal error and control-flow channel for the evaluator.
//!
//! Two things travel upward out of a `try`: real errors ([`RunError`], which
//! unwind to the nearest `call` boundary and surface as
//! [`crate::exception_public::Exception`]), and the non-local exit used by
//! the capturing combinators ([`Unwind::Exit`]). The exit is control flow,
//! not an error: it carries a token minted by the raising combinator, and
//! only the frame holding that token may catch it. Plain backtracking
//! failures are `Ok(false)` and never appear on this channel.

use crate::{
    bindings::{DynamicState, Trail},
    exception_public::{ExcKind, StackFrame},
};

/// Result alias for operations that can raise a runtime error but not a
/// non-local exit.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// Result alias for the continuation-passing `try` signatures.
pub(crate) type Exec<T> = Result<T, Unwind>;

/// A runtime error with the stack-trace data captured at the raise site.
#[derive(Debug)]
pub(crate) struct RunError {
    pub kind: ExcKind,
    pub message: String,
    pub frames: Vec<StackFrame>,
}

impl RunError {
    /// An error raised outside any evaluation (no frames to capture).
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            frames: Vec::new(),
        }
    }
}

/// What unwinds out of a step.
#[derive(Debug)]
pub(crate) enum Unwind {
    /// A real error on its way to the `call` boundary.
    Error(RunError),
    /// A combinator's captured first solution on its way back to the
    /// combinator that requested it. Escaping past that combinator is an
    /// engine bug, checked at the `call` boundary.
    Exit(ExitPayload),
}

impl From<RunError> for Unwind {
    fn from(error: RunError) -> Self {
        Self::Error(error)
    }
}

/// Identifies one combinator invocation; fresh per invocation so nested
/// combinators of the same kind cannot catch each other's exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExitToken(pub(crate) u64);

/// The solution state captured at the moment of the body's first success.
/// The output tokens stay in the buffer (error unwinding skips the
/// truncate-on-failure path), so only the bindings ride along.
#[derive(Debug)]
pub(crate) struct ExitPayload {
    pub token: ExitToken,
    pub trail: Trail,
    pub state: DynamicState,
}
