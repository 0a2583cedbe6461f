//! Public error surface: [`Exception`], its kind, and stack frames.

use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

use crate::exception_private::RunError;

/// The distinct error kinds the engine can raise.
///
/// These are errors, not failures: a task running out of methods drives
/// backtracking and is reported as data (`(None, State::empty())`), while an
/// `Exception` of one of these kinds unwinds to the `call` boundary.
///
/// Uses strum derives so the string form matches the variant name exactly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, serde::Serialize, serde::Deserialize,
)]
pub enum ExcKind {
    /// The source text could not be tokenised or parsed.
    SyntaxError,
    /// A state-variable lookup found no binding and no hook supplied one.
    UndefinedVariable,
    /// Argument count mismatch at a call site or at method-addition time.
    ArgumentCount,
    /// A primitive or combinator received a wrong-typed argument.
    ArgumentType,
    /// A primitive required a ground value but received an unbound variable.
    ArgumentInstantiation,
    /// A must-succeed compound task exhausted its methods with zero successes.
    CallFailed,
    /// A user program raised via the `Throw` primitive.
    Thrown,
}

/// One source-level activation in an error's stack trace.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StackFrame {
    /// Task name of the activated method.
    pub task: String,
    /// Arguments as resolved at call time, rendered.
    pub args: Vec<String>,
    /// Source path of the method definition, when it came from a file.
    pub path: Option<String>,
    /// Source line of the method definition.
    pub line: Option<u32>,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.task)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        if let Some(path) = &self.path {
            write!(f, " ({path}")?;
            if let Some(line) = self.line {
                write!(f, ":{line}")?;
            }
            write!(f, ")")?;
        } else if let Some(line) = self.line {
            write!(f, " (line {line})")?;
        }
        Ok(())
    }
}

/// An error raised during parsing or evaluation.
///
/// Carries the method activations live at the raise site, innermost first.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Exception {
    pub kind: ExcKind,
    pub message: String,
    pub frames: Vec<StackFrame>,
}

impl Exception {
    /// An exception with no frames; hosts use this to raise from primitives.
    #[must_use]
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            frames: Vec::new(),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        for frame in &self.frames {
            write!(f, "\n  in {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Exception {}

impl From<RunError> for Exception {
    fn from(error: RunError) -> Self {
        Self {
            kind: error.kind,
            message: error.message,
            frames: error.frames,
        }
    }
}
