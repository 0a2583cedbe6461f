//! Execution tracing for the proof search.
//!
//! Trait-based with a zero-cost default: the evaluator is generic over
//! `T: Tracer`, so with [`NoopTracer`] every hook monomorphises to nothing.
//! Hooks fire at the method and call level:
//!
//! | Event | When |
//! |-------|------|
//! | `enter` | a method's pattern matched and its body is about to run |
//! | `succeed` | a method body reached its success continuation |
//! | `method_fail` | a method body exhausted its alternatives |
//! | `call_fail` | a task exhausted all of its methods |
//!
//! Tracing is diagnostics only; proof-search correctness never depends on it.

/// One recorded trace event. Produced by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A method of `task` matched and was entered.
    Enter { task: String },
    /// A method of `task` succeeded.
    Succeed { task: String },
    /// A method of `task` failed after matching.
    MethodFail { task: String },
    /// `task` ran out of methods without an accepted solution.
    CallFail { task: String },
}

/// Hook points for observing an evaluation.
///
/// All methods default to no-ops, so implementations only override what they
/// care about.
pub trait Tracer {
    fn enter(&mut self, task: &str) {
        let _ = task;
    }

    fn succeed(&mut self, task: &str) {
        let _ = task;
    }

    fn method_fail(&mut self, task: &str) {
        let _ = task;
    }

    fn call_fail(&mut self, task: &str) {
        let _ = task;
    }
}

/// Production default: all hooks compile away.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

/// Human-readable execution log on stderr, indented by call depth.
#[derive(Debug, Default)]
pub struct StderrTracer {
    depth: usize,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn indent(&self) -> String {
        "  ".repeat(self.depth)
    }
}

impl Tracer for StderrTracer {
    fn enter(&mut self, task: &str) {
        eprintln!("{}enter {task}", self.indent());
        self.depth += 1;
    }

    fn succeed(&mut self, task: &str) {
        self.depth = self.depth.saturating_sub(1);
        eprintln!("{}succeed {task}", self.indent());
    }

    fn method_fail(&mut self, task: &str) {
        self.depth = self.depth.saturating_sub(1);
        eprintln!("{}fail {task}", self.indent());
    }

    fn call_fail(&mut self, task: &str) {
        eprintln!("{}no methods left for {task}", self.indent());
    }
}

/// Captures every event for post-mortem assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    pub events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `task` was entered.
    #[must_use]
    pub fn enters(&self, task: &str) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, TraceEvent::Enter { task: t } if t == task))
            .count()
    }
}

impl Tracer for RecordingTracer {
    fn enter(&mut self, task: &str) {
        self.events.push(TraceEvent::Enter { task: task.to_owned() });
    }

    fn succeed(&mut self, task: &str) {
        self.events.push(TraceEvent::Succeed { task: task.to_owned() });
    }

    fn method_fail(&mut self, task: &str) {
        self.events.push(TraceEvent::MethodFail { task: task.to_owned() });
    }

    fn call_fail(&mut self, task: &str) {
        self.events.push(TraceEvent::CallFail { task: task.to_owned() });
    }
}
