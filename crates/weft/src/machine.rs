//! Per-evaluation state: output buffer, frame arena, RNG, serial counters.
//!
//! One [`Machine`] lives for one top-level call. It owns everything the old
//! search would have kept in globals - in particular the current-frame
//! pointer is per-evaluation here, threaded for diagnostics only.

use std::rc::Rc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::{
    bindings::{DynamicState, Trail},
    exception_private::{Exec, ExitToken, RunError, Unwind},
    exception_public::{ExcKind, StackFrame},
    intern::StateVarId,
    module::Module,
    output::OutputBuffer,
    term::{LogicVar, Term},
    tracer::Tracer,
    unify::copy_term,
};

/// Index into the machine's frame arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameId(u32);

/// One active (or completed) method activation, kept for stack traces.
#[derive(Debug)]
pub(crate) struct Frame {
    pub task: StateVarId,
    /// Arguments as passed, resolved one level against the call-time trail.
    pub args: Vec<Term>,
    pub predecessor: Option<FrameId>,
    pub path: Option<Rc<str>>,
    pub line: Option<u32>,
    /// The trail as of the frame's entry, refreshed when it succeeds or
    /// fails; stack traces render arguments against it.
    pub bindings: Trail,
}

/// The success continuation threaded through every step.
///
/// Invoking it is the only way a step reports success; the `bool` it returns
/// is whether the rest of the computation accepted the solution. The output
/// buffer rides inside the machine.
pub(crate) type Cont<'c, 'm, Tr> =
    &'c mut dyn FnMut(&mut Machine<'m, Tr>, Trail, DynamicState) -> Exec<bool>;

/// The binding environment handle passed by value between steps.
///
/// Cloning is cheap: two `Rc` list handles, an `Rc` slice, and a frame index.
/// Because both lists are persistent, a continuation may retain an older
/// environment while newer ones extend it.
#[derive(Debug, Clone)]
pub(crate) struct Env {
    /// Local logic-variable bindings along the current search path.
    pub trail: Trail,
    /// State-variable bindings made during this call.
    pub state: DynamicState,
    /// The enclosing method activation's fresh local variables.
    pub locals: Rc<[LogicVar]>,
    /// The enclosing activation, for diagnostics.
    pub frame: Option<FrameId>,
}

impl Env {
    pub fn root(state: DynamicState) -> Self {
        Self {
            trail: Trail::empty(),
            state,
            locals: Rc::from(Vec::new()),
            frame: None,
        }
    }

    /// Same scope, new bindings - what a continuation reconstructs when
    /// control returns to it from a callee.
    pub fn with_bindings(&self, trail: Trail, state: DynamicState) -> Self {
        Self {
            trail,
            state,
            locals: self.locals.clone(),
            frame: self.frame,
        }
    }

    pub fn with_trail(&self, trail: Trail) -> Self {
        Self {
            trail,
            state: self.state.clone(),
            locals: self.locals.clone(),
            frame: self.frame,
        }
    }

    pub fn with_state(&self, state: DynamicState) -> Self {
        Self {
            trail: self.trail.clone(),
            state,
            locals: self.locals.clone(),
            frame: self.frame,
        }
    }
}

/// Everything one evaluation owns.
pub(crate) struct Machine<'m, Tr: Tracer> {
    pub module: &'m Module,
    pub buffer: OutputBuffer,
    pub tracer: &'m mut Tr,
    frames: Vec<Frame>,
    /// The innermost live activation; diagnostics only.
    pub current: Option<FrameId>,
    next_serial: u64,
    next_token: u64,
    pub rng: ChaCha8Rng,
}

impl<'m, Tr: Tracer> Machine<'m, Tr> {
    pub fn new(module: &'m Module, tracer: &'m mut Tr) -> Self {
        let rng = match module.shuffle_seed() {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            module,
            buffer: OutputBuffer::new(),
            tracer,
            frames: Vec::new(),
            current: None,
            next_serial: 0,
            next_token: 0,
            rng,
        }
    }

    /// Allocates a logic variable with a fresh identity.
    pub fn fresh_var(&mut self, name: Option<Rc<str>>) -> LogicVar {
        let serial = self.next_serial;
        self.next_serial += 1;
        LogicVar::fresh(name, serial)
    }

    /// Resolves a state variable: call-local dynamic bindings first, then the
    /// module dictionary with its parent chain, hooks, and defaults.
    pub fn lookup_state(&self, id: StateVarId, env: &Env) -> Option<Term> {
        env.state
            .lookup(&id)
            .cloned()
            .or_else(|| self.module.lookup(id))
    }

    /// Mints the token for one combinator invocation.
    pub fn exit_token(&mut self) -> ExitToken {
        let token = ExitToken(self.next_token);
        self.next_token += 1;
        token
    }

    pub fn push_frame(
        &mut self,
        task: StateVarId,
        args: Vec<Term>,
        bindings: Trail,
        predecessor: Option<FrameId>,
        path: Option<Rc<str>>,
        line: Option<u32>,
    ) -> FrameId {
        let id = FrameId(u32::try_from(self.frames.len()).expect("frame arena overflow"));
        self.frames.push(Frame {
            task,
            args,
            predecessor,
            path,
            line,
            bindings,
        });
        id
    }

    pub fn record_frame_exit(&mut self, frame: FrameId, trail: Trail) {
        self.frames[frame.0 as usize].bindings = trail;
    }

    /// Reconstructs the source-level stack, innermost first, from the
    /// current frame pointer.
    pub fn stack_trace(&self) -> Vec<StackFrame> {
        let interner = self.module.interner();
        let mut frames = Vec::new();
        let mut cursor = self.current;
        while let Some(id) = cursor {
            let frame = &self.frames[id.0 as usize];
            frames.push(StackFrame {
                task: interner.name(frame.task).to_string(),
                args: frame
                    .args
                    .iter()
                    .map(|arg| copy_term(arg, &frame.bindings).display(interner).to_string())
                    .collect(),
                path: frame.path.as_deref().map(str::to_owned),
                line: frame.line,
            });
            cursor = frame.predecessor;
        }
        frames
    }

    /// Raises a runtime error, capturing the stack at the raise site.
    pub fn error(&self, kind: ExcKind, message: impl Into<String>) -> Unwind {
        Unwind::Error(RunError {
            kind,
            message: message.into(),
            frames: self.stack_trace(),
        })
    }

    /// Convenience for `Err(self.error(..))` in `Exec` positions.
    pub fn raise<T>(&self, kind: ExcKind, message: impl Into<String>) -> Exec<T> {
        Err(self.error(kind, message))
    }
}
