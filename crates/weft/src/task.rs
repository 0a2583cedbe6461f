//! Methods, compound tasks, and the call driver.
//!
//! A compound task owns an ordered list of methods; calling it tries them in
//! effective order (declared, or a weighted shuffle when the task carries
//! `SHUFFLE`). "Deterministic" is a semantic contract, not an optimisation:
//! the task promises at most one answer, so once any method's success
//! continuation has been entered no further method is tried - even if the
//! continuation rejected the answer. A non-deterministic task is re-entered
//! for another answer whenever an outer backtrack rejects the previous one.

use std::{cell::RefCell, cmp::Ordering, rc::Rc};

use bitflags::bitflags;
use rand::{Rng, distributions::Standard};
use rand_chacha::ChaCha8Rng;

use crate::{
    exception_private::{Exec, RunError, RunResult},
    exception_public::ExcKind,
    intern::StateVarId,
    machine::{Cont, Env, Machine},
    step::{Chain, run_chain},
    term::{LogicVar, Term},
    tracer::Tracer,
    unify::{copy_term, resolve_list, unify},
};

bitflags! {
    /// Task-level flags, unioned monotonically across method additions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct TaskFlags: u8 {
        /// Try methods in a weighted-shuffle order instead of declared order.
        const SHUFFLE = 1;
        /// The task may yield more than one answer; without this flag the
        /// driver cuts after the first method whose continuation was entered.
        const MULTIPLE_SOLUTIONS = 1 << 1;
        /// Exhausting all methods is a plain failure, not `CallFailed`.
        const FALLIBLE = 1 << 2;
        /// Entry point marker, set by the `[main]` annotation.
        const MAIN = 1 << 3;
    }
}

/// One clause of a compound task: an argument pattern plus a step chain.
#[derive(Debug)]
pub(crate) struct Method {
    /// Pattern terms; local-variable placeholders appear as [`Term::Local`].
    pub pattern: Vec<Term>,
    /// Display names of the method's local slots, in slot order.
    pub locals: Vec<Rc<str>>,
    pub chain: Chain,
    /// Positive weight used by the shuffle draw.
    pub weight: f64,
    pub path: Option<Rc<str>>,
    pub line: u32,
}

impl Method {
    /// Activates the method against `args`.
    ///
    /// Allocates fresh logic variables for the local slots, unifies the
    /// instantiated pattern against the arguments (failure is silent - no
    /// frame, no output), then runs the body chain. The success continuation
    /// restores the caller's frame pointer before delegating outward.
    pub fn try_method<'m, Tr: Tracer>(
        &self,
        task: StateVarId,
        task_name: &str,
        args: &[Term],
        m: &mut Machine<'m, Tr>,
        env: &Env,
        k: Cont<'_, 'm, Tr>,
    ) -> Exec<bool> {
        let locals: Rc<[LogicVar]> = self
            .locals
            .iter()
            .map(|name| m.fresh_var(Some(name.clone())))
            .collect();
        let mut trail = env.trail.clone();
        for (pattern, arg) in self.pattern.iter().zip(args) {
            match unify(&pattern.instantiate(&locals), arg, &trail) {
                Some(extended) => trail = extended,
                None => return Ok(false),
            }
        }
        let resolved_args = resolve_list(args, &trail);
        let frame = m.push_frame(
            task,
            resolved_args,
            trail.clone(),
            env.frame,
            self.path.clone(),
            Some(self.line),
        );
        let caller_frame = env.frame;
        let saved_current = m.current;
        m.current = Some(frame);
        m.tracer.enter(task_name);
        let body_env = Env {
            trail,
            state: env.state.clone(),
            locals,
            frame: Some(frame),
        };
        let ok = run_chain(&self.chain, m, &body_env, &mut |m, trail, state| {
            m.tracer.succeed(task_name);
            m.record_frame_exit(frame, trail.clone());
            m.current = caller_frame;
            let accepted = k(m, trail, state)?;
            if !accepted {
                // Rejected from outside; this activation is live again.
                m.current = Some(frame);
            }
            Ok(accepted)
        })?;
        if !ok {
            m.tracer.method_fail(task_name);
            m.record_frame_exit(frame, body_env.trail.clone());
            m.current = saved_current;
        }
        Ok(ok)
    }
}

/// Shared, interiorly mutable handle to a task; this is what lives in the
/// module dictionary and inside [`Term::Compound`].
pub(crate) type TaskHandle = Rc<RefCell<CompoundTask>>;

/// A named task with declared arity and an ordered method list.
#[derive(Debug)]
pub(crate) struct CompoundTask {
    pub name: StateVarId,
    pub arity: usize,
    pub methods: Vec<Rc<Method>>,
    pub flags: TaskFlags,
}

impl CompoundTask {
    pub fn new(name: StateVarId, arity: usize) -> Self {
        Self {
            name,
            arity,
            methods: Vec::new(),
            flags: TaskFlags::empty(),
        }
    }

    /// Appends a method, enforcing the arity invariant.
    pub fn add_method(&mut self, task_name: &str, method: Method) -> RunResult<()> {
        if method.pattern.len() != self.arity {
            return Err(RunError::new(
                ExcKind::ArgumentCount,
                format!(
                    "method of {task_name} has {} argument(s), task is declared with {}",
                    method.pattern.len(),
                    self.arity
                ),
            ));
        }
        self.methods.push(Rc::new(method));
        Ok(())
    }

    /// Unions flags; there is deliberately no way to clear one short of
    /// [`CompoundTask::erase_methods`].
    pub fn add_flags(&mut self, flags: TaskFlags) {
        self.flags |= flags;
    }

    /// Removes every method and resets the flags to empty.
    pub fn erase_methods(&mut self) {
        self.methods.clear();
        self.flags = TaskFlags::empty();
    }

    pub fn deterministic(&self) -> bool {
        !self.flags.contains(TaskFlags::MULTIPLE_SOLUTIONS)
    }

    pub fn must_succeed(&self) -> bool {
        !self.flags.contains(TaskFlags::FALLIBLE)
    }
}

/// Calls a compound task: arity check, effective method order, the
/// determinism cut, and the must-succeed contract.
pub(crate) fn drive_call<'m, Tr: Tracer>(
    handle: &TaskHandle,
    args: &[Term],
    m: &mut Machine<'m, Tr>,
    env: &Env,
    k: Cont<'_, 'm, Tr>,
) -> Exec<bool> {
    let (task_id, arity, shuffle, deterministic, must_succeed, methods) = {
        let task = handle.borrow();
        (
            task.name,
            task.arity,
            task.flags.contains(TaskFlags::SHUFFLE),
            task.deterministic(),
            task.must_succeed(),
            task.methods.clone(),
        )
    };
    let task_name = m.module.interner().name(task_id);
    if args.len() != arity {
        return m.raise(
            ExcKind::ArgumentCount,
            format!(
                "{task_name} expects {arity} argument(s), got {}",
                args.len()
            ),
        );
    }
    let methods = if shuffle {
        weighted_shuffle(&methods, &mut m.rng)
    } else {
        methods
    };
    let mut entered = false;
    for method in &methods {
        let accepted = method.try_method(task_id, &task_name, args, m, env, &mut |m, trail, state| {
            entered = true;
            k(m, trail, state)
        })?;
        if accepted {
            return Ok(true);
        }
        if deterministic && entered {
            // At most one answer was promised; the one we produced was
            // rejected upstream, so the call as a whole fails.
            break;
        }
    }
    if !entered && must_succeed {
        let mut label = format!("[{task_name}");
        for arg in args {
            label.push(' ');
            label.push_str(&copy_term(arg, &env.trail).display(m.module.interner()).to_string());
        }
        label.push(']');
        return m.raise(ExcKind::CallFailed, format!("{label} found no solution"));
    }
    m.tracer.call_fail(&task_name);
    Ok(false)
}

/// Plackett-Luce draw without replacement: sort by `-ln(U)/w`. O(n log n),
/// reproducible for a fixed seed.
fn weighted_shuffle(methods: &[Rc<Method>], rng: &mut ChaCha8Rng) -> Vec<Rc<Method>> {
    let mut keyed: Vec<(f64, Rc<Method>)> = methods
        .iter()
        .map(|method| {
            let draw: f64 = rng.sample(Standard);
            let draw = draw.max(f64::MIN_POSITIVE);
            ((-draw.ln()) / method.weight, method.clone())
        })
        .collect();
    keyed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
    keyed.into_iter().map(|(_, method)| method).collect()
}
