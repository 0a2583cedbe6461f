//! The step chain: one sum type per atomic operation in a method body.
//!
//! Every step holds its successor (`next`, possibly `None` for end of chain)
//! and exposes continuation-passing `try_step`. Success means the supplied
//! continuation was invoked and returned `true`; `Ok(false)` drives
//! backtracking into the next alternative. Chains are built right to left at
//! parse time, so execution is a tail-call-shaped traversal.
//!
//! The backtrack-purity contract lives here: a step only keeps output it
//! appended if its continuation accepted the solution, so after any
//! `Ok(false)` the buffer length equals the length observed on entry.

use std::rc::Rc;

use rand::seq::SliceRandom;
use smallvec::SmallVec;

use crate::{
    builtins,
    exception_private::Exec,
    exception_public::ExcKind,
    intern::StateVarId,
    machine::{Cont, Env, Machine},
    task,
    term::Term,
    tracer::Tracer,
    unify::{copy_term, resolve, unify},
};

/// A (possibly empty) step chain.
pub(crate) type Chain = Option<Rc<Step>>;

/// One atomic operation inside a method body.
#[derive(Debug)]
pub(crate) enum Step {
    Emit(EmitStep),
    Call(CallStep),
    Branch(BranchStep),
    Unify(UnifyStep),
    Set(SetStep),
}

/// Appends a fixed token sequence.
#[derive(Debug)]
pub(crate) struct EmitStep {
    pub tokens: SmallVec<[Rc<str>; 4]>,
    pub next: Chain,
}

/// Calls a task (compound or primitive) with argument terms.
#[derive(Debug)]
pub(crate) struct CallStep {
    pub task: Term,
    pub args: Vec<Term>,
    pub next: Chain,
}

/// Tries alternative sub-chains in order (or shuffled). A `None` alternative
/// means "do nothing and continue" - the empty `[else]` clause.
#[derive(Debug)]
pub(crate) struct BranchStep {
    pub alternatives: Vec<Chain>,
    pub shuffle: bool,
    pub next: Chain,
}

/// Unifies two terms, extending the trail on success.
#[derive(Debug)]
pub(crate) struct UnifyStep {
    pub left: Term,
    pub right: Term,
    pub next: Chain,
}

/// Binds a state variable in the dynamic state.
#[derive(Debug)]
pub(crate) struct SetStep {
    pub target: StateVarId,
    pub value: Term,
    pub next: Chain,
}

/// Runs `chain`; an empty chain invokes `k` with the incoming state.
pub(crate) fn run_chain<'m, Tr: Tracer>(
    chain: &Chain,
    m: &mut Machine<'m, Tr>,
    env: &Env,
    k: Cont<'_, 'm, Tr>,
) -> Exec<bool> {
    match chain {
        Some(step) => step.try_step(m, env, k),
        None => k(m, env.trail.clone(), env.state.clone()),
    }
}

impl Step {
    pub fn try_step<'m, Tr: Tracer>(
        &self,
        m: &mut Machine<'m, Tr>,
        env: &Env,
        k: Cont<'_, 'm, Tr>,
    ) -> Exec<bool> {
        match self {
            Self::Emit(step) => step.try_step(m, env, k),
            Self::Call(step) => step.try_step(m, env, k),
            Self::Branch(step) => step.try_step(m, env, k),
            Self::Unify(step) => step.try_step(m, env, k),
            Self::Set(step) => step.try_step(m, env, k),
        }
    }
}

impl EmitStep {
    fn try_step<'m, Tr: Tracer>(
        &self,
        m: &mut Machine<'m, Tr>,
        env: &Env,
        k: Cont<'_, 'm, Tr>,
    ) -> Exec<bool> {
        let mark = m.buffer.watermark();
        m.buffer.extend(self.tokens.iter().cloned());
        let ok = run_chain(&self.next, m, env, k)?;
        if !ok {
            m.buffer.truncate(mark);
        }
        Ok(ok)
    }
}

impl CallStep {
    fn try_step<'m, Tr: Tracer>(
        &self,
        m: &mut Machine<'m, Tr>,
        env: &Env,
        k: Cont<'_, 'm, Tr>,
    ) -> Exec<bool> {
        let target = resolve(&self.task.instantiate(&env.locals), &env.trail);
        let args: Vec<Term> = self
            .args
            .iter()
            .map(|arg| resolve_globals(&arg.instantiate(&env.locals), m, env))
            .collect();
        invoke_task(&target, &args, m, env, &mut |m, trail, state| {
            run_chain(&self.next, m, &env.with_bindings(trail, state), &mut *k)
        })
    }
}

impl BranchStep {
    fn try_step<'m, Tr: Tracer>(
        &self,
        m: &mut Machine<'m, Tr>,
        env: &Env,
        k: Cont<'_, 'm, Tr>,
    ) -> Exec<bool> {
        let mut order: Vec<usize> = (0..self.alternatives.len()).collect();
        if self.shuffle {
            order.shuffle(&mut m.rng);
        }
        for index in order {
            let ok = run_chain(&self.alternatives[index], m, env, &mut |m, trail, state| {
                run_chain(&self.next, m, &env.with_bindings(trail, state), &mut *k)
            })?;
            if ok {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl UnifyStep {
    fn try_step<'m, Tr: Tracer>(
        &self,
        m: &mut Machine<'m, Tr>,
        env: &Env,
        k: Cont<'_, 'm, Tr>,
    ) -> Exec<bool> {
        let left = resolve_globals(&self.left.instantiate(&env.locals), m, env);
        let right = resolve_globals(&self.right.instantiate(&env.locals), m, env);
        match unify(&left, &right, &env.trail) {
            Some(trail) => run_chain(&self.next, m, &env.with_trail(trail), k),
            None => Ok(false),
        }
    }
}

impl SetStep {
    fn try_step<'m, Tr: Tracer>(
        &self,
        m: &mut Machine<'m, Tr>,
        env: &Env,
        k: Cont<'_, 'm, Tr>,
    ) -> Exec<bool> {
        // A state-variable reference on the right stores that variable's
        // current value, not the reference.
        let value = copy_term(&self.value.instantiate(&env.locals), &env.trail);
        let value = resolve_globals(&value, m, env);
        let state = env.state.bind(self.target, value);
        run_chain(&self.next, m, &env.with_state(state), k)
    }
}

/// Replaces bound state-variable references by their current values,
/// recursively through tuples, so arguments and unification operands see the
/// value a global holds rather than its name. Unbound references stay
/// symbolic; only a call target turns an unbound name into an error.
fn resolve_globals<Tr: Tracer>(term: &Term, m: &Machine<'_, Tr>, env: &Env) -> Term {
    match term {
        Term::State(id) => m.lookup_state(*id, env).unwrap_or_else(|| term.clone()),
        Term::Tuple(items) => Term::Tuple(
            items
                .iter()
                .map(|item| resolve_globals(item, m, env))
                .collect(),
        ),
        Term::Pair(cell) => Term::Pair(Rc::new((
            resolve_globals(&cell.0, m, env),
            resolve_globals(&cell.1, m, env),
        ))),
        other => other.clone(),
    }
}

/// Dispatches a resolved call target: compound tasks go through the call
/// driver, primitives through their ABI shape. Shared by [`CallStep`], the
/// combinators, and the module's top-level entry points.
pub(crate) fn invoke_task<'m, Tr: Tracer>(
    target: &Term,
    args: &[Term],
    m: &mut Machine<'m, Tr>,
    env: &Env,
    k: Cont<'_, 'm, Tr>,
) -> Exec<bool> {
    match target {
        Term::State(id) => {
            let Some(value) = m.lookup_state(*id, env) else {
                let name = m.module.interner().name(*id);
                return m.raise(ExcKind::UndefinedVariable, format!("{name} is not defined"));
            };
            invoke_task(&value, args, m, env, k)
        }
        Term::Compound(handle) => task::drive_call(handle, args, m, env, k),
        Term::Primitive(primitive) => builtins::invoke_primitive(primitive, args, m, env, k),
        Term::Var(v) => m.raise(
            ExcKind::ArgumentInstantiation,
            format!("call target {v} is unbound"),
        ),
        other => m.raise(
            ExcKind::ArgumentType,
            format!("{} is not a task", other.display(m.module.interner())),
        ),
    }
}
