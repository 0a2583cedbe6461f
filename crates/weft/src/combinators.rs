//! Higher-order combinators: `DoAll`, `Once`, `ExactlyOnce`, `Max`, `Min`.
//!
//! All five build an internal step chain from their body argument (a
//! sequence of call tuples) and drive it with a custom continuation that
//! captures solutions instead of accepting them. `Once`-family combinators
//! escape the search with [`Unwind::Exit`] carrying the captured bindings;
//! the token minted per invocation guarantees nobody else catches it.
//! `Max`/`Min` run the body to exhaustion, keep the best-scoring solution's
//! output slice and bindings, and replay them once the search is spent.

use std::rc::Rc;

use crate::{
    bindings::{DynamicState, Trail},
    exception_private::{Exec, ExitPayload, Unwind},
    exception_public::ExcKind,
    machine::{Cont, Env, Machine},
    output::OutputSlice,
    step::{CallStep, Chain, Step, run_chain},
    term::Term,
    tracer::Tracer,
    unify::{copy_term, resolve},
};

/// Which capturing combinator to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Combinator {
    DoAll,
    Once,
    ExactlyOnce,
    Max,
    Min,
}

pub(crate) fn invoke<'m, Tr: Tracer>(
    which: Combinator,
    args: &[Term],
    m: &mut Machine<'m, Tr>,
    env: &Env,
    k: Cont<'_, 'm, Tr>,
) -> Exec<bool> {
    match which {
        Combinator::DoAll => do_all(args, m, env, k),
        Combinator::Once => once(args, m, env, k, false),
        Combinator::ExactlyOnce => once(args, m, env, k, true),
        Combinator::Max => extremum(args, m, env, k, true),
        Combinator::Min => extremum(args, m, env, k, false),
    }
}

/// Builds a call chain from body tuples, rightmost call innermost.
fn body_chain<Tr: Tracer>(
    body: &[Term],
    m: &Machine<'_, Tr>,
    env: &Env,
) -> Exec<Chain> {
    let mut chain: Chain = None;
    for term in body.iter().rev() {
        let resolved = resolve(term, &env.trail);
        let Term::Tuple(items) = resolved else {
            return m.raise(
                ExcKind::ArgumentType,
                format!(
                    "combinator body expects call tuples, got {}",
                    resolved.display(m.module.interner())
                ),
            );
        };
        let Some((task, call_args)) = items.split_first() else {
            return m.raise(ExcKind::ArgumentType, "combinator body contains an empty call");
        };
        chain = Some(Rc::new(Step::Call(CallStep {
            task: task.clone(),
            args: call_args.to_vec(),
            next: chain,
        })));
    }
    Ok(chain)
}

/// Collects every successful output slice, then concatenates them and
/// succeeds exactly once. Inner unifications do not propagate outward: the
/// continuation sees the combinator's own environment.
fn do_all<'m, Tr: Tracer>(
    args: &[Term],
    m: &mut Machine<'m, Tr>,
    env: &Env,
    k: Cont<'_, 'm, Tr>,
) -> Exec<bool> {
    let chain = body_chain(args, m, env)?;
    let mark = m.buffer.watermark();
    let mut slices: Vec<OutputSlice> = Vec::new();
    let exhausted = run_chain(&chain, m, env, &mut |m, _trail, _state| {
        slices.push(m.buffer.difference(mark));
        Ok(false)
    })?;
    debug_assert!(!exhausted, "an always-false continuation cannot succeed");
    for slice in &slices {
        m.buffer.append_slice(slice);
    }
    let ok = k(m, env.trail.clone(), env.state.clone())?;
    if !ok {
        m.buffer.truncate(mark);
    }
    Ok(ok)
}

/// Commits to the body's first solution. The capturing continuation raises
/// the exit signal; catching it here discards the search stack below while
/// the solution's output is still in the buffer.
fn once<'m, Tr: Tracer>(
    args: &[Term],
    m: &mut Machine<'m, Tr>,
    env: &Env,
    k: Cont<'_, 'm, Tr>,
    required: bool,
) -> Exec<bool> {
    let chain = body_chain(args, m, env)?;
    let token = m.exit_token();
    let mark = m.buffer.watermark();
    let result = run_chain(&chain, m, env, &mut |_m, trail, state| {
        Err(Unwind::Exit(ExitPayload { token, trail, state }))
    });
    match result {
        Ok(_) => {
            if required {
                let first = args
                    .first()
                    .map_or_else(String::new, |call| call.display(m.module.interner()).to_string());
                m.raise(
                    ExcKind::CallFailed,
                    format!("{first} found no solution"),
                )
            } else {
                Ok(false)
            }
        }
        Err(Unwind::Exit(payload)) if payload.token == token => {
            let ok = k(m, payload.trail, payload.state)?;
            if !ok {
                m.buffer.truncate(mark);
            }
            Ok(ok)
        }
        Err(other) => Err(other),
    }
}

/// Runs the body to exhaustion, scoring each solution by dereferencing the
/// score term, and replays the best one.
fn extremum<'m, Tr: Tracer>(
    args: &[Term],
    m: &mut Machine<'m, Tr>,
    env: &Env,
    k: Cont<'_, 'm, Tr>,
    maximize: bool,
) -> Exec<bool> {
    let Some((score_term, body)) = args.split_first() else {
        return m.raise(
            ExcKind::ArgumentCount,
            "expected a score variable followed by a body",
        );
    };
    let chain = body_chain(body, m, env)?;
    let mark = m.buffer.watermark();
    let mut best: Option<(f64, OutputSlice, Trail, DynamicState)> = None;
    run_chain(&chain, m, env, &mut |m, trail, state| {
        let score = match copy_term(score_term, &trail) {
            Term::Int(value) => value as f64,
            Term::Float(value) if value.is_finite() => value,
            Term::Var(v) => {
                return Err(m.error(
                    ExcKind::ArgumentInstantiation,
                    format!("score {v} is unbound at solution time"),
                ));
            }
            other => {
                return Err(m.error(
                    ExcKind::ArgumentType,
                    format!(
                        "score must be a finite number, got {}",
                        other.display(m.module.interner())
                    ),
                ));
            }
        };
        let better = best
            .as_ref()
            .is_none_or(|(incumbent, ..)| if maximize { score > *incumbent } else { score < *incumbent });
        if better {
            best = Some((score, m.buffer.difference(mark), trail, state));
        }
        Ok(false)
    })?;
    match best {
        Some((_, slice, trail, state)) => {
            m.buffer.append_slice(&slice);
            let ok = k(m, trail, state)?;
            if !ok {
                m.buffer.truncate(mark);
            }
            Ok(ok)
        }
        None => Ok(false),
    }
}
