//! One- and two-way unification over the persistent trail.
//!
//! The unifier is pure: it never mutates existing cells, it only conses new
//! ones onto the trail it was given. Failure is a return value, never an
//! error. There is no occurs check - cyclic terms are undefined behaviour
//! here; callers unifying untrusted input must guard with a depth-bounded
//! walk of their own.

use crate::{
    bindings::Trail,
    term::Term,
};

/// Dereferences `term` one level at a time: a bound variable is replaced by
/// its value, repeatedly, until the result is a non-variable or an unbound
/// variable. Does not descend into tuples (see [`copy_term`] for that).
pub(crate) fn resolve(term: &Term, trail: &Trail) -> Term {
    let mut current = term;
    loop {
        match current {
            Term::Var(v) => match trail.lookup(v) {
                Some(bound) => current = bound,
                None => return current.clone(),
            },
            other => return other.clone(),
        }
    }
}

/// Elementwise [`resolve`].
pub(crate) fn resolve_list(terms: &[Term], trail: &Trail) -> Vec<Term> {
    terms.iter().map(|t| resolve(t, trail)).collect()
}

/// Unifies `a` with `b`, returning the extended trail on success.
pub(crate) fn unify(a: &Term, b: &Term, trail: &Trail) -> Option<Trail> {
    let a = resolve(a, trail);
    let b = resolve(b, trail);
    match (&a, &b) {
        // Identical variables unify without a new binding.
        (Term::Var(x), Term::Var(y)) if x.same(y) => Some(trail.clone()),
        (Term::Var(x), _) => Some(trail.bind(x.clone(), b.clone())),
        (_, Term::Var(y)) => Some(trail.bind(y.clone(), a.clone())),
        (Term::Tuple(xs), Term::Tuple(ys)) => {
            if xs.len() != ys.len() {
                return None;
            }
            let mut trail = trail.clone();
            for (x, y) in xs.iter().zip(ys.iter()) {
                trail = unify(x, y, &trail)?;
            }
            Some(trail)
        }
        (Term::Pair(x), Term::Pair(y)) => {
            let trail = unify(&x.0, &y.0, trail)?;
            unify(&x.1, &y.1, &trail)
        }
        _ => {
            if Term::ground_eq(&a, &b) {
                Some(trail.clone())
            } else {
                None
            }
        }
    }
}

/// Walks `term`, replacing every bound variable by its value, recursively.
/// A still-unbound variable appears as itself in the output; callers treat
/// that as the "no ground value" signal.
pub(crate) fn copy_term(term: &Term, trail: &Trail) -> Term {
    let resolved = resolve(term, trail);
    match &resolved {
        Term::Tuple(items) => Term::Tuple(items.iter().map(|t| copy_term(t, trail)).collect()),
        Term::Pair(cell) => Term::Pair(std::rc::Rc::new((
            copy_term(&cell.0, trail),
            copy_term(&cell.1, trail),
        ))),
        _ => resolved,
    }
}
