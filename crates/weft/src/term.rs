//! The term model: ground values, logic variables, state variables, tuples.
//!
//! Terms are cheap to clone: every composite payload sits behind an `Rc`.
//! Equality on ground values is structural; equality on logic variables is by
//! identity (the allocation, not the display name). A variable never carries
//! its binding - bindings live in the ambient binding list (see
//! [`crate::bindings`]).

use std::{fmt, rc::Rc};

use crate::{
    builtins::PrimitiveTask,
    intern::{Interner, StateVarId},
    task::TaskHandle,
};

/// One term of the object language.
#[derive(Debug, Clone)]
pub(crate) enum Term {
    /// A ground word or string atom.
    Text(Rc<str>),
    /// A ground integer.
    Int(i64),
    /// A ground float.
    Float(f64),
    /// A ground boolean.
    Bool(bool),
    /// A ground list cell: head plus tail.
    Pair(Rc<(Term, Term)>),
    /// A heterogeneous ordered sequence of terms.
    Tuple(Rc<[Term]>),
    /// A local logic variable, fresh per method activation.
    Var(LogicVar),
    /// A placeholder for a method-local slot; replaced by a fresh [`LogicVar`]
    /// when the enclosing method is activated. Never observed by the unifier.
    Local(u16),
    /// A named, module-global state variable.
    State(StateVarId),
    /// A user-defined task value.
    Compound(TaskHandle),
    /// A host- or engine-supplied primitive task value.
    Primitive(PrimitiveTask),
}

impl Term {
    pub fn text(s: impl AsRef<str>) -> Self {
        Self::Text(Rc::from(s.as_ref()))
    }

    /// Structural equality for ground terms. Variables compare by identity;
    /// task values compare by allocation.
    pub fn ground_eq(a: &Self, b: &Self) -> bool {
        match (a, b) {
            (Self::Text(x), Self::Text(y)) => x == y,
            (Self::Int(x), Self::Int(y)) => x == y,
            (Self::Float(x), Self::Float(y)) => x == y,
            (Self::Bool(x), Self::Bool(y)) => x == y,
            (Self::Pair(x), Self::Pair(y)) => {
                Self::ground_eq(&x.0, &y.0) && Self::ground_eq(&x.1, &y.1)
            }
            (Self::Tuple(x), Self::Tuple(y)) => {
                x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| Self::ground_eq(l, r))
            }
            (Self::Var(x), Self::Var(y)) => x.same(y),
            (Self::State(x), Self::State(y)) => x == y,
            (Self::Compound(x), Self::Compound(y)) => Rc::ptr_eq(x, y),
            (Self::Primitive(x), Self::Primitive(y)) => x.same(y),
            _ => false,
        }
    }

    /// Replaces [`Term::Local`] slots with the activation's fresh variables.
    pub fn instantiate(&self, locals: &[LogicVar]) -> Self {
        match self {
            Self::Local(slot) => Self::Var(locals[*slot as usize].clone()),
            Self::Tuple(items) => {
                Self::Tuple(items.iter().map(|t| t.instantiate(locals)).collect())
            }
            Self::Pair(cell) => Self::Pair(Rc::new((
                cell.0.instantiate(locals),
                cell.1.instantiate(locals),
            ))),
            other => other.clone(),
        }
    }

    /// Renders the term for error messages and traces.
    pub fn display<'a>(&'a self, interner: &'a Interner) -> TermDisplay<'a> {
        TermDisplay { term: self, interner }
    }
}

/// A local logic variable with stable identity and an optional display name.
#[derive(Debug, Clone)]
pub(crate) struct LogicVar(Rc<VarInfo>);

#[derive(Debug)]
struct VarInfo {
    name: Option<Rc<str>>,
    serial: u64,
}

impl LogicVar {
    pub fn fresh(name: Option<Rc<str>>, serial: u64) -> Self {
        Self(Rc::new(VarInfo { name, serial }))
    }

    /// Identity comparison; display names play no part.
    #[inline]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for LogicVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.name {
            Some(name) => write!(f, "?{name}"),
            None => write!(f, "?_{}", self.0.serial),
        }
    }
}

/// Borrowed display adapter; state-variable names come from the interner.
pub(crate) struct TermDisplay<'a> {
    term: &'a Term,
    interner: &'a Interner,
}

impl fmt::Display for TermDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.term {
            Term::Text(s) => write!(f, "{s}"),
            Term::Int(i) => write!(f, "{i}"),
            Term::Float(x) => write!(f, "{}", ryu::Buffer::new().format(*x)),
            Term::Bool(b) => write!(f, "{b}"),
            Term::Pair(cell) => write!(
                f,
                "({} . {})",
                cell.0.display(self.interner),
                cell.1.display(self.interner)
            ),
            Term::Tuple(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item.display(self.interner))?;
                }
                write!(f, "]")
            }
            Term::Var(v) => write!(f, "{v}"),
            Term::Local(slot) => write!(f, "?slot{slot}"),
            Term::State(id) => write!(f, "{}", self.interner.name(*id)),
            Term::Compound(task) => write!(f, "{}", self.interner.name(task.borrow().name)),
            Term::Primitive(p) => write!(f, "{}", p.name()),
        }
    }
}
