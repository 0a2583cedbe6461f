//! The public value surface: what hosts pass into and read back out of a
//! call.
//!
//! Unlike the internal term type, `Object` owns all of its data and can be
//! freely cloned, serialized, or stored; it never references a module or a
//! binding list.

use std::fmt;

use crate::{
    exception_public::{ExcKind, Exception},
    intern::Interner,
    term::{LogicVar, Term},
};

/// A value crossing the host boundary.
///
/// Most variants work in both directions. `Var` is special: as an input it
/// denotes a fresh unbound logic variable (with a display name); as an
/// output it reports that a result was left unbound.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Object {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Object>),
    Var(String),
}

impl Object {
    /// Converts a resolved term. Unbound variables surface as [`Object::Var`];
    /// task values surface as their name.
    pub(crate) fn from_term(term: &Term, interner: &Interner) -> Self {
        match term {
            Term::Text(s) => Self::Text(s.to_string()),
            Term::Int(i) => Self::Int(*i),
            Term::Float(x) => Self::Float(*x),
            Term::Bool(b) => Self::Bool(*b),
            Term::Tuple(items) => Self::List(
                items
                    .iter()
                    .map(|item| Self::from_term(item, interner))
                    .collect(),
            ),
            Term::Pair(cell) => Self::List(vec![
                Self::from_term(&cell.0, interner),
                Self::from_term(&cell.1, interner),
            ]),
            Term::Var(v) => Self::Var(v.to_string()),
            Term::Local(slot) => Self::Var(format!("?slot{slot}")),
            Term::State(id) => Self::Text(interner.name(*id).to_string()),
            Term::Compound(task) => Self::Text(interner.name(task.borrow().name).to_string()),
            Term::Primitive(p) => Self::Text(p.name().to_owned()),
        }
    }

    /// Converts to a term, allocating fresh variables for `Var` inputs.
    pub(crate) fn to_term(&self, fresh: &mut dyn FnMut(Option<std::rc::Rc<str>>) -> LogicVar) -> Term {
        match self {
            Self::Text(s) => Term::text(s),
            Self::Int(i) => Term::Int(*i),
            Self::Float(x) => Term::Float(*x),
            Self::Bool(b) => Term::Bool(*b),
            Self::List(items) => {
                Term::Tuple(items.iter().map(|item| item.to_term(&mut *fresh)).collect())
            }
            Self::Var(name) => Term::Var(fresh(Some(name.as_str().into()))),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Bool(_) => "boolean",
            Self::List(_) => "list",
            Self::Var(_) => "unbound variable",
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{}", ryu::Buffer::new().format(*x)),
            Self::Bool(b) => write!(f, "{b}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Var(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for Object {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Object {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Object {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Object {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for Object {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<Object>> for Object {
    fn from(items: Vec<Object>) -> Self {
        Self::List(items)
    }
}

fn wrong_type(expected: &str, got: &Object) -> Exception {
    Exception::new(
        ExcKind::ArgumentType,
        format!("expected {expected}, got {} {got}", got.type_name()),
    )
}

impl TryFrom<Object> for i64 {
    type Error = Exception;

    fn try_from(value: Object) -> Result<Self, Exception> {
        match value {
            Object::Int(i) => Ok(i),
            other => Err(wrong_type("an integer", &other)),
        }
    }
}

impl TryFrom<Object> for f64 {
    type Error = Exception;

    fn try_from(value: Object) -> Result<Self, Exception> {
        match value {
            Object::Float(x) => Ok(x),
            Object::Int(i) => Ok(i as f64),
            other => Err(wrong_type("a number", &other)),
        }
    }
}

impl TryFrom<Object> for bool {
    type Error = Exception;

    fn try_from(value: Object) -> Result<Self, Exception> {
        match value {
            Object::Bool(b) => Ok(b),
            other => Err(wrong_type("a boolean", &other)),
        }
    }
}

impl TryFrom<Object> for String {
    type Error = Exception;

    fn try_from(value: Object) -> Result<Self, Exception> {
        match value {
            Object::Text(s) => Ok(s),
            other => Err(wrong_type("text", &other)),
        }
    }
}
