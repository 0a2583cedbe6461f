//! Primitive tasks: engine builtins plus host-supplied callables.
//!
//! Primitives are values stored under state-variable names and participate
//! in lookup exactly like compound tasks. Three ABI shapes exist:
//! deterministic text generators (produce tokens, always succeed),
//! predicates (succeed or fail, no output), and meta tasks (receive the
//! success continuation; the capturing combinators and `StringForm` live
//! there).

use std::{fmt, rc::Rc};

use strum::IntoStaticStr;

use crate::{
    combinators::{self, Combinator},
    exception_private::{Exec, RunError, Unwind},
    exception_public::{ExcKind, Exception},
    intern::Interner,
    machine::{Cont, Env, Machine},
    object::Object,
    term::Term,
    tracer::Tracer,
    unify::{copy_term, unify},
};

/// Engine-supplied primitives, dispatched without allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub(crate) enum Builtin {
    /// Renders one resolved term as tokens; the `Mention` default.
    Write,
    /// Unifies the string form of a ground term with its second argument.
    StringForm,
    /// Raises `Thrown` preserving the resolved argument tokens.
    Throw,
    /// Always fails.
    Fail,
    DoAll,
    Once,
    ExactlyOnce,
    Max,
    Min,
}

/// A host-registered primitive: a name for diagnostics plus the callable.
pub(crate) struct HostPrimitive {
    pub name: String,
    pub kind: HostKind,
}

/// The two host-facing ABI shapes. Hosts see ground [`Object`]s; meta-shaped
/// extension is engine-internal.
pub(crate) enum HostKind {
    TextGenerator(Box<dyn Fn(&[Object]) -> Result<Vec<String>, Exception>>),
    Predicate(Box<dyn Fn(&[Object]) -> Result<bool, Exception>>),
}

impl fmt::Debug for HostPrimitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self.kind {
            HostKind::TextGenerator(_) => "text generator",
            HostKind::Predicate(_) => "predicate",
        };
        write!(f, "HostPrimitive({} {shape})", self.name)
    }
}

/// A primitive task value, cheap to clone into terms and binding cells.
#[derive(Debug, Clone)]
pub(crate) enum PrimitiveTask {
    Builtin(Builtin),
    Host(Rc<HostPrimitive>),
}

impl PrimitiveTask {
    pub fn name(&self) -> &str {
        match self {
            Self::Builtin(builtin) => (*builtin).into(),
            Self::Host(host) => &host.name,
        }
    }

    /// Identity: builtins by variant, host primitives by allocation.
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Host(a), Self::Host(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Dispatches a primitive call through its ABI shape.
pub(crate) fn invoke_primitive<'m, Tr: Tracer>(
    primitive: &PrimitiveTask,
    args: &[Term],
    m: &mut Machine<'m, Tr>,
    env: &Env,
    k: Cont<'_, 'm, Tr>,
) -> Exec<bool> {
    match primitive {
        PrimitiveTask::Builtin(builtin) => match builtin {
            Builtin::Write => write_primitive(args, m, env, k),
            Builtin::StringForm => string_form(args, m, env, k),
            Builtin::Throw => throw(args, m, env),
            Builtin::Fail => Ok(false),
            Builtin::DoAll => combinators::invoke(Combinator::DoAll, args, m, env, k),
            Builtin::Once => combinators::invoke(Combinator::Once, args, m, env, k),
            Builtin::ExactlyOnce => combinators::invoke(Combinator::ExactlyOnce, args, m, env, k),
            Builtin::Max => combinators::invoke(Combinator::Max, args, m, env, k),
            Builtin::Min => combinators::invoke(Combinator::Min, args, m, env, k),
        },
        PrimitiveTask::Host(host) => invoke_host(host, args, m, env, k),
    }
}

fn invoke_host<'m, Tr: Tracer>(
    host: &HostPrimitive,
    args: &[Term],
    m: &mut Machine<'m, Tr>,
    env: &Env,
    k: Cont<'_, 'm, Tr>,
) -> Exec<bool> {
    let objects: Vec<Object> = args
        .iter()
        .map(|arg| Object::from_term(&copy_term(arg, &env.trail), m.module.interner()))
        .collect();
    match &host.kind {
        HostKind::TextGenerator(generate) => {
            let tokens = generate(&objects).map_err(|e| host_error(m, e))?;
            let mark = m.buffer.watermark();
            m.buffer.extend(tokens.into_iter().map(Rc::<str>::from));
            let ok = k(m, env.trail.clone(), env.state.clone())?;
            if !ok {
                m.buffer.truncate(mark);
            }
            Ok(ok)
        }
        HostKind::Predicate(test) => {
            if test(&objects).map_err(|e| host_error(m, e))? {
                k(m, env.trail.clone(), env.state.clone())
            } else {
                Ok(false)
            }
        }
    }
}

/// A host exception keeps its own frames if it has any; otherwise it picks
/// up the engine stack at the call site.
fn host_error<Tr: Tracer>(m: &Machine<'_, Tr>, exception: Exception) -> Unwind {
    if exception.frames.is_empty() {
        m.error(exception.kind, exception.message)
    } else {
        Unwind::Error(RunError {
            kind: exception.kind,
            message: exception.message,
            frames: exception.frames,
        })
    }
}

fn write_primitive<'m, Tr: Tracer>(
    args: &[Term],
    m: &mut Machine<'m, Tr>,
    env: &Env,
    k: Cont<'_, 'm, Tr>,
) -> Exec<bool> {
    let [term] = args else {
        return m.raise(
            ExcKind::ArgumentCount,
            format!("Write expects 1 argument, got {}", args.len()),
        );
    };
    let value = copy_term(term, &env.trail);
    let mut tokens = Vec::new();
    write_tokens(&value, m.module.interner(), &mut tokens);
    let mark = m.buffer.watermark();
    m.buffer.extend(tokens);
    let ok = k(m, env.trail.clone(), env.state.clone())?;
    if !ok {
        m.buffer.truncate(mark);
    }
    Ok(ok)
}

/// Flattens a resolved term into output tokens.
fn write_tokens(term: &Term, interner: &Interner, out: &mut Vec<Rc<str>>) {
    match term {
        Term::Text(s) => out.push(s.clone()),
        Term::Int(i) => out.push(Rc::from(i.to_string())),
        Term::Float(x) => out.push(Rc::from(ryu::Buffer::new().format(*x))),
        Term::Bool(b) => out.push(Rc::from(if *b { "true" } else { "false" })),
        Term::Tuple(items) => {
            out.push(Rc::from("["));
            for item in items.iter() {
                write_tokens(item, interner, out);
            }
            out.push(Rc::from("]"));
        }
        Term::Pair(cell) => {
            out.push(Rc::from("("));
            write_tokens(&cell.0, interner, out);
            out.push(Rc::from("."));
            write_tokens(&cell.1, interner, out);
            out.push(Rc::from(")"));
        }
        Term::Var(v) => out.push(Rc::from(v.to_string())),
        Term::Local(_) => debug_assert!(false, "local slot survived instantiation"),
        Term::State(id) => out.push(interner.name(*id)),
        Term::Compound(task) => out.push(interner.name(task.borrow().name)),
        Term::Primitive(p) => out.push(Rc::from(p.name())),
    }
}

/// Meta-shaped: needs the continuation because it may extend the trail.
fn string_form<'m, Tr: Tracer>(
    args: &[Term],
    m: &mut Machine<'m, Tr>,
    env: &Env,
    k: Cont<'_, 'm, Tr>,
) -> Exec<bool> {
    let [subject, pattern] = args else {
        return m.raise(
            ExcKind::ArgumentCount,
            format!("StringForm expects 2 arguments, got {}", args.len()),
        );
    };
    let value = copy_term(subject, &env.trail);
    if let Term::Var(v) = &value {
        return m.raise(
            ExcKind::ArgumentInstantiation,
            format!("StringForm needs a ground value, {v} is unbound"),
        );
    }
    let form = value.display(m.module.interner()).to_string();
    match unify(&Term::text(form), pattern, &env.trail) {
        Some(trail) => k(m, trail, env.state.clone()),
        None => Ok(false),
    }
}

fn throw<Tr: Tracer>(args: &[Term], m: &Machine<'_, Tr>, env: &Env) -> Exec<bool> {
    let rendered: Vec<String> = args
        .iter()
        .map(|arg| {
            copy_term(arg, &env.trail)
                .display(m.module.interner())
                .to_string()
        })
        .collect();
    m.raise(ExcKind::Thrown, rendered.join(" "))
}
