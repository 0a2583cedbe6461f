#![doc = include_str!("../../../README.md")]

mod bindings;
mod builtins;
mod combinators;
mod exception_private;
mod exception_public;
mod intern;
mod machine;
mod module;
mod object;
mod output;
mod parse;
mod step;
mod task;
mod term;
pub mod tracer;
mod unify;

pub use crate::{
    exception_public::{ExcKind, Exception, StackFrame},
    module::{BindHook, Module, State},
    object::Object,
    tracer::{NoopTracer, RecordingTracer, StderrTracer, TraceEvent, Tracer},
};
