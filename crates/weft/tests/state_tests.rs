//! Dynamic state, module dictionaries, hooks, and the host-facing entry
//! points beyond plain `call`.

use std::{cell::Cell, rc::Rc};

use pretty_assertions::assert_eq;
use weft::{ExcKind, Exception, Module, Object, State};

// =============================================================================
// Dynamic state
// =============================================================================

/// [set ...] binds a state variable; the binding comes back in the final
/// state.
#[test]
fn set_step_threads_state() {
    let module = Module::new("test");
    module.add_definitions(&["Test: [set Score 10] ok"]).unwrap();
    let (text, state) = module.call(&State::empty(), "Test", &[]).unwrap();
    assert_eq!(text.as_deref(), Some("ok"));
    assert_eq!(state.get("Score"), Some(Object::Int(10)));
}

/// A returned state feeds the next call: the value set by the first call is
/// visible to the second.
#[test]
fn state_survives_across_calls() {
    let module = Module::new("test");
    module
        .add_definitions(&["Start: [set Score 10] started", "Report: [Write Score]"])
        .unwrap();
    let (_, state) = module.call(&State::empty(), "Start", &[]).unwrap();
    let (text, _) = module.call(&state, "Report", &[]).unwrap();
    assert_eq!(text.as_deref(), Some("10"));
}

/// The newest binding of a state variable shadows older ones.
#[test]
fn newest_state_binding_wins() {
    let module = Module::new("test");
    module
        .add_definitions(&["Test: [set X 1] [set X 2] [Write X]"])
        .unwrap();
    let (text, state) = module.call(&State::empty(), "Test", &[]).unwrap();
    assert_eq!(text.as_deref(), Some("2"));
    assert_eq!(state.get("X"), Some(Object::Int(2)));
}

/// A state variable used as an argument evaluates to its current value.
#[test]
fn state_reference_in_unification() {
    let module = Module::new("test");
    module
        .add_definitions(&["Test: [set Score 10] [= Score 10] matched"])
        .unwrap();
    assert_eq!(
        module.call(&State::empty(), "Test", &[]).unwrap().0.as_deref(),
        Some("matched")
    );
}

/// A failed call returns the empty state, not the partial one.
#[test]
fn failed_call_returns_empty_state() {
    let module = Module::new("test");
    module
        .add_definitions(&["[fallible] Test: [set Score 10] [Fail]"])
        .unwrap();
    let (text, state) = module.call(&State::empty(), "Test", &[]).unwrap();
    assert_eq!(text, None);
    assert!(state.is_empty());
}

// =============================================================================
// Module dictionary
// =============================================================================

#[test]
fn module_set_and_get() {
    let module = Module::new("test");
    module.set("Name", Object::Text("weft".into()));
    assert_eq!(module.get("Name"), Some(Object::Text("weft".into())));
    assert!(module.defines("Name"));
    assert!(!module.defines("Other"));
}

/// initially bodies run at load time; surviving dynamic bindings become
/// module state and the pseudo-task is not retained.
#[test]
fn initially_seeds_module_state() {
    let module = Module::new("test");
    module
        .add_definitions(&["initially: [set Greeting hello]"])
        .unwrap();
    assert_eq!(module.get("Greeting"), Some(Object::Text("hello".into())));
    assert!(!module.defines("initially"));
}

/// Tasks read module state seeded by initially.
#[test]
fn initially_state_visible_to_calls() {
    let module = Module::new("test");
    module
        .add_definitions(&["initially: [set Who world]", "Test: hello [Write Who]"])
        .unwrap();
    assert_eq!(
        module.call(&State::empty(), "Test", &[]).unwrap().0.as_deref(),
        Some("hello world")
    );
}

// =============================================================================
// Parent chain and hooks
// =============================================================================

/// A child module sees its parent's definitions through the lookup chain.
#[test]
fn child_sees_parent_tasks() {
    let parent = Module::new("parent");
    parent.add_definitions(&["Hello: hi"]).unwrap();
    let child = Module::with_parent("child", &parent);
    assert_eq!(
        child.call(&State::empty(), "Hello", &[]).unwrap().0.as_deref(),
        Some("hi")
    );
}

/// A child's own binding shadows the parent's without touching it.
#[test]
fn child_shadows_parent_value() {
    let parent = Module::new("parent");
    parent.set("X", Object::Int(1));
    let child = Module::with_parent("child", &parent);
    child.set("X", Object::Int(2));
    assert_eq!(child.get("X"), Some(Object::Int(2)));
    assert_eq!(parent.get("X"), Some(Object::Int(1)));
}

/// A bind hook supplies missing values, and the result is cached in the
/// module that initiated the lookup: the hook fires once.
#[test]
fn bind_hook_supplies_and_caches() {
    let module = Module::new("test");
    module.add_definitions(&["Test: [Write Magic]"]).unwrap();
    let calls = Rc::new(Cell::new(0usize));
    let seen = calls.clone();
    module.add_bind_hook(Box::new(move |name| {
        if name == "Magic" {
            seen.set(seen.get() + 1);
            Some(Object::Int(5))
        } else {
            None
        }
    }));
    for _ in 0..2 {
        let (text, _) = module.call(&State::empty(), "Test", &[]).unwrap();
        assert_eq!(text.as_deref(), Some("5"));
    }
    assert_eq!(calls.get(), 1, "hook result should be cached after first use");
}

/// Mentioning a value with no user Mention falls back to Write.
#[test]
fn mention_defaults_to_write() {
    let module = Module::new("test");
    module.add_definitions(&["Test ?x: ?x"]).unwrap();
    let (text, _) = module
        .call(&State::empty(), "Test", &[Object::Text("word".into())])
        .unwrap();
    assert_eq!(text.as_deref(), Some("word"));
}

/// A user-defined Mention task overrides the fallback.
#[test]
fn user_mention_overrides_default() {
    let module = Module::new("test");
    module
        .add_definitions(&["Mention ?x: < [Write ?x] >", "Test ?x: ?x"])
        .unwrap();
    let (text, _) = module
        .call(&State::empty(), "Test", &[Object::Text("word".into())])
        .unwrap();
    assert_eq!(text.as_deref(), Some("< word >"));
}

/// The [main] annotation marks a program's entry point for the host.
#[test]
fn main_annotation_marks_entry_point() {
    let module = Module::new("test");
    assert_eq!(module.main_task(), None);
    module
        .add_definitions(&["Helper: h", "[main] Story: once upon a time"])
        .unwrap();
    assert_eq!(module.main_task(), Some("Story".to_owned()));
}

// =============================================================================
// Predicates and functions
// =============================================================================

#[test]
fn call_predicate_reports_solutions() {
    let module = Module::new("test");
    module.add_definitions(&["Yes.", "No 1."]).unwrap();
    assert!(module.call_predicate(&State::empty(), "Yes", &[]).unwrap());
    assert!(
        !module
            .call_predicate(&State::empty(), "No", &[Object::Int(2)])
            .unwrap()
    );
}

/// call_function appends a fresh result variable and copies it back out.
#[test]
fn call_function_returns_bound_result() {
    let module = Module::new("test");
    module.add_definitions(&["Identity ?x ?y: [= ?y ?x]"]).unwrap();
    let result: i64 = module
        .call_function(&State::empty(), "Identity", &[Object::Int(21)])
        .unwrap();
    assert_eq!(result, 21);
}

/// A task that succeeds without binding the result raises
/// ArgumentInstantiation.
#[test]
fn call_function_unbound_result_raises() {
    let module = Module::new("test");
    module.add_definitions(&["F ?x: done"]).unwrap();
    let error = module
        .call_function::<i64>(&State::empty(), "F", &[])
        .unwrap_err();
    assert_eq!(error.kind, ExcKind::ArgumentInstantiation);
}

/// A failing task raises CallFailed out of call_function.
#[test]
fn call_function_failure_raises() {
    let module = Module::new("test");
    module.add_definitions(&["F 1 2."]).unwrap();
    let error = module
        .call_function::<i64>(&State::empty(), "F", &[Object::Int(3)])
        .unwrap_err();
    assert_eq!(error.kind, ExcKind::CallFailed);
}

// =============================================================================
// Host primitives
// =============================================================================

/// A host text generator emits its tokens and always succeeds.
#[test]
fn host_text_generator() {
    let module = Module::new("test");
    module.add_text_generator("Shout", |args| Ok(vec![format!("{}!", args[0])]));
    module.add_definitions(&["Test: [Shout hey]"]).unwrap();
    assert_eq!(
        module.call(&State::empty(), "Test", &[]).unwrap().0.as_deref(),
        Some("hey!")
    );
}

/// A host predicate gates the rest of the body.
#[test]
fn host_predicate() {
    let module = Module::new("test");
    module.add_predicate("Even", |args| match args[0] {
        Object::Int(i) => Ok(i % 2 == 0),
        _ => Err(Exception::new(ExcKind::ArgumentType, "Even needs an integer")),
    });
    module
        .add_definitions(&["[fallible] Test ?x: [Even ?x] even"])
        .unwrap();
    let (text, _) = module
        .call(&State::empty(), "Test", &[Object::Int(4)])
        .unwrap();
    assert_eq!(text.as_deref(), Some("even"));
    let (text, _) = module
        .call(&State::empty(), "Test", &[Object::Int(3)])
        .unwrap();
    assert_eq!(text, None);
}

// =============================================================================
// Loading and parse_and_execute
// =============================================================================

#[test]
fn load_definitions_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("greet.step");
    std::fs::write(&path, "Greet: hello from disk\n").unwrap();
    let module = Module::new("test");
    module.load_definitions(&path).unwrap();
    assert_eq!(
        module.call(&State::empty(), "Greet", &[]).unwrap().0.as_deref(),
        Some("hello from disk")
    );
}

/// load_directory loads every .step file, ignores the rest, and only
/// descends when asked to.
#[test]
fn load_directory_filters_and_recurses() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.step"), "A: from a\n").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not loaded\n").unwrap();
    let nested = dir.path().join("nested");
    std::fs::create_dir(&nested).unwrap();
    std::fs::write(nested.join("b.step"), "B: from b\n").unwrap();

    let flat = Module::new("flat");
    flat.load_directory(dir.path(), false).unwrap();
    assert!(flat.defines("A"));
    assert!(!flat.defines("B"));

    let deep = Module::new("deep");
    deep.load_directory(dir.path(), true).unwrap();
    assert!(deep.defines("A"));
    assert!(deep.defines("B"));
}

/// parse_and_execute defines TopLevelCall from the code and runs it; a later
/// call replaces the previous definition.
#[test]
fn parse_and_execute_redefines() {
    let module = Module::new("test");
    module.add_definitions(&["Greet: hello"]).unwrap();
    let (text, _) = module.parse_and_execute("[Greet] world").unwrap();
    assert_eq!(text.as_deref(), Some("hello world"));
    let (text, _) = module.parse_and_execute("bye").unwrap();
    assert_eq!(text.as_deref(), Some("bye"));
}
