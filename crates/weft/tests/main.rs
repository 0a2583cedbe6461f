//! End-to-end evaluation tests: definitions in, generated text (or failure,
//! or an error) out.

use pretty_assertions::assert_eq;
use weft::{ExcKind, Module, Object, RecordingTracer, State};

/// Calls a zero-argument task and unwraps the generated text.
fn text_of(module: &Module, task: &str) -> String {
    let (text, _state) = module.call(&State::empty(), task, &[]).expect("call should not raise");
    text.expect("task should succeed")
}

// =============================================================================
// Emission and pattern matching
// =============================================================================

/// A method body of plain words emits them verbatim.
#[test]
fn literal_emission() {
    let module = Module::new("test");
    module.add_definitions(&["Test: hello world"]).unwrap();
    assert_eq!(text_of(&module, "Test"), "hello world");
}

/// Punctuation tokens attach to the preceding word when rendered.
#[test]
fn punctuation_attaches() {
    let module = Module::new("test");
    module.add_definitions(&["Test: hello , world !"]).unwrap();
    assert_eq!(text_of(&module, "Test"), "hello, world!");
}

/// A multi-line body ends at a blank line; its line breaks survive.
#[test]
fn multi_line_body() {
    let module = Module::new("test");
    module
        .add_definitions(&["Test:\nfirst line\nsecond line\n\n"])
        .unwrap();
    assert_eq!(text_of(&module, "Test"), "first line\nsecond line");
}

/// Methods dispatch on argument patterns; an unmatched must-succeed call
/// raises CallFailed.
#[test]
fn pattern_dispatch() {
    let module = Module::new("test");
    module.add_definitions(&["F 1: one", "F 2: two"]).unwrap();
    let (text, _) = module
        .call(&State::empty(), "F", &[Object::Int(1)])
        .unwrap();
    assert_eq!(text.as_deref(), Some("one"));
    let (text, _) = module
        .call(&State::empty(), "F", &[Object::Int(2)])
        .unwrap();
    assert_eq!(text.as_deref(), Some("two"));

    let error = module
        .call(&State::empty(), "F", &[Object::Int(3)])
        .unwrap_err();
    assert_eq!(error.kind, ExcKind::CallFailed);
}

/// An argument bound by the pattern is mentioned back out of the body.
#[test]
fn pattern_binds_and_mentions() {
    let module = Module::new("test");
    module.add_definitions(&["Test ?x: got ?x"]).unwrap();
    let (text, _) = module
        .call(&State::empty(), "Test", &[Object::Text("it".into())])
        .unwrap();
    assert_eq!(text.as_deref(), Some("got it"));
}

/// Redefining a task in a later batch replaces its methods, arity included.
#[test]
fn redefinition_replaces_methods() {
    let module = Module::new("test");
    module.add_definitions(&["Test ?x: got ?x"]).unwrap();
    module
        .add_definitions(&["Test: [StringForm 123 ?x] ?x"])
        .unwrap();
    assert_eq!(text_of(&module, "Test"), "123");
}

/// A binding made inside a callee flows back up through the shared trail.
#[test]
fn upward_unification() {
    let module = Module::new("test");
    module
        .add_definitions(&[
            "Up ?y: [= ?y xyz]",
            "Down ?y: ?y matched",
            "Test: [Up ?z] [Down ?z]",
        ])
        .unwrap();
    assert_eq!(text_of(&module, "Test"), "xyz matched");
}

/// Arity is enforced at the call site.
#[test]
fn call_arity_mismatch_raises() {
    let module = Module::new("test");
    module.add_definitions(&["F 1: one"]).unwrap();
    let error = module
        .call(&State::empty(), "F", &[Object::Int(1), Object::Int(2)])
        .unwrap_err();
    assert_eq!(error.kind, ExcKind::ArgumentCount);
}

/// Calling a name nothing defines raises UndefinedVariable.
#[test]
fn undefined_task_raises() {
    let module = Module::new("test");
    let error = module.call(&State::empty(), "Missing", &[]).unwrap_err();
    assert_eq!(error.kind, ExcKind::UndefinedVariable);
}

// =============================================================================
// Backtracking
// =============================================================================

/// Facts backtrack: a rejected answer sends the search into the next method.
#[test]
fn facts_backtrack_on_rejection() {
    let module = Module::new("test");
    module
        .add_definitions(&["G 1.", "G 2.", "Test: [G ?x] [= ?x 2] ?x"])
        .unwrap();
    assert_eq!(text_of(&module, "Test"), "2");
}

/// Output emitted along a failed path is rolled back before the alternative
/// runs.
#[test]
fn failed_path_output_is_truncated() {
    let module = Module::new("test");
    module
        .add_definitions(&[
            "[fallible] Try: garbage [Fail]",
            "Test: [firstOf [[Try]] [fallback]]",
        ])
        .unwrap();
    assert_eq!(text_of(&module, "Test"), "fallback");
}

/// firstOf commits to the first alternative whose chain succeeds.
#[test]
fn first_of_takes_first_success() {
    let module = Module::new("test");
    module
        .add_definitions(&["Test: [firstOf [[Fail] one] [two] [three]]"])
        .unwrap();
    assert_eq!(text_of(&module, "Test"), "two");
}

/// The empty [else] clause means "do nothing and continue".
#[test]
fn else_clause_is_empty_alternative() {
    let module = Module::new("test");
    module
        .add_definitions(&["Test: [firstOf [[Fail] x] [else]] done"])
        .unwrap();
    assert_eq!(text_of(&module, "Test"), "done");
}

/// A deterministic task enters at most one method's continuation per call,
/// even when the answer is rejected upstream and another method would match.
#[test]
fn deterministic_cut() {
    let module = Module::new("test");
    module
        .add_definitions(&["D: one", "D: two", "Test: [D] [Fail]"])
        .unwrap();
    let mut tracer = RecordingTracer::new();
    let error = module
        .call_with_tracer(&State::empty(), "Test", &[], &mut tracer)
        .unwrap_err();
    // Test itself never produced a solution, so it raises CallFailed...
    assert_eq!(error.kind, ExcKind::CallFailed);
    // ...and D was entered exactly once despite its second method.
    assert_eq!(tracer.enters("D"), 1);
}

// =============================================================================
// Shuffle
// =============================================================================

/// With a fixed seed, shuffled method order is reproducible call to call.
#[test]
fn seeded_shuffle_is_reproducible() {
    let module = Module::new("test");
    module.set_shuffle_seed(42);
    module
        .add_definitions(&["[randomly] R: a", "R: b", "R: c"])
        .unwrap();
    let first = text_of(&module, "R");
    assert!(["a", "b", "c"].contains(&first.as_str()), "got {first:?}");
    for _ in 0..5 {
        assert_eq!(text_of(&module, "R"), first);
    }
}

/// A shuffled branch picks one alternative; with a seed, always the same one.
#[test]
fn seeded_random_branch() {
    let module = Module::new("test");
    module.set_shuffle_seed(7);
    module
        .add_definitions(&["Test: [randomly [x] [y] [z]]"])
        .unwrap();
    let first = text_of(&module, "Test");
    assert!(["x", "y", "z"].contains(&first.as_str()), "got {first:?}");
    assert_eq!(text_of(&module, "Test"), first);
}

// =============================================================================
// Combinators
// =============================================================================

/// Once commits to the body's first solution and cuts the rest.
#[test]
fn once_cuts_alternatives() {
    let module = Module::new("test");
    module
        .add_definitions(&["Choose a.", "Choose b.", "Test: [Once [Choose ?x]] ?x"])
        .unwrap();
    assert_eq!(text_of(&module, "Test"), "a");
}

/// Once with no solutions is a plain failure.
#[test]
fn once_with_no_solutions_fails() {
    let module = Module::new("test");
    module
        .add_definitions(&["Choose 1.", "[fallible] Test: [Once [Choose 2]] unreachable"])
        .unwrap();
    let (text, state) = module.call(&State::empty(), "Test", &[]).unwrap();
    assert_eq!(text, None);
    assert!(state.is_empty());
}

/// ExactlyOnce raises CallFailed when the body has no solutions.
#[test]
fn exactly_once_raises_when_empty() {
    let module = Module::new("test");
    module
        .add_definitions(&["Choose 1.", "Test: [ExactlyOnce [Choose 2]]"])
        .unwrap();
    let error = module.call(&State::empty(), "Test", &[]).unwrap_err();
    assert_eq!(error.kind, ExcKind::CallFailed);
}

/// DoAll concatenates the output of every solution, in search order.
#[test]
fn do_all_concatenates_in_order() {
    let module = Module::new("test");
    module
        .add_definitions(&[
            "Pick a.",
            "Pick b.",
            "Pick c.",
            "Say ?x: ?x",
            "Test: [DoAll [Pick ?x] [Say ?x]]",
        ])
        .unwrap();
    assert_eq!(text_of(&module, "Test"), "a b c");
}

/// DoAll with an empty solution set still succeeds, once, with no output.
#[test]
fn do_all_without_solutions_succeeds() {
    let module = Module::new("test");
    module
        .add_definitions(&["Pick 1.", "Test: [DoAll [Pick 2]] done"])
        .unwrap();
    assert_eq!(text_of(&module, "Test"), "done");
}

/// DoAll does not leak inner unifications: the mention after it sees the
/// variable still unbound.
#[test]
fn do_all_keeps_outer_bindings() {
    let module = Module::new("test");
    module
        .add_definitions(&["Pick a.", "Test: [DoAll [Pick ?x]] ?x"])
        .unwrap();
    assert_eq!(text_of(&module, "Test"), "?x");
}

/// Max iterates every solution and keeps the best-scoring one's bindings.
#[test]
fn max_selects_best() {
    let module = Module::new("test");
    module
        .add_definitions(&[
            "S 1 10.",
            "S 2 20.",
            "S 3 5.",
            "Test ?best: [Max ?score [S ?best ?score]]",
        ])
        .unwrap();
    let best: i64 = module.call_function(&State::empty(), "Test", &[]).unwrap();
    assert_eq!(best, 2);
}

/// Min keeps the lowest-scoring solution instead.
#[test]
fn min_selects_lowest() {
    let module = Module::new("test");
    module
        .add_definitions(&[
            "S 1 10.",
            "S 2 20.",
            "S 3 5.",
            "Test ?best: [Min ?score [S ?best ?score]]",
        ])
        .unwrap();
    let best: i64 = module.call_function(&State::empty(), "Test", &[]).unwrap();
    assert_eq!(best, 3);
}

/// Max replays the captured solution's output, not the last one searched.
#[test]
fn max_replays_best_output() {
    let module = Module::new("test");
    module
        .add_definitions(&[
            "S 1 10.",
            "S 2 20.",
            "S 3 5.",
            "Say ?x: chose ?x",
            "Test: [Max ?score [S ?best ?score] [Say ?best]]",
        ])
        .unwrap();
    assert_eq!(text_of(&module, "Test"), "chose 2");
}

/// An unbound score variable at solution time is ArgumentInstantiation.
#[test]
fn max_unbound_score_raises() {
    let module = Module::new("test");
    module
        .add_definitions(&["S 1.", "Test: [Max ?score [S ?x]]"])
        .unwrap();
    let error = module.call(&State::empty(), "Test", &[]).unwrap_err();
    assert_eq!(error.kind, ExcKind::ArgumentInstantiation);
}

/// A non-numeric score is ArgumentType.
#[test]
fn max_non_numeric_score_raises() {
    let module = Module::new("test");
    module
        .add_definitions(&["S word.", "Test: [Max ?score [S ?score]]"])
        .unwrap();
    let error = module.call(&State::empty(), "Test", &[]).unwrap_err();
    assert_eq!(error.kind, ExcKind::ArgumentType);
}

// =============================================================================
// Errors
// =============================================================================

/// Throw raises an error whose payload preserves the argument tokens.
#[test]
fn throw_preserves_payload() {
    let module = Module::new("test");
    module.add_definitions(&["Test: [Throw a b c]"]).unwrap();
    let error = module.call(&State::empty(), "Test", &[]).unwrap_err();
    assert_eq!(error.kind, ExcKind::Thrown);
    assert_eq!(error.message, "a b c");
}

/// Errors carry the method activations live at the raise site, innermost
/// first.
#[test]
fn error_carries_stack_frames() {
    let module = Module::new("test");
    module
        .add_definitions(&["Outer: [Inner]", "Inner: [Throw boom]"])
        .unwrap();
    let error = module.call(&State::empty(), "Outer", &[]).unwrap_err();
    let tasks: Vec<&str> = error.frames.iter().map(|f| f.task.as_str()).collect();
    assert_eq!(tasks, ["Inner", "Outer"]);
}

/// A combinator body must be made of call tuples.
#[test]
fn combinator_body_rejects_non_calls() {
    let module = Module::new("test");
    module.add_definitions(&["Test: [Once 5]"]).unwrap();
    let error = module.call(&State::empty(), "Test", &[]).unwrap_err();
    assert_eq!(error.kind, ExcKind::ArgumentType);
}

// =============================================================================
// Tracing
// =============================================================================

/// The recording tracer observes enters, successes, and method failures.
#[test]
fn tracer_records_events() {
    let module = Module::new("test");
    module
        .add_definitions(&["G 1.", "G 2.", "Test: [G ?x] [= ?x 2] ?x"])
        .unwrap();
    let mut tracer = RecordingTracer::new();
    let (text, _) = module
        .call_with_tracer(&State::empty(), "Test", &[], &mut tracer)
        .unwrap();
    assert_eq!(text.as_deref(), Some("2"));
    // Both G methods were activated: the first was rejected, the second kept.
    assert_eq!(tracer.enters("G"), 2);
    assert_eq!(tracer.enters("Test"), 1);
}
