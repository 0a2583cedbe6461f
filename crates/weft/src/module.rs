//! Named storage of tasks and state, and the top-level entry points.
//!
//! A module maps state-variable names to values: compound tasks, primitives,
//! and plain data all live in the same dictionary. Lookup walks the module's
//! own dictionary, then the parent chain, then bind hooks in the same order;
//! the first hook that supplies a value has it cached in the module where
//! the lookup originated, so derived values shadow the parent afterwards.
//! Defaults sit behind everything - that is where the `Mention` -> `Write`
//! fallback lives, as an ordinary table entry rather than a name comparison.

use std::{
    cell::{Cell, RefCell},
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    bindings::{DynamicState, Trail},
    builtins::{Builtin, HostKind, HostPrimitive, PrimitiveTask},
    exception_private::Unwind,
    exception_public::{ExcKind, Exception},
    intern::{Interner, KnownName, StateVarId},
    machine::{Env, Machine},
    object::Object,
    parse::{Definition, parse_definitions},
    step::{invoke_task, run_chain},
    task::{CompoundTask, Method, TaskFlags, TaskHandle},
    term::{LogicVar, Term},
    tracer::{NoopTracer, Tracer},
    unify::copy_term,
};

/// A hook consulted when a state-variable lookup finds no binding.
pub type BindHook = Box<dyn Fn(&str) -> Option<Object>>;

/// The dynamic state threaded through a top-level call and handed back on
/// success. Persistent: keeping an old `State` and calling again from it is
/// cheap and safe.
#[derive(Debug, Clone, Default)]
pub struct State {
    bindings: DynamicState,
    interner: Option<Rc<Interner>>,
}

impl State {
    /// The state with no bindings; also what a failed call returns.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// The value bound to `name` in this state, newest binding first.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Object> {
        let interner = self.interner.as_ref()?;
        let id = interner.get(name)?;
        self.bindings
            .lookup(&id)
            .map(|term| Object::from_term(term, interner))
    }

    pub(crate) fn bindings(&self) -> &DynamicState {
        &self.bindings
    }

    fn with(bindings: DynamicState, interner: Rc<Interner>) -> Self {
        Self {
            bindings,
            interner: Some(interner),
        }
    }
}

/// A collection of task definitions and global state.
///
/// Modules form a parent chain; children see everything their ancestors
/// define and may shadow it. All evaluation entry points live here.
/// Single-threaded by design: two concurrent calls on one module are not
/// supported, matching the engine's cooperative model.
pub struct Module {
    name: String,
    interner: Rc<Interner>,
    vars: RefCell<IndexMap<StateVarId, Term>>,
    defaults: RefCell<AHashMap<StateVarId, Term>>,
    parent: Option<Rc<Module>>,
    hooks: RefCell<Vec<BindHook>>,
    shuffle_seed: Cell<Option<u64>>,
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("vars", &self.vars.borrow().len())
            .field("parent", &self.parent.as_ref().map(|p| p.name.clone()))
            .finish_non_exhaustive()
    }
}

impl Module {
    /// Creates a root module with the engine builtins registered.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        let module = Rc::new(Self {
            name: name.into(),
            interner: Rc::new(Interner::new()),
            vars: RefCell::new(IndexMap::new()),
            defaults: RefCell::new(AHashMap::new()),
            parent: None,
            hooks: RefCell::new(Vec::new()),
            shuffle_seed: Cell::new(None),
        });
        module.install_builtins();
        module
    }

    /// Creates a child module sharing the parent's interner and seeing its
    /// definitions through the lookup chain.
    #[must_use]
    pub fn with_parent(name: impl Into<String>, parent: &Rc<Self>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            interner: parent.interner.clone(),
            vars: RefCell::new(IndexMap::new()),
            defaults: RefCell::new(AHashMap::new()),
            parent: Some(parent.clone()),
            hooks: RefCell::new(Vec::new()),
            shuffle_seed: Cell::new(parent.shuffle_seed.get()),
        })
    }

    fn install_builtins(&self) {
        let builtins = [
            (KnownName::Write, Builtin::Write),
            (KnownName::StringForm, Builtin::StringForm),
            (KnownName::Throw, Builtin::Throw),
            (KnownName::Fail, Builtin::Fail),
            (KnownName::DoAll, Builtin::DoAll),
            (KnownName::Once, Builtin::Once),
            (KnownName::ExactlyOnce, Builtin::ExactlyOnce),
            (KnownName::Max, Builtin::Max),
            (KnownName::Min, Builtin::Min),
        ];
        let mut vars = self.vars.borrow_mut();
        for (name, builtin) in builtins {
            vars.insert(name.into(), Term::Primitive(PrimitiveTask::Builtin(builtin)));
        }
        // Mentioning a value with no user-defined Mention task writes it.
        self.defaults.borrow_mut().insert(
            KnownName::Mention.into(),
            Term::Primitive(PrimitiveTask::Builtin(Builtin::Write)),
        );
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn interner(&self) -> &Interner {
        &self.interner
    }

    /// Fixes the RNG seed used for shuffled methods and branches, making
    /// shuffled order reproducible call to call.
    pub fn set_shuffle_seed(&self, seed: u64) {
        self.shuffle_seed.set(Some(seed));
    }

    pub(crate) fn shuffle_seed(&self) -> Option<u64> {
        self.shuffle_seed.get()
    }

    /// Full lookup: dictionary chain, then hooks (with caching), then the
    /// default-bindings table.
    pub(crate) fn lookup(&self, id: StateVarId) -> Option<Term> {
        if let Some(value) = self.lookup_dict(id) {
            return Some(value);
        }
        if let Some(value) = self.lookup_hooks(id) {
            // Cache in the initiating module, not the hook's owner.
            self.vars.borrow_mut().insert(id, value.clone());
            return Some(value);
        }
        self.lookup_defaults(id)
    }

    fn lookup_dict(&self, id: StateVarId) -> Option<Term> {
        if let Some(value) = self.vars.borrow().get(&id) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.lookup_dict(id))
    }

    fn lookup_hooks(&self, id: StateVarId) -> Option<Term> {
        let name = self.interner.name(id);
        let mut module = Some(self);
        while let Some(current) = module {
            for hook in current.hooks.borrow().iter() {
                if let Some(object) = hook(&name) {
                    let mut serial = 0u64;
                    return Some(object.to_term(&mut |display| {
                        serial += 1;
                        LogicVar::fresh(display, serial)
                    }));
                }
            }
            module = current.parent.as_deref();
        }
        None
    }

    fn lookup_defaults(&self, id: StateVarId) -> Option<Term> {
        if let Some(value) = self.defaults.borrow().get(&id) {
            return Some(value.clone());
        }
        self.parent
            .as_ref()
            .and_then(|parent| parent.lookup_defaults(id))
    }

    /// The value of `name` as seen from this module, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Object> {
        let id = self.interner.get(name)?;
        self.lookup(id)
            .map(|term| Object::from_term(&term, &self.interner))
    }

    /// Binds `name` in this module's dictionary, shadowing any parent.
    pub fn set(&self, name: &str, value: Object) {
        let id = self.interner.intern(name);
        let mut serial = 0u64;
        let term = value.to_term(&mut |display| {
            serial += 1;
            LogicVar::fresh(display, serial)
        });
        self.vars.borrow_mut().insert(id, term);
    }

    /// Whether `name` is bound in this module's dictionary chain (hooks are
    /// not consulted).
    #[must_use]
    pub fn defines(&self, name: &str) -> bool {
        self.interner
            .get(name)
            .is_some_and(|id| self.lookup_dict(id).is_some())
    }

    /// Registers a hook consulted when lookup finds no binding.
    pub fn add_bind_hook(&self, hook: BindHook) {
        self.hooks.borrow_mut().push(hook);
    }

    /// Registers a host primitive of the deterministic text-generator shape.
    pub fn add_text_generator(
        &self,
        name: &str,
        generate: impl Fn(&[Object]) -> Result<Vec<String>, Exception> + 'static,
    ) {
        self.add_host_primitive(name, HostKind::TextGenerator(Box::new(generate)));
    }

    /// Registers a host primitive of the predicate shape.
    pub fn add_predicate(
        &self,
        name: &str,
        test: impl Fn(&[Object]) -> Result<bool, Exception> + 'static,
    ) {
        self.add_host_primitive(name, HostKind::Predicate(Box::new(test)));
    }

    fn add_host_primitive(&self, name: &str, kind: HostKind) {
        let id = self.interner.intern(name);
        let primitive = PrimitiveTask::Host(Rc::new(HostPrimitive {
            name: name.to_owned(),
            kind,
        }));
        self.vars.borrow_mut().insert(id, Term::Primitive(primitive));
    }

    /// Finds the compound task under `name`, optionally creating an empty
    /// one with the given arity in this module.
    pub(crate) fn find_task(
        &self,
        name: &str,
        arity: usize,
        create: bool,
    ) -> Result<Option<TaskHandle>, Exception> {
        let id = self.interner.intern(name);
        match self.lookup_dict(id) {
            Some(Term::Compound(handle)) => Ok(Some(handle)),
            Some(Term::Primitive(_)) => Err(Exception::new(
                ExcKind::ArgumentType,
                format!("{name} is a primitive and cannot take methods"),
            )),
            Some(_) => Err(Exception::new(
                ExcKind::ArgumentType,
                format!("{name} is bound to a value, not a task"),
            )),
            None if create => {
                let handle: TaskHandle = Rc::new(RefCell::new(CompoundTask::new(id, arity)));
                self.vars
                    .borrow_mut()
                    .insert(id, Term::Compound(handle.clone()));
                Ok(Some(handle))
            }
            None => Ok(None),
        }
    }

    /// The first task flagged `[main]` in this module, in definition order.
    /// Hosts use this to pick the entry point of a loaded program.
    #[must_use]
    pub fn main_task(&self) -> Option<String> {
        for (id, value) in self.vars.borrow().iter() {
            if let Term::Compound(handle) = value {
                if handle.borrow().flags.contains(TaskFlags::MAIN) {
                    return Some(self.interner.name(*id).to_string());
                }
            }
        }
        self.parent.as_ref().and_then(|parent| parent.main_task())
    }

    /// Removes every method of `name` and resets its flags. A no-op when the
    /// module does not define the task itself.
    pub fn erase_methods(&self, name: &str) {
        let Some(id) = self.interner.get(name) else {
            return;
        };
        let handle = match self.vars.borrow().get(&id) {
            Some(Term::Compound(handle)) => handle.clone(),
            _ => return,
        };
        handle.borrow_mut().erase_methods();
    }

    /// Parses and installs definitions. Within one call, methods of the same
    /// task accumulate; a task defined in an earlier batch has its methods
    /// replaced, which is the engine's only reload semantics.
    pub fn add_definitions(&self, sources: &[&str]) -> Result<(), Exception> {
        let mut definitions = Vec::new();
        for source in sources {
            definitions.extend(parse_definitions(source, None, &self.interner)?);
        }
        self.install(definitions, None)
    }

    /// Loads a `.step` file.
    pub fn load_definitions(&self, path: &Path) -> Result<(), Exception> {
        let source = fs::read_to_string(path).map_err(|e| {
            Exception::new(
                ExcKind::SyntaxError,
                format!("cannot read {}: {e}", path.display()),
            )
        })?;
        let rendered = path.display().to_string();
        let definitions = parse_definitions(&source, Some(&rendered), &self.interner)?;
        self.install(definitions, Some(&rendered))
    }

    /// Loads every `.step` file in `path`, sorted by file name so load order
    /// is reproducible; descends into subdirectories when `recursive`.
    pub fn load_directory(&self, path: &Path, recursive: bool) -> Result<(), Exception> {
        let entries = fs::read_dir(path).map_err(|e| {
            Exception::new(
                ExcKind::SyntaxError,
                format!("cannot read directory {}: {e}", path.display()),
            )
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        paths.sort();
        for entry in paths {
            if entry.is_dir() {
                if recursive {
                    self.load_directory(&entry, true)?;
                }
            } else if entry.extension().is_some_and(|ext| ext == "step") {
                self.load_definitions(&entry)?;
            }
        }
        Ok(())
    }

    fn install(&self, definitions: Vec<Definition>, path: Option<&str>) -> Result<(), Exception> {
        let mut replaced: Vec<StateVarId> = Vec::new();
        let mut startup: Vec<Definition> = Vec::new();
        for definition in definitions {
            if definition.task == "initially" {
                startup.push(definition);
                continue;
            }
            let id = self.interner.intern(&definition.task);
            let handle = self
                .find_task(&definition.task, definition.pattern.len(), true)?
                .expect("find_task with create always yields a task");
            let mut task = handle.borrow_mut();
            if !replaced.contains(&id) {
                task.erase_methods();
                task.arity = definition.pattern.len();
                replaced.push(id);
            }
            task.add_flags(definition.flags);
            task.add_method(
                &definition.task,
                Method {
                    pattern: definition.pattern,
                    locals: definition.locals,
                    chain: definition.chain,
                    weight: definition.weight,
                    path: path.map(Rc::from),
                    line: definition.line,
                },
            )?;
        }
        for definition in startup {
            self.run_startup(&definition)?;
        }
        Ok(())
    }

    /// Runs one `initially` body at load time; dynamic bindings that survive
    /// become module state. The pseudo-task itself is not retained.
    fn run_startup(&self, definition: &Definition) -> Result<(), Exception> {
        if !definition.pattern.is_empty() {
            return Err(Exception::new(
                ExcKind::ArgumentCount,
                "initially takes no arguments",
            ));
        }
        let mut tracer = NoopTracer;
        let mut machine = Machine::new(self, &mut tracer);
        let locals: Rc<[LogicVar]> = definition
            .locals
            .iter()
            .map(|name| machine.fresh_var(Some(name.clone())))
            .collect();
        let env = Env {
            trail: Trail::empty(),
            state: DynamicState::empty(),
            locals,
            frame: None,
        };
        let mut captured = None;
        let result = run_chain(&definition.chain, &mut machine, &env, &mut |_m, trail, state| {
            captured = Some((trail, state));
            Ok(true)
        });
        match result {
            Ok(_) => {}
            Err(Unwind::Error(error)) => return Err(error.into()),
            Err(Unwind::Exit(_)) => return Err(escaped_exit()),
        }
        if let Some((trail, state)) = captured {
            let mut vars = self.vars.borrow_mut();
            let mut seen: Vec<StateVarId> = Vec::new();
            for (id, value) in state.iter() {
                if seen.contains(id) {
                    continue;
                }
                seen.push(*id);
                vars.insert(*id, copy_term(value, &trail));
            }
        }
        Ok(())
    }

    /// Calls `task` with `args` from `state`.
    ///
    /// Success yields the generated text and the final dynamic state;
    /// failure of the task is data, `(None, State::empty())`, never an
    /// error. Errors - `CallFailed` from a must-succeed task, type and
    /// arity problems, user throws - surface as `Err`.
    pub fn call(
        &self,
        state: &State,
        task: &str,
        args: &[Object],
    ) -> Result<(Option<String>, State), Exception> {
        self.call_with_tracer(state, task, args, &mut NoopTracer)
    }

    /// [`Module::call`] with an explicit tracer observing the evaluation.
    pub fn call_with_tracer<Tr: Tracer>(
        &self,
        state: &State,
        task: &str,
        args: &[Object],
        tracer: &mut Tr,
    ) -> Result<(Option<String>, State), Exception> {
        let id = self.interner.intern(task);
        let mut machine = Machine::new(self, tracer);
        let arg_terms: Vec<Term> = args
            .iter()
            .map(|arg| arg.to_term(&mut |display| machine.fresh_var(display)))
            .collect();
        let env = Env::root(state.bindings().clone());
        let mut outcome = None;
        let result = invoke_task(
            &Term::State(id),
            &arg_terms,
            &mut machine,
            &env,
            &mut |m, _trail, state| {
                outcome = Some((m.buffer.render(), state));
                Ok(true)
            },
        );
        match result {
            Ok(true) => {
                let (text, bindings) = outcome.expect("success continuation ran");
                Ok((Some(text), State::with(bindings, self.interner.clone())))
            }
            Ok(false) => Ok((None, State::empty())),
            Err(Unwind::Error(error)) => Err(error.into()),
            Err(Unwind::Exit(_)) => Err(escaped_exit()),
        }
    }

    /// Calls `task` as a predicate: output is discarded, the result is
    /// whether a solution was found.
    pub fn call_predicate(
        &self,
        state: &State,
        task: &str,
        args: &[Object],
    ) -> Result<bool, Exception> {
        let id = self.interner.intern(task);
        let mut tracer = NoopTracer;
        let mut machine = Machine::new(self, &mut tracer);
        let arg_terms: Vec<Term> = args
            .iter()
            .map(|arg| arg.to_term(&mut |display| machine.fresh_var(display)))
            .collect();
        let env = Env::root(state.bindings().clone());
        let result = invoke_task(
            &Term::State(id),
            &arg_terms,
            &mut machine,
            &env,
            &mut |_m, _trail, _state| Ok(true),
        );
        match result {
            Ok(found) => Ok(found),
            Err(Unwind::Error(error)) => Err(error.into()),
            Err(Unwind::Exit(_)) => Err(escaped_exit()),
        }
    }

    /// Calls `task` with a fresh variable appended for the result, then
    /// copies that variable out through the final bindings.
    ///
    /// Raises `CallFailed` if the task fails and `ArgumentInstantiation` if
    /// it succeeds without binding the result.
    pub fn call_function<T>(
        &self,
        state: &State,
        task: &str,
        args: &[Object],
    ) -> Result<T, Exception>
    where
        T: TryFrom<Object, Error = Exception>,
    {
        let id = self.interner.intern(task);
        let mut tracer = NoopTracer;
        let mut machine = Machine::new(self, &mut tracer);
        let mut arg_terms: Vec<Term> = args
            .iter()
            .map(|arg| arg.to_term(&mut |display| machine.fresh_var(display)))
            .collect();
        let result_var = machine.fresh_var(Some("result".into()));
        arg_terms.push(Term::Var(result_var.clone()));
        let env = Env::root(state.bindings().clone());
        let mut outcome = None;
        let result = invoke_task(
            &Term::State(id),
            &arg_terms,
            &mut machine,
            &env,
            &mut |_m, trail, _state| {
                outcome = Some(copy_term(&Term::Var(result_var.clone()), &trail));
                Ok(true)
            },
        );
        match result {
            Ok(true) => {
                let value = outcome.expect("success continuation ran");
                if let Term::Var(v) = &value {
                    return Err(Exception::new(
                        ExcKind::ArgumentInstantiation,
                        format!("{task} succeeded without binding its result ({v})"),
                    ));
                }
                T::try_from(Object::from_term(&value, &self.interner))
            }
            Ok(false) => Err(Exception::new(
                ExcKind::CallFailed,
                format!("{task} found no solution"),
            )),
            Err(Unwind::Error(error)) => Err(error.into()),
            Err(Unwind::Exit(_)) => Err(escaped_exit()),
        }
    }

    /// Defines (or redefines) the zero-arity task `TopLevelCall` from `code`
    /// and calls it.
    pub fn parse_and_execute(&self, code: &str) -> Result<(Option<String>, State), Exception> {
        self.erase_methods("TopLevelCall");
        let source = format!("TopLevelCall:\n{code}");
        self.add_definitions(&[source.as_str()])?;
        self.call(&State::empty(), "TopLevelCall", &[])
    }
}

/// A non-local exit reached the call boundary. That is an engine bug: the
/// signal is private to the combinator that raised it.
fn escaped_exit() -> Exception {
    debug_assert!(false, "non-local exit escaped its combinator");
    Exception::new(
        ExcKind::CallFailed,
        "internal error: a non-local exit escaped its combinator",
    )
}
