//! State-variable name interning.
//!
//! State variables are identified by name: two requests for the same name must
//! yield the same identity, and that identity must be shared across a module
//! and all of its children so that parent-chain lookups compare ids, not
//! strings. The interner stores each unique name once and hands out a compact
//! [`StateVarId`] index.
//!
//! Ids are laid out as follows:
//! * 0 to count([`KnownName`]) - names the engine itself refers to, interned
//!   at construction so their ids equal their enum discriminants
//! * everything above - names interned on demand

use std::{cell::RefCell, rc::Rc};

use ahash::AHashMap;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

/// Index into the interner's name table.
///
/// Uses `u32` to save space in terms and binding cells. Two `StateVarId`s are
/// equal exactly when they name the same state variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub(crate) struct StateVarId(u32);

impl StateVarId {
    /// Returns the raw index value.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Names the engine itself looks up or registers.
///
/// These are interned first, in declaration order, so that
/// `StateVarId::from(known).index() == known as usize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
pub(crate) enum KnownName {
    Mention,
    Write,
    StringForm,
    Throw,
    Fail,
    DoAll,
    Once,
    ExactlyOnce,
    Max,
    Min,
    #[strum(serialize = "initially")]
    Initially,
    TopLevelCall,
}

impl From<KnownName> for StateVarId {
    fn from(known: KnownName) -> Self {
        Self(known as u32)
    }
}

/// Interner mapping state-variable names to stable [`StateVarId`]s.
///
/// Owned by the root module and shared (via `Rc`) with every child module, so
/// that an id minted anywhere in the family means the same name everywhere.
/// Interior mutability keeps `intern` callable from `&self` lookups.
#[derive(Debug)]
pub(crate) struct Interner {
    names: RefCell<Vec<Rc<str>>>,
    ids: RefCell<AHashMap<Rc<str>, StateVarId>>,
}

impl Interner {
    pub fn new() -> Self {
        let interner = Self {
            names: RefCell::new(Vec::new()),
            ids: RefCell::new(AHashMap::new()),
        };
        for known in KnownName::iter() {
            let name: &'static str = known.into();
            let id = interner.intern(name);
            debug_assert_eq!(id, StateVarId::from(known));
        }
        interner
    }

    /// Returns the id for `name`, interning it on first sight.
    pub fn intern(&self, name: &str) -> StateVarId {
        if let Some(id) = self.ids.borrow().get(name) {
            return *id;
        }
        let mut names = self.names.borrow_mut();
        let id = StateVarId(u32::try_from(names.len()).expect("interner overflow"));
        let shared: Rc<str> = Rc::from(name);
        names.push(shared.clone());
        self.ids.borrow_mut().insert(shared, id);
        id
    }

    /// Returns the id for `name` only if it has been interned before.
    pub fn get(&self, name: &str) -> Option<StateVarId> {
        self.ids.borrow().get(name).copied()
    }

    /// Returns the name behind `id`. The `Rc` clone is cheap.
    pub fn name(&self, id: StateVarId) -> Rc<str> {
        self.names.borrow()[id.index()].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_same_id() {
        let interner = Interner::new();
        let a = interner.intern("Weather");
        let b = interner.intern("Weather");
        assert_eq!(a, b);
        assert_eq!(&*interner.name(a), "Weather");
    }

    #[test]
    fn known_names_have_fixed_ids() {
        let interner = Interner::new();
        assert_eq!(interner.intern("Mention"), KnownName::Mention.into());
        assert_eq!(interner.intern("initially"), KnownName::Initially.into());
        assert_eq!(interner.get("NotInterned"), None);
    }
}
