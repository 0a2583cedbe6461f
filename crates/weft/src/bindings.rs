//! Persistent binding lists: the local trail and the dynamic state.
//!
//! Both are singly-linked lists of `(variable, value)` cells behind `Rc`.
//! Extending conses a new head in O(1) and never touches existing cells, so a
//! retained continuation can keep an older list alive while newer ones extend
//! it; failing forward simply drops the extension. Lookup walks from the head
//! and returns the first match, giving the "newest binding wins" shadowing the
//! search relies on.
//!
//! Do not replace these with a hash map: the branch-and-backtrack pattern
//! depends on O(1) extension and free sharing of prefixes.

use std::rc::Rc;

use crate::{intern::StateVarId, term::LogicVar, term::Term};

/// Key of a binding cell. The trail keys by logic-variable identity, the
/// dynamic state by interned name id.
pub(crate) trait BindingKey: Clone {
    fn same_key(&self, other: &Self) -> bool;
}

impl BindingKey for LogicVar {
    #[inline]
    fn same_key(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl BindingKey for StateVarId {
    #[inline]
    fn same_key(&self, other: &Self) -> bool {
        self == other
    }
}

/// A persistent list of bindings. Cloning is an `Rc` bump.
#[derive(Debug)]
pub(crate) struct BindingList<K>(Option<Rc<BindingCell<K>>>);

#[derive(Debug)]
struct BindingCell<K> {
    key: K,
    value: Term,
    rest: BindingList<K>,
}

// Derived Clone would require K: Clone on the *cell*; hand-rolled keeps the
// handle clone a plain Rc bump for any K.
impl<K> Clone for BindingList<K> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<K> Default for BindingList<K> {
    fn default() -> Self {
        Self(None)
    }
}

impl<K: BindingKey> BindingList<K> {
    pub const fn empty() -> Self {
        Self(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Non-destructive extension: returns a new list whose head binds `key`.
    /// `self` is untouched and still observes the old bindings.
    pub fn bind(&self, key: K, value: Term) -> Self {
        Self(Some(Rc::new(BindingCell {
            key,
            value,
            rest: self.clone(),
        })))
    }

    /// First binding for `key`, newest first.
    pub fn lookup(&self, key: &K) -> Option<&Term> {
        let mut cursor = self;
        while let Some(cell) = &cursor.0 {
            if cell.key.same_key(key) {
                return Some(&cell.value);
            }
            cursor = &cell.rest;
        }
        None
    }

    /// Iterates cells newest-first.
    pub fn iter(&self) -> BindingIter<'_, K> {
        BindingIter { cursor: self }
    }
}

pub(crate) struct BindingIter<'a, K> {
    cursor: &'a BindingList<K>,
}

impl<'a, K> Iterator for BindingIter<'a, K> {
    type Item = (&'a K, &'a Term);

    fn next(&mut self) -> Option<Self::Item> {
        let cell = self.cursor.0.as_deref()?;
        self.cursor = &cell.rest;
        Some((&cell.key, &cell.value))
    }
}

/// Bindings of local logic variables made along the current search path.
pub(crate) type Trail = BindingList<LogicVar>;

/// Bindings of state variables threaded through a top-level call.
pub(crate) type DynamicState = BindingList<StateVarId>;
