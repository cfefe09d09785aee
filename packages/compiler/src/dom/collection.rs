//! Ordered collections with unique names.

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeSeq, Serializer};

use crate::error::{CompileError, Result};

/// Anything stored in a [`NamedCollection`].
pub trait Named {
    /// Element label used in duplicate-name errors (`DataModel`, `State`, ...).
    const KIND: &'static str;

    fn name(&self) -> &str;
}

/// Ordered set of uniquely named items.
///
/// Insertion order is preserved; for data elements it is the wire layout.
/// Items must not be renamed through [`NamedCollection::get_mut`], since the
/// index is keyed on the name at insertion time.
#[derive(Debug, Clone)]
pub struct NamedCollection<T> {
    items: IndexMap<String, T>,
}

impl<T: Named> NamedCollection<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: IndexMap::new(),
        }
    }

    /// Append an item, rejecting duplicate names.
    pub fn insert(&mut self, item: T) -> Result<()> {
        self.insert_in(item, None)
    }

    /// Append an item, naming the owner in the duplicate-name error.
    pub fn insert_scoped(&mut self, item: T, scope: &str) -> Result<()> {
        self.insert_in(item, Some(scope))
    }

    fn insert_in(&mut self, item: T, scope: Option<&str>) -> Result<()> {
        if self.items.contains_key(item.name()) {
            return Err(CompileError::DuplicateName {
                kind: T::KIND.to_string(),
                name: item.name().to_string(),
                scope: scope.map(str::to_string),
            });
        }
        self.items.insert(item.name().to_string(), item);
        Ok(())
    }

    /// Replace the item with the same name in place, or append it.
    ///
    /// Returns the replaced item.
    pub fn replace(&mut self, item: T) -> Option<T> {
        match self.items.get_mut(item.name()) {
            Some(slot) => Some(std::mem::replace(slot, item)),
            None => {
                self.items.insert(item.name().to_string(), item);
                None
            }
        }
    }

    /// Remove an item, keeping the order of the rest.
    pub fn remove(&mut self, name: &str) -> Option<T> {
        self.items.shift_remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&T> {
        self.items.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.items.get_mut(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    /// Index of the named item in insertion order.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.items.get_index_of(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.values_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.items.first().map(|(_, item)| item)
    }

    /// First free name of the form `base`, `base_1`, `base_2`, ...
    ///
    /// # Examples
    /// ```
    /// use pit_compiler::dom::{NamedCollection, State};
    ///
    /// let mut states: NamedCollection<State> = NamedCollection::new();
    /// assert_eq!(states.unique_name("State"), "State");
    /// states.insert(State::new("State")).unwrap();
    /// assert_eq!(states.unique_name("State"), "State_1");
    /// ```
    #[must_use]
    pub fn unique_name(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }
}

impl<T: Named> Default for NamedCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Named + PartialEq> PartialEq for NamedCollection<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<T: Serialize> Serialize for NamedCollection<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.items.len()))?;
        for item in self.items.values() {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}

impl<'a, T: Named> IntoIterator for &'a NamedCollection<T> {
    type Item = &'a T;
    type IntoIter = indexmap::map::Values<'a, String, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.values()
    }
}

impl<T: Named> IntoIterator for NamedCollection<T> {
    type Item = T;
    type IntoIter = indexmap::map::IntoValues<String, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_values()
    }
}
