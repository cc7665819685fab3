//! Unordered set of weak references.
//!
//! Membership is allocation identity. Iteration and `len` prune dead entries
//! physically, same as [`WeakList`](crate::WeakList).

use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::rc_addr;

/// A set that only keeps weak references to its members.
pub struct WeakSet<T: ?Sized> {
    /// Keyed by allocation address. The stored `Weak` pins the allocation,
    /// so a key cannot be reused while its entry exists.
    data: HashMap<usize, Weak<T>>,
}

impl<T: ?Sized> WeakSet<T> {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Add `item`. Returns `false` if it was already a member.
    pub fn insert(&mut self, item: &Rc<T>) -> bool {
        self.data
            .insert(rc_addr(item), Rc::downgrade(item))
            .is_none()
    }

    /// Remove `item`. Returns whether it was a member.
    pub fn remove(&mut self, item: &Rc<T>) -> bool {
        self.data.remove(&rc_addr(item)).is_some()
    }

    /// Whether `item` is a member.
    #[must_use]
    pub fn contains(&self, item: &Rc<T>) -> bool {
        self.data.contains_key(&rc_addr(item))
    }

    /// Live members, in no particular order. Dead entries are pruned first.
    pub fn iter(&mut self) -> std::vec::IntoIter<Rc<T>> {
        let mut live = Vec::with_capacity(self.data.len());
        self.data.retain(|_, w| match w.upgrade() {
            Some(item) => {
                live.push(item);
                true
            }
            None => false,
        });
        live.into_iter()
    }

    /// Number of live members. Prunes dead entries.
    pub fn len(&mut self) -> usize {
        self.data.retain(|_, w| w.strong_count() > 0);
        self.data.len()
    }

    /// Whether no live member remains. Prunes dead entries.
    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// Remove every member.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// A new set with the members of `self` plus `items`.
    #[must_use]
    pub fn union<'a, I>(&self, items: I) -> Self
    where
        I: IntoIterator<Item = &'a Rc<T>>,
        T: 'a,
    {
        let mut result = self.clone();
        for item in items {
            result.insert(item);
        }
        result
    }

    /// A new set with the members of `self` that are not in `items`.
    #[must_use]
    pub fn difference<'a, I>(&self, items: I) -> Self
    where
        I: IntoIterator<Item = &'a Rc<T>>,
        T: 'a,
    {
        let mut result = self.clone();
        for item in items {
            result.remove(item);
        }
        result
    }
}

impl<T: ?Sized> Default for WeakSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for WeakSet<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

impl<'a, T: ?Sized + 'a> FromIterator<&'a Rc<T>> for WeakSet<T> {
    fn from_iter<I: IntoIterator<Item = &'a Rc<T>>>(iter: I) -> Self {
        let mut set = Self::new();
        for item in iter {
            set.insert(item);
        }
        set
    }
}

impl<T: ?Sized> fmt::Debug for WeakSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSet")
            .field("entries", &self.data.len())
            .finish()
    }
}
