//! Ordered list of weak references.
//!
//! # Invariants
//!
//! 1. Iteration yields live objects in insertion order.
//! 2. Iteration, `len` and `contains` physically remove dead entries before
//!    answering. `len` is therefore O(n) and takes `&mut self`; it is never
//!    cached.
//! 3. `remove` never fails: an object that is absent (or already dropped)
//!    is simply not there.

use std::fmt;
use std::ops::Range;
use std::rc::{Rc, Weak};

use crate::{rc_addr, weak_addr};

/// A list that only keeps weak references to its items.
pub struct WeakList<T: ?Sized> {
    data: Vec<Weak<T>>,
}

impl<T: ?Sized> WeakList<T> {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Append a weak reference to `item`.
    pub fn push(&mut self, item: &Rc<T>) {
        self.data.push(Rc::downgrade(item));
    }

    /// Append weak references to every item.
    pub fn extend<'a, I>(&mut self, items: I)
    where
        I: IntoIterator<Item = &'a Rc<T>>,
        T: 'a,
    {
        self.data.extend(items.into_iter().map(Rc::downgrade));
    }

    /// Live items in order. Dead entries are pruned first.
    pub fn iter(&mut self) -> std::vec::IntoIter<Rc<T>> {
        let mut live = Vec::with_capacity(self.data.len());
        self.data.retain(|w| match w.upgrade() {
            Some(item) => {
                live.push(item);
                true
            }
            None => false,
        });
        live.into_iter()
    }

    /// Number of live items. Prunes dead entries.
    pub fn len(&mut self) -> usize {
        self.prune();
        self.data.len()
    }

    /// Whether no live item remains. Prunes dead entries.
    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// Whether `item` is in the list.
    pub fn contains(&mut self, item: &Rc<T>) -> bool {
        self.prune();
        let addr = rc_addr(item);
        self.data.iter().any(|w| weak_addr(w) == addr)
    }

    /// Remove the first occurrence of `item`, pruning dead entries met on
    /// the way. Does nothing if `item` is not in the list.
    pub fn remove(&mut self, item: &Rc<T>) {
        let addr = rc_addr(item);
        let mut i = 0;
        while i < self.data.len() {
            let entry = &self.data[i];
            if entry.strong_count() == 0 {
                self.data.remove(i);
            } else if weak_addr(entry) == addr {
                self.data.remove(i);
                return;
            } else {
                i += 1;
            }
        }
    }

    /// The item stored at raw position `index`, if that slot exists and its
    /// referent is alive. Positions count dead entries not yet pruned.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Rc<T>> {
        self.data.get(index).and_then(Weak::upgrade)
    }

    /// Replace the slot at raw position `index` with a weak reference to
    /// `item`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds, like slice indexing.
    pub fn set(&mut self, index: usize, item: &Rc<T>) {
        self.data[index] = Rc::downgrade(item);
    }

    /// Remove the slot at raw position `index`, returning its referent if it
    /// was alive.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds, like [`Vec::remove`].
    pub fn remove_at(&mut self, index: usize) -> Option<Rc<T>> {
        self.data.remove(index).upgrade()
    }

    /// A new list holding the live items of the raw slots in `range`.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds, like slice indexing.
    #[must_use]
    pub fn slice(&self, range: Range<usize>) -> Self {
        Self {
            data: self.data[range]
                .iter()
                .filter(|w| w.strong_count() > 0)
                .cloned()
                .collect(),
        }
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    fn prune(&mut self) {
        self.data.retain(|w| w.strong_count() > 0);
    }
}

impl<T: ?Sized> Default for WeakList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for WeakList<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

impl<'a, T: ?Sized + 'a> FromIterator<&'a Rc<T>> for WeakList<T> {
    fn from_iter<I: IntoIterator<Item = &'a Rc<T>>>(iter: I) -> Self {
        let mut list = Self::new();
        list.extend(iter);
        list
    }
}

impl<T: ?Sized> fmt::Debug for WeakList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let live = self.data.iter().filter(|w| w.strong_count() > 0).count();
        f.debug_struct("WeakList")
            .field("slots", &self.data.len())
            .field("live", &live)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Stub(u32);

    #[test]
    fn dropped_items_disappear() {
        let mut list = WeakList::new();
        let s1 = Rc::new(Stub(1));
        list.push(&s1);
        assert_eq!(list.get(0).map(|s| s.0), Some(1));
        assert!(list.contains(&s1));
        assert_eq!(list.len(), 1);
        drop(s1);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn remove_and_clear() {
        let mut list = WeakList::new();
        let s2 = Rc::new(Stub(2));
        list.push(&s2);
        assert_eq!(list.len(), 1);
        list.remove(&s2);
        assert_eq!(list.len(), 0);
        // Removing again is not an error.
        list.remove(&s2);

        list.push(&s2);
        list.clear();
        assert!(list.is_empty());
    }

    #[test]
    fn remove_only_first_occurrence() {
        let mut list = WeakList::new();
        let s = Rc::new(Stub(1));
        list.push(&s);
        list.push(&s);
        list.remove(&s);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn remove_prunes_dead_entries_on_the_way() {
        let mut list = WeakList::new();
        let dead = Rc::new(Stub(0));
        let keep = Rc::new(Stub(1));
        let target = Rc::new(Stub(2));
        list.push(&dead);
        list.push(&keep);
        list.push(&target);
        drop(dead);
        list.remove(&target);
        assert_eq!(list.iter().map(|s| s.0).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn slice_only_keeps_live_items() {
        let mut list = WeakList::new();
        let s1 = Rc::new(Stub(1));
        list.push(&s1);
        assert_eq!(list.slice(0..1).len(), 1);
        drop(s1);
        assert_eq!(list.slice(0..1).len(), 0);
    }

    #[test]
    fn works_with_closures() {
        let mut list: WeakList<dyn Fn() -> u32> = WeakList::new();
        let f: Rc<dyn Fn() -> u32> = Rc::new(|| 7);
        list.push(&f);
        assert_eq!(list.iter().map(|f| (*f)()).collect::<Vec<_>>(), vec![7]);
        drop(f);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn extend_and_set() {
        let s0 = Rc::new(Stub(0));
        let s1 = Rc::new(Stub(1));
        let mut list: WeakList<Stub> = [&s0, &s1].into_iter().collect();
        assert_eq!(list.len(), 2);

        let s2 = Rc::new(Stub(2));
        list.set(0, &s2);
        assert_eq!(list.get(0), Some(Rc::clone(&s2)));
        assert_eq!(list.remove_at(1).map(|s| s.0), Some(1));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn iteration_preserves_order() {
        let items: Vec<_> = (0..5).map(|i| Rc::new(Stub(i))).collect();
        let mut list: WeakList<Stub> = items.iter().collect();
        let seen: Vec<u32> = list.iter().map(|s| s.0).collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }
}
