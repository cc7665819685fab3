//! Callback registry keyed by callable identity.
//!
//! # Design
//!
//! [`Callback<A>`] stores entries in an insertion-ordered map from
//! [`CallableKey`] to a weak slot, in shared storage (`Rc<RefCell<..>>`).
//! Cloning a `Callback` yields another handle to the same entries.
//!
//! # Invariants
//!
//! 1. One entry per identity key. Registering an existing key replaces the
//!    entry and moves it to the end of the dispatch order.
//! 2. A round dispatches a snapshot taken before the first callable runs.
//!    Callables may register, unregister or fire registries (this one
//!    included); changes are visible from the next round.
//! 3. Dead entries are pruned while the snapshot is taken and by
//!    [`Callback::contains`]. [`Callback::len`] counts entries not yet
//!    pruned.
//! 4. Entries never hold the registry. Tokens hold it weakly.
//!
//! # Failure Modes
//!
//! | Situation | Behavior |
//! |-----------|----------|
//! | a callable returns `Err` | reporter notified, rest of the round skipped, error returned |
//! | receiver dropped before the round | entry pruned silently |
//! | receiver and class disagree (development mode) | `register` returns `MalformedCallable` |
//! | token used after the registry dropped | no-op |

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
#[cfg(feature = "tracing")]
use tracing::{debug, trace};

use crate::callable::{Callable, CallableKey, Invoke, Live, WeakSlot};
use crate::config::CallbackConfig;
use crate::error::{CallResult, CallbackError};

/// Priority given to entries that do not ask for one.
pub const DEFAULT_PRIORITY: i32 = 5;

pub(crate) struct Entry<A> {
    pub(crate) slot: WeakSlot<A>,
    pub(crate) label: &'static str,
    pub(crate) priority: i32,
}

pub(crate) struct Table<A> {
    pub(crate) entries: IndexMap<CallableKey, Entry<A>>,
}

/// Anything callables can be subscribed to.
pub trait Subscribe<A> {
    /// Register `callable`, returning the token that undoes it.
    ///
    /// # Errors
    ///
    /// Whatever the registry rejects the callable with.
    fn subscribe(&self, callable: Callable<A>) -> Result<UnregisterToken<A>, CallbackError>;
}

// ---------------------------------------------------------------------------
// Callback
// ---------------------------------------------------------------------------

/// A registry of weakly held callables invoked in order.
pub struct Callback<A> {
    table: Rc<RefCell<Table<A>>>,
    config: CallbackConfig,
}

impl<A> Clone for Callback<A> {
    fn clone(&self) -> Self {
        Self {
            table: Rc::clone(&self.table),
            config: self.config.clone(),
        }
    }
}

impl<A> Default for Callback<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for Callback<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("entries", &self.table.borrow().entries.len())
            .field("config", &self.config)
            .finish()
    }
}

impl<A> Callback<A> {
    /// Create an empty registry with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CallbackConfig::default())
    }

    /// Create an empty registry.
    #[must_use]
    pub fn with_config(config: CallbackConfig) -> Self {
        Self {
            table: Rc::new(RefCell::new(Table {
                entries: IndexMap::new(),
            })),
            config,
        }
    }

    /// Configuration of this handle.
    #[must_use]
    pub fn config(&self) -> &CallbackConfig {
        &self.config
    }

    /// Register `callable`, replacing any entry with the same identity.
    ///
    /// # Errors
    ///
    /// [`CallbackError::MalformedCallable`] in development mode if the
    /// callable's receiver does not match its declared class.
    pub fn register(&self, callable: Callable<A>) -> Result<UnregisterToken<A>, CallbackError> {
        self.insert(callable, DEFAULT_PRIORITY, |_| None)
    }

    /// Remove the entry for `callable`. Returns whether one was removed.
    ///
    /// The callable's argument type does not matter: only its identity is
    /// used, so a callable registered through
    /// [`register_with`](Self::register_with) can be removed with the
    /// original `Callable<(E, A)>`.
    pub fn unregister<X>(&self, callable: &Callable<X>) -> bool {
        self.unregister_key(callable.key())
    }

    /// Remove the entry stored under `key`. Returns whether one was removed.
    pub fn unregister_key(&self, key: CallableKey) -> bool {
        self.table.borrow_mut().entries.shift_remove(&key).is_some()
    }

    /// Whether `callable` is registered and still resolvable.
    ///
    /// An entry whose receiver was dropped is removed and reported absent.
    pub fn contains<X>(&self, callable: &Callable<X>) -> bool {
        let key = callable.key();
        let mut table = self.table.borrow_mut();
        let alive = table.entries.get(&key).map(|entry| entry.slot.is_alive());
        match alive {
            None => false,
            Some(true) => true,
            Some(false) => {
                table.entries.shift_remove(&key);
                #[cfg(feature = "tracing")]
                trace!(?key, "dropped stale callback entry");
                false
            }
        }
    }

    /// Remove every entry.
    pub fn unregister_all(&self) {
        self.table.borrow_mut().entries.clear();
    }

    /// Number of entries, including dead ones not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.borrow().entries.len()
    }

    /// Whether there are no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every live callable in order with `args`.
    ///
    /// # Errors
    ///
    /// The first error returned by a callable. Callables after it are not
    /// invoked in this round. The configured reporter sees the failure
    /// before it is returned.
    pub fn call(&self, args: &A) -> CallResult {
        for (label, live) in self.snapshot() {
            if let Err(err) = live.invoke(args) {
                #[cfg(feature = "tracing")]
                debug!(callable = label, error = %err, "callback failed");
                self.config.report(label, &err);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Collect live callables in order and prune the dead ones.
    fn snapshot(&self) -> Vec<(&'static str, Live<A>)> {
        let mut table = self.table.borrow_mut();
        let mut live = Vec::with_capacity(table.entries.len());
        table.entries.retain(|_key, entry| match entry.slot.resolve() {
            Some(callable) => {
                live.push((entry.label, callable));
                true
            }
            None => {
                #[cfg(feature = "tracing")]
                trace!(key = ?_key, "pruned dead callback entry");
                false
            }
        });
        live
    }

    /// Shared insertion path. `place` picks the index for the new entry
    /// once any previous entry with the same key has been removed; `None`
    /// appends.
    pub(crate) fn insert(
        &self,
        callable: Callable<A>,
        priority: i32,
        place: impl FnOnce(&IndexMap<CallableKey, Entry<A>>) -> Option<usize>,
    ) -> Result<UnregisterToken<A>, CallbackError> {
        if self.config.development {
            callable.slot().check_consistency().map_err(|reason| {
                #[cfg(feature = "tracing")]
                debug!(callable = callable.label(), %reason, "rejected malformed callable");
                CallbackError::MalformedCallable { reason }
            })?;
        }

        let key = callable.key();
        let entry = Entry {
            slot: callable.slot().clone(),
            label: callable.label(),
            priority,
        };
        {
            let mut table = self.table.borrow_mut();
            table.entries.shift_remove(&key);
            match place(&table.entries) {
                Some(index) => {
                    table.entries.shift_insert(index, key, entry);
                }
                None => {
                    table.entries.insert(key, entry);
                }
            }
        }
        Ok(UnregisterToken {
            table: Rc::downgrade(&self.table),
            key,
        })
    }
}

impl<A: Clone + 'static> Callback<A> {
    /// Register `callable` with extra leading arguments, held strongly.
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn register_with<E: Clone + 'static>(
        &self,
        callable: Callable<(E, A)>,
        extra: E,
    ) -> Result<UnregisterToken<A>, CallbackError> {
        self.register(callable.bind_extra(extra))
    }
}

impl<A> Subscribe<A> for Callback<A> {
    fn subscribe(&self, callable: Callable<A>) -> Result<UnregisterToken<A>, CallbackError> {
        self.register(callable)
    }
}

/// A registry can be subscribed to another registry through
/// [`Callable::object`].
impl<A> Invoke<A> for Callback<A> {
    fn invoke(&self, args: &A) -> CallResult {
        self.call(args)
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// Undoes one registration.
///
/// Holds the registry weakly. Unregistering is idempotent and equivalent to
/// [`Callback::unregister`] with the registered callable.
pub struct UnregisterToken<A> {
    table: Weak<RefCell<Table<A>>>,
    key: CallableKey,
}

impl<A> UnregisterToken<A> {
    /// Remove the registration if it is still present.
    pub fn unregister(&self) {
        if let Some(table) = self.table.upgrade() {
            table.borrow_mut().entries.shift_remove(&self.key);
        }
    }

    /// Identity of the registered callable.
    #[must_use]
    pub fn key(&self) -> CallableKey {
        self.key
    }

    /// Turn the token into a guard that unregisters when dropped.
    #[must_use]
    pub fn guard(self) -> RegistrationGuard<A> {
        RegistrationGuard { token: Some(self) }
    }
}

impl<A> Clone for UnregisterToken<A> {
    fn clone(&self) -> Self {
        Self {
            table: Weak::clone(&self.table),
            key: self.key,
        }
    }
}

impl<A> fmt::Debug for UnregisterToken<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnregisterToken")
            .field("key", &self.key)
            .field("registry_alive", &(self.table.strong_count() > 0))
            .finish()
    }
}

/// Unregisters its callable when dropped.
#[must_use = "dropping the guard unregisters immediately"]
pub struct RegistrationGuard<A> {
    token: Option<UnregisterToken<A>>,
}

impl<A> RegistrationGuard<A> {
    /// Keep the registration and return the plain token.
    pub fn into_token(mut self) -> Option<UnregisterToken<A>> {
        self.token.take()
    }
}

impl<A> Drop for RegistrationGuard<A> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.unregister();
        }
    }
}

impl<A> fmt::Debug for RegistrationGuard<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationGuard")
            .field("token", &self.token)
            .finish()
    }
}
