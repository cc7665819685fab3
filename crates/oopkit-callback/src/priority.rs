//! Registry variant with explicit dispatch priority.
//!
//! Lower priorities run first. A new entry is placed immediately before the
//! first entry whose priority is strictly greater, so equal priorities keep
//! registration order. Unregistering never reorders the others.

use std::fmt;

use crate::callable::{Callable, Invoke};
use crate::config::CallbackConfig;
use crate::error::{CallResult, CallbackError};
use crate::registry::{Callback, DEFAULT_PRIORITY, Subscribe, UnregisterToken};

/// A [`Callback`] whose entries are ordered by priority.
pub struct PriorityCallback<A> {
    inner: Callback<A>,
}

impl<A> Clone for PriorityCallback<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A> Default for PriorityCallback<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for PriorityCallback<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PriorityCallback").field(&self.inner).finish()
    }
}

impl<A> PriorityCallback<A> {
    /// Create an empty registry with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Callback::new(),
        }
    }

    /// Create an empty registry.
    #[must_use]
    pub fn with_config(config: CallbackConfig) -> Self {
        Self {
            inner: Callback::with_config(config),
        }
    }

    /// Register with [`DEFAULT_PRIORITY`].
    ///
    /// # Errors
    ///
    /// Same as [`Callback::register`].
    pub fn register(&self, callable: Callable<A>) -> Result<UnregisterToken<A>, CallbackError> {
        self.register_with_priority(callable, DEFAULT_PRIORITY)
    }

    /// Register `callable` at `priority`, replacing any entry with the same
    /// identity.
    ///
    /// # Errors
    ///
    /// Same as [`Callback::register`].
    pub fn register_with_priority(
        &self,
        callable: Callable<A>,
        priority: i32,
    ) -> Result<UnregisterToken<A>, CallbackError> {
        self.inner.insert(callable, priority, |entries| {
            entries
                .values()
                .position(|entry| entry.priority > priority)
        })
    }

    /// Remove the entry for `callable`. Returns whether one was removed.
    pub fn unregister<X>(&self, callable: &Callable<X>) -> bool {
        self.inner.unregister(callable)
    }

    /// Whether `callable` is registered and still resolvable.
    pub fn contains<X>(&self, callable: &Callable<X>) -> bool {
        self.inner.contains(callable)
    }

    /// Remove every entry.
    pub fn unregister_all(&self) {
        self.inner.unregister_all();
    }

    /// Number of entries, including dead ones not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether there are no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Invoke every live callable in priority order.
    ///
    /// # Errors
    ///
    /// Same as [`Callback::call`].
    pub fn call(&self, args: &A) -> CallResult {
        self.inner.call(args)
    }
}

impl<A: Clone + 'static> PriorityCallback<A> {
    /// Register with extra leading arguments at `priority`.
    ///
    /// # Errors
    ///
    /// Same as [`Callback::register`].
    pub fn register_with<E: Clone + 'static>(
        &self,
        callable: Callable<(E, A)>,
        extra: E,
        priority: i32,
    ) -> Result<UnregisterToken<A>, CallbackError> {
        self.register_with_priority(callable.bind_extra(extra), priority)
    }
}

impl<A> Subscribe<A> for PriorityCallback<A> {
    fn subscribe(&self, callable: Callable<A>) -> Result<UnregisterToken<A>, CallbackError> {
        self.register(callable)
    }
}

impl<A> Invoke<A> for PriorityCallback<A> {
    fn invoke(&self, args: &A) -> CallResult {
        self.call(args)
    }
}
