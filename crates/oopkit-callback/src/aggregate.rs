//! Bulk teardown of hooks and registrations.
//!
//! An [`Aggregator`] records every hook and registration made through it
//! and undoes them all in [`remove_all`](Aggregator::remove_all). Dropping
//! the aggregator calls `remove_all`, so a scope that returns early (or
//! unwinds) leaves nothing behind.

use std::fmt;

use crate::callable::Callable;
use crate::error::CallbackError;
use crate::intercept::{self, Interceptable};
use crate::registry::Subscribe;

/// Records hooks and registrations so they can be undone together.
#[derive(Default)]
pub struct Aggregator {
    undo: Vec<Box<dyn FnOnce()>>,
}

impl Aggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callable` before `target` until [`remove_all`](Self::remove_all).
    ///
    /// # Errors
    ///
    /// Same as [`intercept::before`]. Nothing is recorded on error.
    pub fn before<T: Interceptable>(
        &mut self,
        target: &T,
        callable: Callable<T::Args>,
    ) -> Result<(), CallbackError> {
        let key = callable.key();
        let wrapper = intercept::before(target, callable)?;
        self.undo.push(Box::new(move || {
            wrapper.remove_key(key);
        }));
        Ok(())
    }

    /// Run `callable` after `target` until [`remove_all`](Self::remove_all).
    ///
    /// # Errors
    ///
    /// Same as [`intercept::after`]. Nothing is recorded on error.
    pub fn after<T: Interceptable>(
        &mut self,
        target: &T,
        callable: Callable<T::Args>,
    ) -> Result<(), CallbackError> {
        let key = callable.key();
        let wrapper = intercept::after(target, callable)?;
        self.undo.push(Box::new(move || {
            wrapper.remove_key(key);
        }));
        Ok(())
    }

    /// [`before`](Self::before), with the receiver prepended to the hook's
    /// arguments.
    ///
    /// # Errors
    ///
    /// Same as [`intercept::before_with_receiver`].
    pub fn before_with_receiver<T: Interceptable>(
        &mut self,
        target: &T,
        callable: Callable<(std::rc::Rc<T::Receiver>, T::Args)>,
    ) -> Result<(), CallbackError> {
        let key = callable.key();
        let wrapper = intercept::before_with_receiver(target, callable)?;
        self.undo.push(Box::new(move || {
            wrapper.remove_key(key);
        }));
        Ok(())
    }

    /// [`after`](Self::after), with the receiver prepended to the hook's
    /// arguments.
    ///
    /// # Errors
    ///
    /// Same as [`intercept::after_with_receiver`].
    pub fn after_with_receiver<T: Interceptable>(
        &mut self,
        target: &T,
        callable: Callable<(std::rc::Rc<T::Receiver>, T::Args)>,
    ) -> Result<(), CallbackError> {
        let key = callable.key();
        let wrapper = intercept::after_with_receiver(target, callable)?;
        self.undo.push(Box::new(move || {
            wrapper.remove_key(key);
        }));
        Ok(())
    }

    /// Register `callable` with `registry` until
    /// [`remove_all`](Self::remove_all).
    ///
    /// # Errors
    ///
    /// Whatever the registry rejects the callable with.
    pub fn register<A: 'static, S: Subscribe<A>>(
        &mut self,
        registry: &S,
        callable: Callable<A>,
    ) -> Result<(), CallbackError> {
        let token = registry.subscribe(callable)?;
        self.undo.push(Box::new(move || token.unregister()));
        Ok(())
    }

    /// Undo everything recorded so far, in recording order.
    pub fn remove_all(&mut self) {
        for undo in self.undo.drain(..) {
            undo();
        }
    }

    /// Number of recorded effects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.undo.len()
    }

    /// Whether nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.remove_all();
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("recorded", &self.undo.len())
            .finish()
    }
}
