//! One-shot callbacks that replay to late subscribers.
//!
//! # Invariants
//!
//! 1. The first [`call`](SingleCallCallback::call) freezes its arguments
//!    and dispatches them.
//! 2. A callable registered after firing is invoked once, immediately, with
//!    the frozen arguments, unless it was already registered.
//! 3. Firing again fails with [`CallbackError::AlreadyFired`] until
//!    [`allow_calling_again`](SingleCallCallback::allow_calling_again).
//! 4. An optional parameter is held weakly and prepended to the arguments.
//!    If it is gone when firing or registering, the operation fails with
//!    [`CallbackError::DeadReference`].

use std::any::{Any, type_name};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::callable::Callable;
use crate::error::{CallResult, CallbackError};
use crate::registry::{Callback, UnregisterToken};

type Compose<A, D> = Box<dyn Fn(&A) -> Result<D, CallbackError>>;

/// A callback fired at most once per reset.
///
/// `A` is what the event is fired with; `D` is what subscribers receive:
/// `A` itself, or `(Rc<P>, A)` when built with
/// [`with_parameter`](SingleCallCallback::with_parameter).
pub struct SingleCallCallback<A, D = A> {
    callbacks: Callback<D>,
    compose: Compose<A, D>,
    parameter: Option<(Weak<dyn Any>, &'static str)>,
    args: RefCell<Option<A>>,
    done: Cell<bool>,
}

impl<A: Clone + 'static> SingleCallCallback<A> {
    /// A one-shot callback without a parameter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            callbacks: Callback::new(),
            compose: Box::new(|args: &A| Ok(args.clone())),
            parameter: None,
            args: RefCell::new(None),
            done: Cell::new(false),
        }
    }
}

impl<A: Clone + 'static> Default for SingleCallCallback<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Clone + 'static, P: 'static> SingleCallCallback<A, (Rc<P>, A)> {
    /// A one-shot callback that passes `parameter` (held weakly) ahead of the
    /// arguments.
    #[must_use]
    pub fn with_parameter(parameter: &Rc<P>) -> Self {
        let weak = Rc::downgrade(parameter);
        let liveness: Weak<dyn Any> = weak.clone();
        Self {
            callbacks: Callback::new(),
            compose: Box::new(move |args: &A| {
                weak.upgrade()
                    .map(|parameter| (parameter, args.clone()))
                    .ok_or(CallbackError::DeadReference {
                        type_name: type_name::<P>(),
                    })
            }),
            parameter: Some((liveness, type_name::<P>())),
            args: RefCell::new(None),
            done: Cell::new(false),
        }
    }
}

impl<A, D> SingleCallCallback<A, D> {
    /// Fire the callback.
    ///
    /// # Errors
    ///
    /// [`CallbackError::AlreadyFired`] if it already fired,
    /// [`CallbackError::DeadReference`] if the parameter is gone, or the
    /// first error raised by a subscriber.
    pub fn call(&self, args: A) -> CallResult {
        if self.done.get() {
            return Err(CallbackError::AlreadyFired);
        }
        let delivered = (self.compose)(&args)?;
        *self.args.borrow_mut() = Some(args);
        self.done.set(true);
        self.callbacks.call(&delivered)
    }

    /// Register `callable`. If the callback already fired and `callable` was
    /// not registered yet, it is invoked right away with the frozen
    /// arguments.
    ///
    /// # Errors
    ///
    /// [`CallbackError::DeadReference`] if the parameter is gone, or the
    /// error raised by the immediate replay. The registration is kept
    /// when the replay fails.
    pub fn register(&self, callable: Callable<D>) -> Result<UnregisterToken<D>, CallbackError> {
        self.check_parameter()?;
        let contains = self.callbacks.contains(&callable);
        let token = self.callbacks.register(callable.clone())?;
        if self.done.get() && !contains {
            let delivered = match self.args.borrow().as_ref() {
                Some(args) => (self.compose)(args)?,
                None => return Ok(token),
            };
            callable.call(&delivered)?;
        }
        Ok(token)
    }

    /// Remove `callable`. Returns whether it was registered.
    pub fn unregister<X>(&self, callable: &Callable<X>) -> bool {
        self.callbacks.unregister(callable)
    }

    /// Remove every subscriber.
    pub fn unregister_all(&self) {
        self.callbacks.unregister_all();
    }

    /// Whether `callable` is registered and still resolvable.
    pub fn contains<X>(&self, callable: &Callable<X>) -> bool {
        self.callbacks.contains(callable)
    }

    /// Allow firing again. Until then, late subscribers are no longer
    /// replayed to.
    pub fn allow_calling_again(&self) {
        self.done.set(false);
    }

    /// Whether the callback fired since creation or the last reset.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.get()
    }

    fn check_parameter(&self) -> Result<(), CallbackError> {
        match &self.parameter {
            Some((liveness, name)) if liveness.strong_count() == 0 => {
                Err(CallbackError::DeadReference { type_name: *name })
            }
            _ => Ok(()),
        }
    }
}

impl<A, D> fmt::Debug for SingleCallCallback<A, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleCallCallback")
            .field("done", &self.done.get())
            .field("subscribers", &self.callbacks.len())
            .field("has_parameter", &self.parameter.is_some())
            .finish()
    }
}
