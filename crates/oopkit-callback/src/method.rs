//! Named method slots and weak handles to bound methods.
//!
//! A [`Method`] names a function taking a receiver, the way a class names
//! one of its methods. The name is the slot's identity: two methods of the
//! same receiver type and signature with the same name are the same slot,
//! whatever functions they point at. Calls made through [`BoundMethod::call`] go through
//! the interception side table, so hooks installed with
//! [`intercept::before`](crate::intercept::before) and friends run around
//! them.
//!
//! [`WeakMethod`] is a handle that rebuilds the bound method on every
//! [`upgrade`](WeakMethod::upgrade) and yields nothing once the receiver is
//! gone. [`WeakMethodProxy`] is callable directly and fails with a
//! dead-reference error instead.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use oopkit_weak::WeakRef;

use crate::callable::{Callable, CallableKey, FuncId, receiver_mismatch};
use crate::error::{CallResult, CallbackError, IntoOutcome};
use crate::intercept;
use crate::rc_addr;

// ---------------------------------------------------------------------------
// Method
// ---------------------------------------------------------------------------

/// A method slot: a name and the function it dispatches to.
pub struct Method<R, A, O> {
    name: &'static str,
    func: fn(&R, &A) -> O,
}

impl<R, A, O> Method<R, A, O> {
    /// Declare a method slot.
    #[must_use]
    pub const fn new(name: &'static str, func: fn(&R, &A) -> O) -> Self {
        Self { name, func }
    }

    /// Slot name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The undecorated function.
    #[must_use]
    pub fn func(&self) -> fn(&R, &A) -> O {
        self.func
    }

    pub(crate) fn slot_id(&self) -> FuncId {
        FuncId::Slot(self.name)
    }

    /// Bind the method to `receiver`.
    #[must_use]
    pub fn bind(&self, receiver: &Rc<R>) -> BoundMethod<R, A, O> {
        BoundMethod::new(receiver, *self)
    }
}

impl<R, A, O> Clone for Method<R, A, O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R, A, O> Copy for Method<R, A, O> {}

impl<R, A, O> PartialEq for Method<R, A, O> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<R, A, O> Eq for Method<R, A, O> {}

impl<R, A, O> fmt::Debug for Method<R, A, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({}.{})", short_type_name::<R>(), self.name)
    }
}

fn short_type_name<T>() -> &'static str {
    let full = type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

// ---------------------------------------------------------------------------
// BoundMethod
// ---------------------------------------------------------------------------

/// A method bound to a receiver. Holds the receiver strongly.
pub struct BoundMethod<R, A, O> {
    receiver: Rc<R>,
    method: Method<R, A, O>,
}

impl<R, A, O> BoundMethod<R, A, O> {
    /// Bind `method` to `receiver`.
    #[must_use]
    pub fn new(receiver: &Rc<R>, method: Method<R, A, O>) -> Self {
        Self {
            receiver: Rc::clone(receiver),
            method,
        }
    }

    /// The receiver.
    #[must_use]
    pub fn receiver(&self) -> &Rc<R> {
        &self.receiver
    }

    /// The method slot.
    #[must_use]
    pub fn method(&self) -> Method<R, A, O> {
        self.method
    }

    /// A weak handle to this bound method.
    #[must_use]
    pub fn downgrade(&self) -> WeakMethod<R, A, O> {
        WeakMethod {
            receiver: WeakRef::new(&self.receiver),
            method: self.method,
        }
    }
}

impl<R: 'static, A: Clone + 'static, O: 'static> BoundMethod<R, A, O> {
    /// Invoke the method, running any hooks installed on its slot.
    ///
    /// # Errors
    ///
    /// The first error raised by a hook, or
    /// [`CallbackError::SignatureMismatch`] if the slot name is wrapped with
    /// a different signature.
    pub fn call(&self, args: &A) -> Result<O, CallbackError> {
        intercept::dispatch(&self.receiver, &self.method, args)
    }
}

impl<R: 'static, A, O> BoundMethod<R, A, O> {
    /// Identity key: receiver, slot name and receiver class.
    #[must_use]
    pub fn key(&self) -> CallableKey {
        CallableKey::Bound {
            receiver: rc_addr(&self.receiver),
            func: self.method.slot_id(),
            class: TypeId::of::<R>(),
        }
    }
}

impl<R, A, O> Clone for BoundMethod<R, A, O> {
    fn clone(&self) -> Self {
        Self {
            receiver: Rc::clone(&self.receiver),
            method: self.method,
        }
    }
}

impl<R, A, O> fmt::Debug for BoundMethod<R, A, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<bound method {}.{} of {:p}>",
            short_type_name::<R>(),
            self.method.name,
            Rc::as_ptr(&self.receiver)
        )
    }
}

/// Registers the bound method, holding its receiver weakly. Dispatch goes
/// through the interception side table.
impl<R: 'static, A: Clone + 'static, O: IntoOutcome + 'static> From<&BoundMethod<R, A, O>>
    for Callable<A>
{
    fn from(bound: &BoundMethod<R, A, O>) -> Self {
        intercepted_callable(Rc::downgrade(&bound.receiver), bound.method)
    }
}

fn intercepted_callable<R: 'static, A: Clone + 'static, O: IntoOutcome + 'static>(
    receiver: Weak<R>,
    method: Method<R, A, O>,
) -> Callable<A> {
    let addr = receiver.as_ptr().cast::<()>() as usize;
    let receiver = receiver as Weak<dyn Any>;
    Callable::bound_parts(
        addr,
        receiver,
        method.slot_id(),
        TypeId::of::<R>(),
        Rc::new(move |receiver: &Rc<dyn Any>, args: &A| -> CallResult {
            match Rc::clone(receiver).downcast::<R>() {
                Ok(receiver) => intercept::dispatch(&receiver, &method, args)?.into_outcome(),
                Err(_) => Err(receiver_mismatch::<R>()),
            }
        }),
        type_name::<R>(),
    )
}

// ---------------------------------------------------------------------------
// WeakMethod
// ---------------------------------------------------------------------------

/// Weak handle to a bound method.
///
/// Two handles are equal when they were built from the same receiver and
/// method. The receiver allocation stays reserved while a handle exists, so
/// equality and hash stay stable after the receiver is dropped.
pub struct WeakMethod<R, A, O> {
    receiver: WeakRef<R>,
    method: Method<R, A, O>,
}

impl<R, A, O> WeakMethod<R, A, O> {
    /// Rebuild the bound method if the receiver is alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<BoundMethod<R, A, O>> {
        self.receiver.upgrade().map(|receiver| BoundMethod {
            receiver,
            method: self.method,
        })
    }

    /// Whether the receiver was dropped.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        !self.receiver.is_alive()
    }

    /// The method slot.
    #[must_use]
    pub fn method(&self) -> Method<R, A, O> {
        self.method
    }
}

impl<R, A, O> Clone for WeakMethod<R, A, O> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
            method: self.method,
        }
    }
}

impl<R, A, O> PartialEq for WeakMethod<R, A, O> {
    fn eq(&self, other: &Self) -> bool {
        self.receiver == other.receiver && self.method == other.method
    }
}

impl<R, A, O> Eq for WeakMethod<R, A, O> {}

impl<R, A, O> Hash for WeakMethod<R, A, O> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.receiver.hash(state);
        self.method.name.hash(state);
    }
}

impl<R, A, O> fmt::Debug for WeakMethod<R, A, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = short_type_name::<R>();
        match self.receiver.upgrade() {
            Some(receiver) => write!(
                f,
                "<WeakMethod to {class}.{} for object {:p}>",
                self.method.name,
                Rc::as_ptr(&receiver)
            ),
            None => write!(f, "<WeakMethod to {class}.{} (dead)>", self.method.name),
        }
    }
}

// ---------------------------------------------------------------------------
// WeakMethodProxy
// ---------------------------------------------------------------------------

/// A bound method that does not keep its receiver alive and fails loudly
/// once it is gone.
pub struct WeakMethodProxy<R, A, O> {
    inner: WeakMethod<R, A, O>,
}

impl<R, A, O> WeakMethodProxy<R, A, O> {
    /// Proxy for `bound`.
    #[must_use]
    pub fn new(bound: &BoundMethod<R, A, O>) -> Self {
        Self {
            inner: bound.downgrade(),
        }
    }

    /// The bound method, if the receiver is alive.
    #[must_use]
    pub fn original(&self) -> Option<BoundMethod<R, A, O>> {
        self.inner.upgrade()
    }

    /// Whether the receiver was dropped.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.inner.is_dead()
    }
}

impl<R: 'static, A: Clone + 'static, O: 'static> WeakMethodProxy<R, A, O> {
    /// Invoke the method.
    ///
    /// # Errors
    ///
    /// [`CallbackError::DeadReference`] if the receiver was dropped, else
    /// the same as [`BoundMethod::call`].
    pub fn call(&self, args: &A) -> Result<O, CallbackError> {
        match self.inner.upgrade() {
            Some(bound) => bound.call(args),
            None => Err(CallbackError::DeadReference {
                type_name: type_name::<R>(),
            }),
        }
    }
}

impl<R, A, O> Clone for WeakMethodProxy<R, A, O> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R, A, O> PartialEq for WeakMethodProxy<R, A, O> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<R, A, O> fmt::Debug for WeakMethodProxy<R, A, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakMethodProxy").field(&self.inner).finish()
    }
}

impl<R: 'static, A: Clone + 'static, O: IntoOutcome + 'static> From<&WeakMethodProxy<R, A, O>>
    for Callable<A>
{
    fn from(proxy: &WeakMethodProxy<R, A, O>) -> Self {
        let receiver = proxy
            .inner
            .receiver
            .as_weak()
            .map_or_else(Weak::new, Weak::clone);
        intercepted_callable(receiver, proxy.inner.method)
    }
}
