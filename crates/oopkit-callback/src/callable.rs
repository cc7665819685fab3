//! Callables and their identity keys.
//!
//! # Design
//!
//! Every callable that can be registered is reduced to a [`Callable<A>`]:
//! an identity key computed once at construction plus a weak slot that can
//! rebuild the live callable later. The slot is a tagged union resolved by
//! a single match:
//!
//! | Kind | Key | Slot holds |
//! |------|-----|------------|
//! | bound method | `(receiver, function type, receiver class)` | weak receiver + function |
//! | class-scoped function | `(function type, class)` | function |
//! | callable object | object address | weak object (strong if opted out) |
//! | free function | function type | function |
//! | closure | closure allocation | strong closure |
//!
//! # Identity
//!
//! Functions are identified by their type, never by their address. Every
//! function item and non-capturing closure has a type of its own, while
//! the optimizer may fold two functions with equal bodies into one address.
//! Constructors taking a function reject anything that is not zero-sized
//! at compile time, since fn pointers and capturing closures share a type
//! across distinct values.
//!
//! A slot stores a `Weak` (or an `Rc`) to the allocation its key was derived
//! from. The allocation stays reserved while the slot exists, so an address
//! in a stored key cannot be handed to a different object. A key whose
//! referent died stays unique until the entry is pruned.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{CallResult, CallbackError, IntoOutcome};
use crate::rc_addr;

pub(crate) type FnThunk<A> = Rc<dyn Fn(&A) -> CallResult>;
pub(crate) type RecvThunk<A> = Rc<dyn Fn(&Rc<dyn Any>, &A) -> CallResult>;
type Adapter<B, A> = Rc<dyn Fn(&B) -> Result<A, CallbackError>>;

/// Identity of the function part of a bound key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuncId {
    /// A function item or non-capturing closure, by type.
    Item(TypeId),
    /// A named method slot of the receiver class.
    Slot(&'static str),
}

/// Identity of a registered callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallableKey {
    /// A method bound to a receiver.
    Bound {
        /// Receiver allocation.
        receiver: usize,
        /// The method.
        func: FuncId,
        /// Receiver class.
        class: TypeId,
    },
    /// A function scoped to a class but not bound to a receiver.
    Unbound {
        /// Function type.
        func: TypeId,
        /// Declaring class.
        class: TypeId,
    },
    /// A free function, by type.
    Function(TypeId),
    /// A closure allocation or callable object.
    Plain(usize),
}

/// Type identity of a function item or non-capturing closure.
fn item_id<F: 'static>() -> TypeId {
    const {
        assert!(
            std::mem::size_of::<F>() == 0,
            "pass a function item or a non-capturing closure"
        );
    }
    TypeId::of::<F>()
}

/// An object that can be registered as a callable.
///
/// Registries hold callable objects weakly unless the type sets
/// [`KEEP_STRONG_REFERENCE`](Invoke::KEEP_STRONG_REFERENCE).
pub trait Invoke<A> {
    /// Keep the object alive for as long as it is registered.
    const KEEP_STRONG_REFERENCE: bool = false;

    /// Invoke the object.
    fn invoke(&self, args: &A) -> CallResult;
}

// ---------------------------------------------------------------------------
// Weak slot
// ---------------------------------------------------------------------------

pub(crate) enum WeakSlot<A> {
    BoundMethod {
        receiver: Weak<dyn Any>,
        func: RecvThunk<A>,
        class: TypeId,
    },
    UnboundMethod {
        func: FnThunk<A>,
        class: TypeId,
    },
    Plain(PlainSlot<A>),
}

pub(crate) enum PlainSlot<A> {
    Weak {
        target: Weak<dyn Any>,
        func: RecvThunk<A>,
    },
    Strong {
        target: Rc<dyn Any>,
        func: RecvThunk<A>,
    },
    Function(FnThunk<A>),
}

/// A resolved slot, ready to invoke. Holds its receiver strongly.
pub(crate) enum Live<A> {
    Receiver(Rc<dyn Any>, RecvThunk<A>),
    Function(FnThunk<A>),
}

impl<A> Live<A> {
    pub(crate) fn invoke(&self, args: &A) -> CallResult {
        match self {
            Self::Receiver(receiver, func) => func(receiver, args),
            Self::Function(func) => func(args),
        }
    }
}

impl<A> WeakSlot<A> {
    pub(crate) fn resolve(&self) -> Option<Live<A>> {
        match self {
            Self::BoundMethod { receiver, func, .. }
            | Self::Plain(PlainSlot::Weak {
                target: receiver,
                func,
            }) => receiver
                .upgrade()
                .map(|receiver| Live::Receiver(receiver, Rc::clone(func))),
            Self::Plain(PlainSlot::Strong { target, func }) => {
                Some(Live::Receiver(Rc::clone(target), Rc::clone(func)))
            }
            Self::UnboundMethod { func, .. } | Self::Plain(PlainSlot::Function(func)) => {
                Some(Live::Function(Rc::clone(func)))
            }
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        match self {
            Self::BoundMethod { receiver, .. }
            | Self::Plain(PlainSlot::Weak {
                target: receiver, ..
            }) => receiver.strong_count() > 0,
            _ => true,
        }
    }

    /// Receiver and declared class must agree.
    pub(crate) fn check_consistency(&self) -> Result<(), String> {
        let Self::BoundMethod {
            receiver, class, ..
        } = self
        else {
            return Ok(());
        };
        match receiver.upgrade() {
            Some(receiver) if Any::type_id(&*receiver) != *class => Err(format!(
                "receiver of type {:?} does not match declared class {class:?}",
                Any::type_id(&*receiver)
            )),
            _ => Ok(()),
        }
    }
}

impl<A: 'static> WeakSlot<A> {
    fn map_args<B: 'static>(self, adapt: Adapter<B, A>) -> WeakSlot<B> {
        match self {
            Self::BoundMethod {
                receiver,
                func,
                class,
            } => WeakSlot::BoundMethod {
                receiver,
                func: adapt_receiver(func, adapt),
                class,
            },
            Self::UnboundMethod { func, class } => WeakSlot::UnboundMethod {
                func: adapt_function(func, adapt),
                class,
            },
            Self::Plain(PlainSlot::Weak { target, func }) => WeakSlot::Plain(PlainSlot::Weak {
                target,
                func: adapt_receiver(func, adapt),
            }),
            Self::Plain(PlainSlot::Strong { target, func }) => {
                WeakSlot::Plain(PlainSlot::Strong {
                    target,
                    func: adapt_receiver(func, adapt),
                })
            }
            Self::Plain(PlainSlot::Function(func)) => {
                WeakSlot::Plain(PlainSlot::Function(adapt_function(func, adapt)))
            }
        }
    }
}

fn adapt_function<A: 'static, B: 'static>(func: FnThunk<A>, adapt: Adapter<B, A>) -> FnThunk<B> {
    Rc::new(move |args: &B| -> CallResult {
        let args = adapt(args)?;
        func(&args)
    })
}

fn adapt_receiver<A: 'static, B: 'static>(
    func: RecvThunk<A>,
    adapt: Adapter<B, A>,
) -> RecvThunk<B> {
    Rc::new(move |receiver: &Rc<dyn Any>, args: &B| -> CallResult {
        let args = adapt(args)?;
        func(receiver, &args)
    })
}

impl<A> Clone for WeakSlot<A> {
    fn clone(&self) -> Self {
        match self {
            Self::BoundMethod {
                receiver,
                func,
                class,
            } => Self::BoundMethod {
                receiver: Weak::clone(receiver),
                func: Rc::clone(func),
                class: *class,
            },
            Self::UnboundMethod { func, class } => Self::UnboundMethod {
                func: Rc::clone(func),
                class: *class,
            },
            Self::Plain(PlainSlot::Weak { target, func }) => Self::Plain(PlainSlot::Weak {
                target: Weak::clone(target),
                func: Rc::clone(func),
            }),
            Self::Plain(PlainSlot::Strong { target, func }) => Self::Plain(PlainSlot::Strong {
                target: Rc::clone(target),
                func: Rc::clone(func),
            }),
            Self::Plain(PlainSlot::Function(func)) => {
                Self::Plain(PlainSlot::Function(Rc::clone(func)))
            }
        }
    }
}

pub(crate) fn receiver_mismatch<R>() -> CallbackError {
    CallbackError::MalformedCallable {
        reason: format!("receiver is not a {}", type_name::<R>()),
    }
}

// ---------------------------------------------------------------------------
// Callable
// ---------------------------------------------------------------------------

/// A registrable callable taking `&A`.
///
/// Cloning is cheap and keeps the identity key.
pub struct Callable<A> {
    key: CallableKey,
    slot: WeakSlot<A>,
    label: &'static str,
}

impl<A: 'static> Callable<A> {
    /// A free function. Held strongly; identity is the function's type.
    pub fn function<F, O>(func: F) -> Self
    where
        F: Fn(&A) -> O + Copy + 'static,
        O: IntoOutcome,
    {
        Self {
            key: CallableKey::Function(item_id::<F>()),
            slot: WeakSlot::Plain(PlainSlot::Function(Rc::new(move |args: &A| {
                func(args).into_outcome()
            }))),
            label: type_name::<F>(),
        }
    }

    /// A closure. Held strongly; identity is the allocation, shared by
    /// clones of the returned callable.
    pub fn new<F, O>(func: F) -> Self
    where
        F: Fn(&A) -> O + 'static,
        O: IntoOutcome,
    {
        let func: FnThunk<A> = Rc::new(move |args: &A| func(args).into_outcome());
        Self {
            key: CallableKey::Plain(rc_addr(&func)),
            slot: WeakSlot::Plain(PlainSlot::Function(func)),
            label: type_name::<F>(),
        }
    }

    /// A method bound to `receiver`. The receiver is held weakly.
    pub fn method<R, F, O>(receiver: &Rc<R>, func: F) -> Self
    where
        R: 'static,
        F: Fn(&R, &A) -> O + Copy + 'static,
        O: IntoOutcome,
    {
        let weak = Rc::downgrade(receiver) as Weak<dyn Any>;
        Self::bound_parts(
            rc_addr(receiver),
            weak,
            FuncId::Item(item_id::<F>()),
            TypeId::of::<R>(),
            Rc::new(move |receiver: &Rc<dyn Any>, args: &A| -> CallResult {
                match (**receiver).downcast_ref::<R>() {
                    Some(receiver) => func(receiver, args).into_outcome(),
                    None => Err(receiver_mismatch::<R>()),
                }
            }),
            type_name::<R>(),
        )
    }

    /// A function scoped to class `T` but not bound to any receiver.
    pub fn associated<T, F, O>(func: F) -> Self
    where
        T: 'static,
        F: Fn(&A) -> O + Copy + 'static,
        O: IntoOutcome,
    {
        Self {
            key: CallableKey::Unbound {
                func: item_id::<F>(),
                class: TypeId::of::<T>(),
            },
            slot: WeakSlot::UnboundMethod {
                func: Rc::new(move |args: &A| func(args).into_outcome()),
                class: TypeId::of::<T>(),
            },
            label: type_name::<T>(),
        }
    }

    /// A callable object. Held weakly unless
    /// [`Invoke::KEEP_STRONG_REFERENCE`] is set.
    pub fn object<T: Invoke<A> + 'static>(target: &Rc<T>) -> Self {
        let func: RecvThunk<A> = Rc::new(|target: &Rc<dyn Any>, args: &A| -> CallResult {
            match (**target).downcast_ref::<T>() {
                Some(target) => target.invoke(args),
                None => Err(receiver_mismatch::<T>()),
            }
        });
        let slot = if T::KEEP_STRONG_REFERENCE {
            let target = Rc::clone(target) as Rc<dyn Any>;
            PlainSlot::Strong { target, func }
        } else {
            let target = Rc::downgrade(target) as Weak<dyn Any>;
            PlainSlot::Weak { target, func }
        };
        Self {
            key: CallableKey::Plain(rc_addr(target)),
            slot: WeakSlot::Plain(slot),
            label: type_name::<T>(),
        }
    }

    /// A method on a type-erased receiver declared to be of class `class`.
    ///
    /// This is the one construction path where receiver and class can
    /// disagree; registries reject such callables in development mode.
    pub fn erased_method<F>(receiver: &Rc<dyn Any>, class: TypeId, func: F) -> Self
    where
        F: Fn(&dyn Any, &A) -> CallResult + Copy + 'static,
    {
        Self::bound_parts(
            rc_addr(receiver),
            Rc::downgrade(receiver),
            FuncId::Item(item_id::<F>()),
            class,
            Rc::new(move |receiver: &Rc<dyn Any>, args: &A| func(&**receiver, args)),
            "erased method",
        )
    }

    pub(crate) fn bound_parts(
        receiver_addr: usize,
        receiver: Weak<dyn Any>,
        func_id: FuncId,
        class: TypeId,
        func: RecvThunk<A>,
        label: &'static str,
    ) -> Self {
        Self {
            key: CallableKey::Bound {
                receiver: receiver_addr,
                func: func_id,
                class,
            },
            slot: WeakSlot::BoundMethod {
                receiver,
                func,
                class,
            },
            label,
        }
    }
}

impl<A> Callable<A> {
    /// Identity key.
    #[must_use]
    pub fn key(&self) -> CallableKey {
        self.key
    }

    /// Description used in failure reports.
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Replace the description used in failure reports.
    #[must_use]
    pub fn named(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// Whether the callable can still be resolved.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.slot.is_alive()
    }

    /// Invoke the callable directly.
    ///
    /// # Errors
    ///
    /// [`CallbackError::DeadReference`] if the receiver was dropped, or
    /// whatever the callable itself returns.
    pub fn call(&self, args: &A) -> CallResult {
        match self.slot.resolve() {
            Some(live) => live.invoke(args),
            None => Err(CallbackError::DeadReference {
                type_name: self.label,
            }),
        }
    }

    pub(crate) fn slot(&self) -> &WeakSlot<A> {
        &self.slot
    }
}

impl<E: Clone + 'static, A: Clone + 'static> Callable<(E, A)> {
    /// Bind extra leading arguments. The result is invoked with `&A` and
    /// forwards `&(extra, args)`. Extra arguments are held strongly; the
    /// identity key is unchanged.
    #[must_use]
    pub fn bind_extra(self, extra: E) -> Callable<A> {
        let adapt: Adapter<A, (E, A)> =
            Rc::new(move |args: &A| Ok((extra.clone(), args.clone())));
        Callable {
            key: self.key,
            slot: self.slot.map_args(adapt),
            label: self.label,
        }
    }
}

impl<A: Clone + 'static> Callable<A> {
    /// Accept `&(receiver, args)` and forward `&args`. The identity key is
    /// unchanged.
    pub(crate) fn ignore_receiver<R: 'static>(self) -> Callable<(Rc<R>, A)> {
        let adapt: Adapter<(Rc<R>, A), A> = Rc::new(|(_, args): &(Rc<R>, A)| Ok(args.clone()));
        Callable {
            key: self.key,
            slot: self.slot.map_args(adapt),
            label: self.label,
        }
    }
}

impl<A> Clone for Callable<A> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            slot: self.slot.clone(),
            label: self.label,
        }
    }
}

impl<A> fmt::Debug for Callable<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("label", &self.label)
            .field("key", &self.key)
            .field("alive", &self.is_alive())
            .finish()
    }
}
