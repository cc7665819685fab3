#![forbid(unsafe_code)]

//! Weak references for oopkit.
//!
//! # Role in oopkit
//! `oopkit-weak` is the leaf layer. It gives every other part of the
//! workspace a uniform way to point at an object without keeping it alive:
//!
//! - [`WeakRef`]: a resolver that yields the live object or nothing. The
//!   null handle ([`WeakRef::null`]) is a constant and never allocates.
//! - [`WeakProxy`]: like a handle, but access fails loudly with
//!   [`WeakRefError::DeadReference`] instead of yielding nothing.
//! - [`Ref`]: "strong, handle or proxy", for APIs that accept any of the
//!   three and need [`weak_ref`], [`weak_proxy`] or [`is_same`].
//! - [`WeakList`] and [`WeakSet`]: containers that skip and physically prune
//!   dead entries whenever they are iterated or measured.
//!
//! # Identity
//!
//! Identity is allocation identity. A `std::rc::Weak` keeps the allocation
//! (not the value) alive, so an address observed through a weak handle
//! cannot be handed to an unrelated object while that handle exists. Every
//! container here relies on that to key entries by address.

pub mod error;
pub mod handle;
pub mod list;
pub mod set;

pub use error::WeakRefError;
pub use handle::{Ref, WeakProxy, WeakRef, is_same, weak_proxy, weak_ref};
pub use list::WeakList;
pub use set::WeakSet;

use std::rc::{Rc, Weak};

/// Address of the allocation behind a strong reference.
#[inline]
pub(crate) fn rc_addr<T: ?Sized>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc).cast::<()>() as usize
}

/// Address of the allocation behind a weak reference.
#[inline]
pub(crate) fn weak_addr<T: ?Sized>(weak: &Weak<T>) -> usize {
    weak.as_ptr().cast::<()>() as usize
}
