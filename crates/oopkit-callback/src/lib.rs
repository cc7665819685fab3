#![forbid(unsafe_code)]

//! Weak-reference callback registries for oopkit.
//!
//! # Role in oopkit
//! `oopkit-callback` lets unrelated components subscribe callables to an
//! event without keeping each other alive.
//!
//! - [`Callable`]: a registrable callable plus its identity key. Bound
//!   methods and callable objects are held weakly.
//! - [`Callback`] and [`PriorityCallback`]: registries dispatching a snapshot
//!   of live callables, in registration or priority order.
//! - [`Method`], [`BoundMethod`], [`WeakMethod`], [`WeakMethodProxy`]: named
//!   method slots and weak handles to bound methods.
//! - [`intercept`]: before/after hooks spliced into method slots through a
//!   side table.
//! - [`Aggregator`] and [`SingleCallCallback`]: bulk teardown and one-shot
//!   events that replay to late subscribers.
//!
//! Everything here is single-threaded. Registries are `!Send`.
//!
//! # Feature flags
//! - `tracing`: emit `tracing` events when dead entries are pruned, wrappers
//!   are installed and dispatch fails.

pub mod aggregate;
pub mod callable;
pub mod config;
pub mod error;
pub mod intercept;
pub mod method;
pub mod priority;
pub mod registry;
pub mod single_call;

pub use aggregate::Aggregator;
pub use callable::{Callable, CallableKey, FuncId, Invoke};
pub use config::{CallbackConfig, DispatchFailure, ReportError};
pub use error::{CallResult, CallbackError, IntoOutcome};
pub use intercept::{Interceptable, MethodWrapper};
pub use method::{BoundMethod, Method, WeakMethod, WeakMethodProxy};
pub use priority::PriorityCallback;
pub use registry::{Callback, DEFAULT_PRIORITY, RegistrationGuard, Subscribe, UnregisterToken};
pub use single_call::SingleCallCallback;

use std::rc::Rc;

/// Address of the allocation behind a strong reference.
#[inline]
pub(crate) fn rc_addr<T: ?Sized>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc).cast::<()>() as usize
}
