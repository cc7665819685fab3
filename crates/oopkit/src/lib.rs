#![forbid(unsafe_code)]

//! Weak-reference observers for Rust.
//!
//! # Role in oopkit
//! `oopkit` is the facade. It re-exports the two layers:
//!
//! - [`weak`] (`oopkit-weak`): weak handles, proxies and self-pruning weak
//!   containers.
//! - [`callback`] (`oopkit-callback`): callables with identity keys,
//!   registries, priority dispatch, method interception, bulk teardown and
//!   one-shot events.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use oopkit::{Callable, Callback};
//!
//! struct Gauge {
//!     reading: Cell<u32>,
//! }
//!
//! impl Gauge {
//!     fn update(&self, value: &u32) {
//!         self.reading.set(*value);
//!     }
//! }
//!
//! let changed = Callback::new();
//! let gauge = Rc::new(Gauge { reading: Cell::new(0) });
//! changed.register(Callable::method(&gauge, Gauge::update)).unwrap();
//!
//! changed.call(&42).unwrap();
//! assert_eq!(gauge.reading.get(), 42);
//!
//! // The registry does not keep the gauge alive.
//! drop(gauge);
//! changed.call(&7).unwrap();
//! assert!(changed.is_empty());
//! ```
//!
//! # Feature flags
//! - `tracing`: forward to `oopkit-callback/tracing`.

pub use oopkit_callback as callback;
pub use oopkit_weak as weak;

pub use oopkit_callback::{
    Aggregator, BoundMethod, CallResult, Callable, CallableKey, Callback, CallbackConfig,
    CallbackError, DEFAULT_PRIORITY, DispatchFailure, FuncId, Interceptable, IntoOutcome, Invoke, Method,
    MethodWrapper, PriorityCallback, RegistrationGuard, ReportError, SingleCallCallback, Subscribe,
    UnregisterToken, WeakMethod, WeakMethodProxy, intercept,
};
pub use oopkit_weak::{Ref, WeakList, WeakProxy, WeakRef, WeakRefError, WeakSet};

/// Common imports.
pub mod prelude {
    pub use oopkit_callback::intercept::{after, before, remove, wrap};
    pub use oopkit_callback::{
        Aggregator, Callable, Callback, CallbackError, Method, PriorityCallback,
        SingleCallCallback,
    };
    pub use oopkit_weak::{WeakList, WeakRef, WeakSet};
}
