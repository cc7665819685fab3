//! Errors raised by the weak reference layer.

/// Errors from weak handle and proxy operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeakRefError {
    /// A proxy was accessed after its referent was dropped.
    DeadReference {
        /// Type name of the referent, for diagnostics.
        type_name: &'static str,
    },
    /// A weak handle was requested for a proxy.
    ///
    /// Proxies and handles are not interchangeable: turning a proxy back into
    /// a handle would lose the "fail on access" contract.
    ProxyHandle,
    /// Both sides of an identity check were proxies to the same allocation,
    /// so the check cannot tell a live referent from a dead one.
    AmbiguousProxies,
}

impl std::fmt::Display for WeakRefError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeadReference { type_name } => {
                write!(f, "object is dead (was of type {type_name})")
            }
            Self::ProxyHandle => write!(f, "unable to get a weak handle for a proxy"),
            Self::AmbiguousProxies => write!(
                f,
                "cannot check if objects are the same when both arguments are weak proxies"
            ),
        }
    }
}

impl std::error::Error for WeakRefError {}
