//! Error types for registration and dispatch.

use oopkit_weak::WeakRefError;

/// Result of invoking a single callable.
pub type CallResult = Result<(), CallbackError>;

/// Errors raised while registering, dispatching or intercepting.
#[derive(Debug)]
pub enum CallbackError {
    /// A receiver, hook receiver or wrapped original was invoked after its
    /// object was dropped.
    DeadReference {
        /// Type name of the dropped object.
        type_name: &'static str,
    },
    /// Error from the weak reference layer.
    Weak(WeakRefError),
    /// Registration rejected a callable whose receiver and class disagree.
    /// Only raised in development mode.
    MalformedCallable {
        /// What was inconsistent.
        reason: String,
    },
    /// A single-call callback was fired twice without being reset.
    AlreadyFired,
    /// A method slot is already wrapped with a different signature or
    /// function under the same name.
    SignatureMismatch {
        /// Name of the method slot.
        method: &'static str,
    },
    /// A dispatched callable failed.
    Failed(Box<dyn std::error::Error>),
}

impl CallbackError {
    /// Wrap any error raised by a callable.
    pub fn failed(err: impl std::error::Error + 'static) -> Self {
        Self::Failed(Box::new(err))
    }

    /// Whether this error reports a dropped object.
    #[must_use]
    pub fn is_dead_reference(&self) -> bool {
        matches!(
            self,
            Self::DeadReference { .. } | Self::Weak(WeakRefError::DeadReference { .. })
        )
    }
}

impl std::fmt::Display for CallbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeadReference { type_name } => {
                write!(f, "object of type {type_name} is already dropped")
            }
            Self::Weak(err) => write!(f, "{err}"),
            Self::MalformedCallable { reason } => write!(f, "malformed callable: {reason}"),
            Self::AlreadyFired => write!(f, "this callback can only be called once"),
            Self::SignatureMismatch { method } => write!(
                f,
                "method slot '{method}' is already wrapped with a different signature"
            ),
            Self::Failed(err) => write!(f, "callable failed: {err}"),
        }
    }
}

impl std::error::Error for CallbackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Weak(err) => Some(err),
            Self::Failed(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<WeakRefError> for CallbackError {
    fn from(err: WeakRefError) -> Self {
        Self::Weak(err)
    }
}

impl From<Box<dyn std::error::Error>> for CallbackError {
    fn from(err: Box<dyn std::error::Error>) -> Self {
        Self::Failed(err)
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self::Failed(message.into())
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self::Failed(message.into())
    }
}

/// Conversion of a callable's return value into a dispatch outcome.
///
/// Callables may return `()` or `Result<(), E>` for any `E` convertible into
/// [`CallbackError`].
pub trait IntoOutcome {
    /// Convert into the dispatch outcome.
    fn into_outcome(self) -> CallResult;
}

impl IntoOutcome for () {
    #[inline]
    fn into_outcome(self) -> CallResult {
        Ok(())
    }
}

impl<E: Into<CallbackError>> IntoOutcome for Result<(), E> {
    #[inline]
    fn into_outcome(self) -> CallResult {
        self.map_err(Into::into)
    }
}
