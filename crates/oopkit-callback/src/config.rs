//! Registry configuration.

use std::fmt;
use std::rc::Rc;

use crate::error::CallbackError;

/// A dispatch round that ended with a failing callable.
#[derive(Debug)]
pub struct DispatchFailure<'a> {
    /// Human readable description of the failing callable.
    pub callable: &'a str,
    /// The error that aborted the round.
    pub error: &'a CallbackError,
}

impl fmt::Display for DispatchFailure<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error while trying to call {}: {}", self.callable, self.error)
    }
}

/// Collaborator notified when a dispatch round fails.
///
/// The reporter is observational. The error is still returned to whoever
/// called the registry.
pub trait ReportError {
    /// Record a failure.
    fn report(&self, failure: &DispatchFailure<'_>);
}

impl<F: Fn(&DispatchFailure<'_>)> ReportError for F {
    fn report(&self, failure: &DispatchFailure<'_>) {
        self(failure);
    }
}

/// Configuration shared by [`Callback`](crate::Callback) and
/// [`PriorityCallback`](crate::PriorityCallback).
#[derive(Clone)]
pub struct CallbackConfig {
    /// Run consistency checks on every registration.
    /// Default: on in debug builds.
    pub development: bool,
    /// Notified before a dispatch error is returned. Default: none.
    pub reporter: Option<Rc<dyn ReportError>>,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            development: cfg!(debug_assertions),
            reporter: None,
        }
    }
}

impl CallbackConfig {
    /// Enable or disable registration checks.
    #[must_use]
    pub fn with_development(mut self, development: bool) -> Self {
        self.development = development;
        self
    }

    /// Install a failure reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: impl ReportError + 'static) -> Self {
        self.reporter = Some(Rc::new(reporter));
        self
    }

    pub(crate) fn report(&self, callable: &str, error: &CallbackError) {
        if let Some(reporter) = &self.reporter {
            reporter.report(&DispatchFailure { callable, error });
        }
    }
}

impl fmt::Debug for CallbackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackConfig")
            .field("development", &self.development)
            .field("reporter", &self.reporter.is_some())
            .finish()
    }
}
