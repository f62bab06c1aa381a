//! Failures raised while routing and executing a request.
//!
//! Every variant becomes an `error = true` response; none of them closes the
//! connection.

use courier_protocol::{Failure, FailureKind};
use thiserror::Error;

/// Reasons a request could not produce a result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchFailure {
    /// No service is registered under the requested class.
    #[error("no service registered for {class_name}")]
    TargetNotFound { class_name: String },

    /// The service has no method matching the request.
    #[error("no method {method_name} on {class_name}")]
    MethodNotFound {
        class_name: String,
        method_name: String,
    },

    /// The request's arguments do not fit the method.
    #[error("usage error: {message}")]
    Usage { message: String },

    /// The service raised an error; `message` is its root cause.
    #[error("invocation failed: {message}")]
    Invocation { message: String },

    /// The service panicked.
    #[error("service panicked: {message}")]
    Panicked { message: String },

    /// The request kind is not served.
    #[error("unsupported request kind {kind}")]
    UnsupportedKind { kind: String },

    /// The worker pool no longer accepts jobs.
    #[error("server is shutting down")]
    ShuttingDown,
}

impl DispatchFailure {
    /// Wire category of this failure.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::TargetNotFound { .. } => FailureKind::TargetNotFound,
            Self::MethodNotFound { .. } => FailureKind::MethodNotFound,
            Self::Usage { .. } => FailureKind::UsageError,
            Self::Invocation { .. } | Self::Panicked { .. } | Self::ShuttingDown => {
                FailureKind::InvocationFailure
            }
            Self::UnsupportedKind { .. } => FailureKind::UnsupportedKind,
        }
    }

    /// Converts into the failure carried by the response.
    #[must_use]
    pub fn into_failure(self) -> Failure {
        match self {
            Self::TargetNotFound { class_name } => Failure::target_not_found(&class_name),
            Self::MethodNotFound {
                class_name,
                method_name,
            } => Failure::method_not_found(&class_name, &method_name),
            Self::Usage { message } => Failure::usage(message),
            Self::Invocation { message } => Failure::invocation(message),
            Self::UnsupportedKind { kind } => Failure::unsupported_kind(&kind),
            Self::Panicked { .. } | Self::ShuttingDown => Failure::invocation(self.to_string()),
        }
    }
}
