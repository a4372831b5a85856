//! Error types for the test-container orchestration layer.
//!
//! Every failure is a variant of [`Error`]. Callers that need to branch on
//! the broad fault class (configuration, container, timeout, remote,
//! composite) use [`Error::kind`] instead of matching individual variants.

use std::time::Duration;

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid required configuration. Fatal, never retried.
    Configuration,
    /// A backend rejected an operation.
    Container,
    /// A bounded wait exceeded its deadline.
    Timeout,
    /// Transport-level failure talking to a bridge.
    Remote,
    /// A fan-out across several targets failed.
    Composite,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Container => write!(f, "container"),
            Self::Timeout => write!(f, "timeout"),
            Self::Remote => write!(f, "remote"),
            Self::Composite => write!(f, "composite"),
        }
    }
}

/// One failed target inside a best-effort fan-out.
#[derive(Debug)]
pub struct TargetFailure {
    /// Zero-based position of the target in the composite.
    pub index: usize,
    /// The target's own error.
    pub error: Error,
}

/// Errors that can occur in the orchestration layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Required configuration value missing or invalid.
    #[error("invalid configuration '{key}': {reason}")]
    Configuration { key: String, reason: String },

    // =========================================================================
    // Bundle Lifecycle Errors
    // =========================================================================
    /// Bundle id unknown to the backend.
    #[error("bundle not found: {0}")]
    BundleNotFound(u64),

    /// Install rejected (malformed payload, bad location).
    #[error("failed to install bundle '{location}': {reason}")]
    InstallFailed { location: String, reason: String },

    /// Bundle could not be started.
    #[error("failed to start bundle {id}: {reason}")]
    StartFailed { id: u64, reason: String },

    /// Bundle is in the wrong state for the requested transition.
    #[error("bundle {id} is in state '{state}', cannot move to '{target}'")]
    InvalidState {
        id: u64,
        state: String,
        target: String,
    },

    /// Start level out of range.
    #[error("invalid start level {level} for bundle {id}")]
    InvalidStartLevel { id: u64, level: u32 },

    /// Operation not supported by this backend.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Container runtime already started.
    #[error("already started: {0}")]
    AlreadyStarted(String),

    // =========================================================================
    // Address Errors
    // =========================================================================
    /// Address derivation exceeded the depth bound.
    #[error("test address '{identifier}' exceeds maximum depth {max}")]
    AddressTooDeep { identifier: String, max: usize },

    // =========================================================================
    // Service Errors
    // =========================================================================
    /// Method is not part of the capability's declared method set.
    #[error("method '{method}' is not declared by service type '{service}'")]
    UnknownMethod { service: String, method: String },

    /// A service invocation failed inside the container.
    #[error("service '{service}' failed in '{method}': {reason}")]
    ServiceFailed {
        service: String,
        method: String,
        reason: String,
    },

    /// Invalid service filter expression.
    #[error("invalid service filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    // =========================================================================
    // Timeout Errors
    // =========================================================================
    /// Operation timed out.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// Transport failure talking to a bridge.
    #[error("remote call to {endpoint} failed: {reason}")]
    Remote { endpoint: String, reason: String },

    /// The remote container rejected an operation.
    #[error("{endpoint} rejected the call ({code}): {message}")]
    Rejected {
        endpoint: String,
        code: String,
        message: String,
    },

    /// No binding under that name in the registry.
    #[error("no binding named '{0}' in registry")]
    NotBound(String),

    /// Name already bound in the registry.
    #[error("name '{0}' is already bound")]
    AlreadyBound(String),

    /// Bridge export revoked; no new calls accepted.
    #[error("bridge '{0}' has been unexported")]
    Revoked(String),

    /// Registry could not be created on the requested port.
    #[error("failed to create registry on port {port}: {source}")]
    RegistryBindFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Composite Errors
    // =========================================================================
    /// First faulting target of a fail-fast fan-out.
    #[error("target {index} failed during {operation}: {source}")]
    Composite {
        index: usize,
        operation: String,
        #[source]
        source: Box<Error>,
    },

    /// Best-effort cleanup finished with one or more target failures.
    #[error("cleanup failed on {} target(s): {}", .failures.len(), describe_failures(.failures))]
    CleanupFailed { failures: Vec<TargetFailure> },
}

impl Error {
    /// Returns the broad fault class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::BundleNotFound(_)
            | Self::InstallFailed { .. }
            | Self::StartFailed { .. }
            | Self::InvalidState { .. }
            | Self::InvalidStartLevel { .. }
            | Self::NotSupported(_)
            | Self::AlreadyStarted(_)
            | Self::AlreadyBound(_)
            | Self::AddressTooDeep { .. }
            | Self::UnknownMethod { .. }
            | Self::ServiceFailed { .. }
            | Self::InvalidFilter { .. }
            | Self::Rejected { .. } => ErrorKind::Container,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Remote { .. }
            | Self::NotBound(_)
            | Self::Revoked(_)
            | Self::RegistryBindFailed { .. }
            | Self::Serialization(_)
            | Self::Io(_) => ErrorKind::Remote,
            Self::Composite { .. } | Self::CleanupFailed { .. } => ErrorKind::Composite,
        }
    }

    /// Wraps `self` as the fault of target `index` during `operation`.
    pub(crate) fn at_target(self, index: usize, operation: &str) -> Self {
        Self::Composite {
            index,
            operation: operation.to_string(),
            source: Box::new(self),
        }
    }

    /// Builds a timeout error.
    pub(crate) fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }
}

fn describe_failures(failures: &[TargetFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.index, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}
