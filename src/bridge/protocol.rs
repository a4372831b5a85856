//! Bridge wire protocol.
//!
//! # Protocol Format
//!
//! - **Transport**: TCP, one request per connection
//! - **Encoding**: JSON
//! - **Framing**: Newline-delimited (each message ends with `\n`)
//!
//! Every request names the binding it is addressed to:
//!
//! ```text
//! Driver                              Bridge
//!   |                                   |
//!   |  {"name":"...","action":          |
//!   |   "start_bundle","bundle":3}\n    |
//!   |---------------------------------->|
//!   |                                   |
//!   |  {"status":"ok"}\n                |
//!   |<----------------------------------|
//! ```
//!
//! # Supported Actions
//!
//! | Action | Description |
//! |--------|-------------|
//! | `lookup` | Resolve a binding name |
//! | `install` | Install a bundle (location, optional base64 bytes) |
//! | `start_bundle` | Start an installed bundle |
//! | `bundle_state` | Read a bundle's lifecycle state |
//! | `set_start_level` | Set a bundle's start level |
//! | `get_service` | Look up and export a service |
//! | `invoke` | Invoke a method on an exported service |
//! | `stop_framework` | Stop the hosted framework |
//! | `reset` | Drop every bundle and service |
//! | `ping` | Check bridge availability |

use crate::container::BundleState;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Request Types
// =============================================================================

/// One request line: target binding plus action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    /// Binding name the request is addressed to.
    pub name: String,
    /// The action.
    #[serde(flatten)]
    pub request: Request,
}

/// Action sent from driver to bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    /// Resolve the binding.
    Lookup,

    /// Install a bundle.
    Install {
        /// Install location.
        location: String,
        /// Base64 bundle archive; absent for location-only installs.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },

    /// Start a bundle.
    StartBundle {
        /// Bundle id.
        bundle: u64,
    },

    /// Read a bundle's state.
    BundleState {
        /// Bundle id.
        bundle: u64,
    },

    /// Set a bundle's start level.
    SetStartLevel {
        /// Bundle id.
        bundle: u64,
        /// New start level.
        level: u32,
    },

    /// Look up one service and export it.
    GetService {
        /// Registered type name.
        type_name: String,
        /// Optional filter expression.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },

    /// Invoke a method on an exported service.
    Invoke {
        /// Export id returned by `get_service`.
        service: u64,
        /// Method name.
        method: String,
        /// JSON arguments.
        #[serde(default)]
        args: Value,
    },

    /// Stop the hosted framework.
    StopFramework,

    /// Drop every bundle and service.
    Reset,

    /// Health check.
    Ping,
}

impl Request {
    /// Wire name of the action, for logs.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::Install { .. } => "install",
            Self::StartBundle { .. } => "start_bundle",
            Self::BundleState { .. } => "bundle_state",
            Self::SetStartLevel { .. } => "set_start_level",
            Self::GetService { .. } => "get_service",
            Self::Invoke { .. } => "invoke",
            Self::StopFramework => "stop_framework",
            Self::Reset => "reset",
            Self::Ping => "ping",
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// Response from bridge to driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// Success response.
    Ok(OkPayload),
    /// Error response.
    Error(ErrorPayload),
}

impl Response {
    /// Creates a success response with no data.
    #[must_use]
    pub fn ok() -> Self {
        Self::Ok(OkPayload { data: None })
    }

    /// Creates a success response with data.
    #[must_use]
    pub fn ok_with_data(data: ResponseData) -> Self {
        Self::Ok(OkPayload { data: Some(data) })
    }

    /// Creates an error response.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            code,
            message: message.into(),
        })
    }

    /// Creates an error response describing `err`.
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        Self::error(ErrorCode::from_error(err), err.to_string())
    }

    /// Returns true if this is a success response.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Success payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkPayload {
    /// Optional response data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

/// Response data variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
    /// Binding resolved.
    Bound {
        /// Binding name.
        name: String,
    },

    /// Bundle installed.
    Installed {
        /// Backend-scoped bundle id.
        bundle: u64,
    },

    /// Bundle state.
    State {
        /// Current lifecycle state.
        state: BundleState,
    },

    /// Service exported.
    Service {
        /// Export id for subsequent `invoke` requests.
        service: u64,
        /// Registered type name.
        type_name: String,
    },

    /// Result of a service invocation.
    Value {
        /// JSON result.
        value: Value,
    },

    /// Pong response.
    Pong {
        /// Crate version of the bridge.
        version: String,
        /// Number of installed bundles.
        bundle_count: usize,
    },
}

/// Error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Bundle id unknown.
    BundleNotFound,
    /// Install rejected.
    InstallFailed,
    /// Bundle could not start.
    StartFailed,
    /// Illegal lifecycle transition.
    InvalidState,
    /// Start level out of range.
    InvalidStartLevel,
    /// Operation not supported by the hosted runtime.
    NotSupported,
    /// No service matches the lookup.
    ServiceNotFound,
    /// Service invocation failed.
    ServiceFailed,
    /// Method not declared by the service.
    UnknownMethod,
    /// Malformed filter expression.
    InvalidFilter,
    /// No binding under the requested name.
    NotBound,
    /// Binding exists but its export was revoked.
    Revoked,
    /// Request timeout.
    Timeout,
    /// Invalid request format.
    InvalidRequest,
    /// Internal bridge error.
    Internal,
}

impl ErrorCode {
    /// Maps a local error onto the wire code.
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::BundleNotFound(_) => Self::BundleNotFound,
            Error::InstallFailed { .. } => Self::InstallFailed,
            Error::StartFailed { .. } | Error::AlreadyStarted(_) => Self::StartFailed,
            Error::InvalidState { .. } => Self::InvalidState,
            Error::InvalidStartLevel { .. } => Self::InvalidStartLevel,
            Error::NotSupported(_) => Self::NotSupported,
            Error::ServiceFailed { .. } => Self::ServiceFailed,
            Error::UnknownMethod { .. } => Self::UnknownMethod,
            Error::InvalidFilter { .. } => Self::InvalidFilter,
            Error::NotBound(_) => Self::NotBound,
            Error::Revoked(_) => Self::Revoked,
            Error::Timeout { .. } => Self::Timeout,
            Error::Serialization(_) => Self::InvalidRequest,
            _ => Self::Internal,
        }
    }

    /// Wire spelling of the code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BundleNotFound => "bundle_not_found",
            Self::InstallFailed => "install_failed",
            Self::StartFailed => "start_failed",
            Self::InvalidState => "invalid_state",
            Self::InvalidStartLevel => "invalid_start_level",
            Self::NotSupported => "not_supported",
            Self::ServiceNotFound => "service_not_found",
            Self::ServiceFailed => "service_failed",
            Self::UnknownMethod => "unknown_method",
            Self::InvalidFilter => "invalid_filter",
            Self::NotBound => "not_bound",
            Self::Revoked => "revoked",
            Self::Timeout => "timeout",
            Self::InvalidRequest => "invalid_request",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Wire Format Helpers
// =============================================================================

impl Call {
    /// Creates a call addressed to binding `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, request: Request) -> Self {
        Self {
            name: name.into(),
            request,
        }
    }

    /// Serializes the call to a JSON line (with newline).
    ///
    /// # Errors
    ///
    /// Returns error if JSON serialization fails.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserializes a call from JSON.
    ///
    /// # Errors
    ///
    /// Returns error if JSON deserialization fails.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s.trim())
    }
}

impl Response {
    /// Serializes the response to a JSON line (with newline).
    ///
    /// # Errors
    ///
    /// Returns error if JSON serialization fails.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserializes a response from JSON.
    ///
    /// # Errors
    ///
    /// Returns error if JSON deserialization fails.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s.trim())
    }
}
