//! Error types for monarch.
//!
//! Coordination failures are terminal for the launching process. The invoking
//! layer turns them into an exit code and a one-line message; expected
//! terminations (forwarding, diagnostics) are not errors and never appear here.

use crate::ipc::wire::RpcCode;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for monarch.
#[derive(Debug, Error)]
pub enum MonarchError {
    // Coordination errors
    #[error("Failed to bind instance endpoint {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Instance endpoint {endpoint} exists but nothing is listening")]
    ConnectionRefused { endpoint: String },

    #[error("Failed to connect to running instance at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Instance endpoint {endpoint} is owned by a different user or privilege level")]
    PermissionConflict { endpoint: String },

    #[error(
        "Running tests from the command line is only supported if no other instance of {product} is running"
    )]
    TestModeConflict { product: String },

    #[error("Failed to remove stale instance endpoint {path:?}: {source}")]
    StaleEndpoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Launch channel errors
    #[error("Connection to running instance at {endpoint} was lost")]
    PeerLost { endpoint: String },

    #[error("Running instance returned error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    // Diagnostics
    #[error("Process not found: {pid}")]
    ProcessNotFound { pid: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for monarch operations.
pub type Result<T> = std::result::Result<T, MonarchError>;

impl From<serde_json::Error> for MonarchError {
    fn from(err: serde_json::Error) -> Self {
        MonarchError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl MonarchError {
    /// Error code sent back to a launching process for this failure.
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            MonarchError::MethodNotFound { .. } => RpcCode::METHOD_NOT_FOUND,
            MonarchError::InvalidParams { .. } | MonarchError::Json { .. } => {
                RpcCode::INVALID_PARAMS
            }
            MonarchError::Validation { .. } => RpcCode::LAUNCH_REJECTED,
            MonarchError::ProcessNotFound { .. } => RpcCode::PROCESS_NOT_FOUND,
            _ => RpcCode::INTERNAL,
        }
    }

    /// True when the running instance belongs to a different privilege level.
    ///
    /// The invoking layer uses this to show a dedicated message instead of a
    /// generic failure.
    pub fn is_permission_conflict(&self) -> bool {
        matches!(self, MonarchError::PermissionConflict { .. })
    }
}
