//! Shared error types across rpcmux crates.
//!
//! Two layers live here:
//! - [`RpcError`] is the Rust-side failure surface (framing, transport,
//!   timeouts, config). Only framing and connection-level variants ever fail a
//!   whole call.
//! - [`ErrorPayload`] is the structured per-action error that travels on the
//!   wire inside an `error` envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Stable error codes (string form used in logs and metrics labels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed frame, bad length, unknown kind byte, invalid JSON.
    Framing,
    /// Connect refused, abrupt close, handshake failure.
    Transport,
    /// Connection or manager closed explicitly.
    Closed,
    /// Local wait for a reply expired.
    Timeout,
    /// Every candidate transport failed.
    AllTransportsFailed,
    /// The peer answered with a structured error.
    Remote,
    /// Invalid configuration.
    Config,
    /// Internal invariant violation.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Framing => "FRAMING",
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::Closed => "CLOSED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::AllTransportsFailed => "ALL_TRANSPORTS_FAILED",
            ErrorCode::Remote => "REMOTE",
            ErrorCode::Config => "CONFIG",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Unified error type used by core, gateway and client.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("framing: {0}")]
    Framing(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("connection closed")]
    Closed,
    #[error("timed out waiting for action {action}")]
    Timeout { action: String },
    #[error("all transports failed: {}", summarize(.0))]
    AllTransportsFailed(Vec<(String, String)>),
    #[error("remote error {}: {}", .0.code, .0.message)]
    Remote(ErrorPayload),
    #[error("config: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

fn summarize(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(kind, err)| format!("{kind}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl RpcError {
    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            RpcError::Framing(_) => ErrorCode::Framing,
            RpcError::Transport(_) => ErrorCode::Transport,
            RpcError::Closed => ErrorCode::Closed,
            RpcError::Timeout { .. } => ErrorCode::Timeout,
            RpcError::AllTransportsFailed(_) => ErrorCode::AllTransportsFailed,
            RpcError::Remote(_) => ErrorCode::Remote,
            RpcError::Config(_) => ErrorCode::Config,
            RpcError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Errors raised while opening or first writing to a physical channel.
    /// These are the ones the transport selector reacts to.
    pub fn is_establishment(&self) -> bool {
        matches!(self, RpcError::Transport(_) | RpcError::Closed)
    }

    pub fn framing(msg: impl Into<String>) -> Self {
        RpcError::Framing(msg.into())
    }

    pub fn transport(msg: impl std::fmt::Display) -> Self {
        RpcError::Transport(msg.to_string())
    }
}

/// Error category carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Parameters rejected by the validator.
    Validation,
    /// Anything else: thrown actions, missing client functions, timeouts.
    Generic,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Generic => "generic",
        }
    }
}

/// Structured per-action error (`error` field of an error envelope).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: u16,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Value>,
}

impl ErrorPayload {
    /// Validation failure (code 400) carrying the validator's error list.
    pub fn validation(errors: Vec<Value>) -> Self {
        Self {
            code: 400,
            kind: ErrorKind::Validation,
            message: "validation failed".into(),
            errors: Some(errors),
            cause: None,
        }
    }

    /// Generic failure with an explicit code.
    pub fn generic(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: ErrorKind::Generic,
            message: message.into(),
            errors: None,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: Value) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Local timeout, reported per action so siblings are unaffected.
    pub fn timeout(action: &str) -> Self {
        Self::generic(408, format!("timed out waiting for action {action}"))
    }
}

/// Application failure raised by an action executor or a client function.
///
/// Converted into a `generic` [`ErrorPayload`]; only `message`, `code` and the
/// optional JSON `cause` cross the wire.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ActionError {
    pub code: Option<u16>,
    pub message: String,
    pub cause: Option<Value>,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_cause(mut self, cause: Value) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn into_payload(self) -> ErrorPayload {
        ErrorPayload {
            code: self.code.unwrap_or(400),
            kind: ErrorKind::Generic,
            message: self.message,
            errors: None,
            cause: self.cause,
        }
    }
}

impl From<ErrorPayload> for ActionError {
    fn from(p: ErrorPayload) -> Self {
        Self {
            code: Some(p.code),
            message: p.message,
            cause: p.cause,
        }
    }
}

impl From<RpcError> for ActionError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Remote(p) => p.into(),
            RpcError::Timeout { .. } => ActionError::new(e.to_string()).with_code(408),
            other => ActionError::new(other.to_string()).with_code(500),
        }
    }
}
