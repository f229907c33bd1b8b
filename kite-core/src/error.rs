//! Shared error taxonomy (spec §7).
//!
//! Each variant carries the exact wire-level error kind string so it can be
//! sent back through a response callback as `{type, message}` without a
//! separate mapping table.

use std::fmt;

#[derive(Debug, Clone, thiserror::Error)]
pub enum KiteError {
    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("callback not found: {0}")]
    CallbackNotFound(u64),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("authentication error: {0}")]
    AuthenticationError(String),

    #[error("send error: {0}")]
    SendError(String),

    #[error("timeout")]
    Timeout,

    #[error("disconnect")]
    Disconnect,

    #[error("argument error: {0}")]
    Argument(String),
}

impl KiteError {
    /// The stable wire string for this error kind (spec §7's taxonomy).
    pub fn kind(&self) -> &'static str {
        match self {
            KiteError::MethodNotFound(_) => "methodNotFound",
            KiteError::CallbackNotFound(_) => "callbackNotFound",
            KiteError::InvalidResponse(_) => "invalidResponse",
            KiteError::AuthenticationError(_) => "authenticationError",
            KiteError::SendError(_) => "sendError",
            KiteError::Timeout => "timeout",
            KiteError::Disconnect => "disconnect",
            KiteError::Argument(_) => "argument",
        }
    }

    /// Render as the `{type, message}` shape the envelope transmits on error
    /// (spec §4.4).
    pub fn to_wire(&self) -> WireError {
        WireError {
            r#type: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// The `{type, message}` JSON shape an error takes when it crosses the wire.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WireError {
    pub r#type: String,
    pub message: String,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.r#type, self.message)
    }
}

impl From<WireError> for KiteError {
    fn from(e: WireError) -> Self {
        match e.r#type.as_str() {
            "methodNotFound" => KiteError::MethodNotFound(e.message),
            "callbackNotFound" => e
                .message
                .parse()
                .map(KiteError::CallbackNotFound)
                .unwrap_or(KiteError::Argument(e.message)),
            "authenticationError" => KiteError::AuthenticationError(e.message),
            "sendError" => KiteError::SendError(e.message),
            "timeout" => KiteError::Timeout,
            "disconnect" => KiteError::Disconnect,
            "invalidResponse" => KiteError::InvalidResponse(e.message),
            _ => KiteError::Argument(e.message),
        }
    }
}

pub type Result<T> = std::result::Result<T, KiteError>;
