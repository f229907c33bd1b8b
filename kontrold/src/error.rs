//! Error types for kontrold.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum KontroldError {
    #[error("kite error: {0}")]
    Kite(#[from] kite_core::KiteError),

    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("rsa key error: {0}")]
    Key(String),

    #[error("no such kite: {0}")]
    NotFound(String),

    #[error("invalid heartbeat interval: {0}")]
    InvalidHeartbeat(u64),
}

impl IntoResponse for KontroldError {
    fn into_response(self) -> Response {
        let status = match &self {
            KontroldError::NotFound(_) => StatusCode::NOT_FOUND,
            KontroldError::InvalidHeartbeat(_) => StatusCode::BAD_REQUEST,
            KontroldError::Kite(_) | KontroldError::Jwt(_) | KontroldError::Key(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

pub type Result<T> = std::result::Result<T, KontroldError>;
