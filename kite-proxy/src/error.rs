//! Error types for kite-proxy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("kite error: {0}")]
    Kite(#[from] kite_core::KiteError),

    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("rsa key error: {0}")]
    Key(String),

    #[error("no such kite registered: {0}")]
    UnknownKite(String),

    #[error("tunnel token rejected: {0}")]
    TunnelRejected(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::UnknownKite(_) => StatusCode::NOT_FOUND,
            ProxyError::TunnelRejected(_) => StatusCode::UNAUTHORIZED,
            ProxyError::Kite(_) | ProxyError::Jwt(_) | ProxyError::Key(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
