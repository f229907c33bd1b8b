//! kite-proxy — the reverse proxy that lets a Kite behind NAT register a
//! public URL and accept tunneled connections through it (spec §4.7).

pub mod axum_transport;
pub mod config;
pub mod error;
pub mod server;
pub mod state;
pub mod token;

pub use config::Config;
pub use error::{ProxyError, Result};
pub use state::AppState;
