//! kontrold — the Kontrol registry server for the Kite P2P messaging runtime.

pub mod axum_transport;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod state;
pub mod token;

pub use config::Config;
pub use error::{KontroldError, Result};
pub use state::AppState;
