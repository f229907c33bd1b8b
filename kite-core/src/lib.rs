//! Core dnode codec, transport, RPC peer, and Kite envelope/authentication
//! for the Kite peer-to-peer messaging runtime. Every Kite process —
//! including Kontrol itself and the reverse proxy — embeds this crate.

pub mod auth;
pub mod config;
pub mod dnode;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod kontrol_client;
pub mod peer;
pub mod transport;

pub use auth::{Authenticated, Authenticator, Credential, CredentialKind};
pub use config::KiteConfig;
pub use envelope::Request;
pub use error::{KiteError, Result};
pub use identity::{KiteIdentity, Query};
pub use peer::{Concurrency, RpcPeer};
pub use transport::{Session, SessionEvent};
