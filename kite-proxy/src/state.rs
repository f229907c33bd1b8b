//! Shared kite-proxy state (modeled on kontrold's `AppState`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::WebSocket;
use dashmap::DashMap;
use kite_core::{KiteIdentity, RpcPeer};
use tokio::sync::oneshot;

use crate::config::Config;
use crate::token::TunnelIssuer;

/// A tunnel the proxy has allocated and is waiting to pair: the private-side
/// leg's accepted socket is handed across `deliver` once it dials back.
pub struct PendingTunnel {
    pub kite_id: String,
    pub deliver: oneshot::Sender<WebSocket>,
}

pub struct AppState {
    /// Private kites that have registered, keyed by their registry id.
    pub registrations: DashMap<String, Arc<RpcPeer>>,
    pub pending_tunnels: DashMap<u64, PendingTunnel>,
    next_seq: AtomicU64,
    pub issuer: TunnelIssuer,
    /// The proxy's own identity, used as the `local_kite` side of the
    /// `/kite` leg's inbound envelope handling.
    pub identity: KiteIdentity,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> crate::error::Result<Arc<AppState>> {
        let issuer = match &config.rsa_key_path {
            Some(path) => {
                let pem = std::fs::read_to_string(path).map_err(|e| crate::error::ProxyError::Key(e.to_string()))?;
                TunnelIssuer::from_pem(&pem, "kite-proxy")?
            }
            None => TunnelIssuer::generate("kite-proxy")?,
        };

        let hostname = hostname::get().map(|h| h.to_string_lossy().into_owned()).unwrap_or_else(|_| "unknown".into());
        let identity = KiteIdentity::new(
            "kite-proxy",
            "prod",
            "proxy",
            "1.0.0",
            "local",
            hostname,
            format!("{}://{}/kite", config.public_scheme, config.public_host),
        )?;

        Ok(Arc::new(AppState {
            registrations: DashMap::new(),
            pending_tunnels: DashMap::new(),
            next_seq: AtomicU64::new(0),
            issuer,
            identity,
            config,
        }))
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// `wss://<proxy-host>/proxy?kiteID=<id>` (spec §4.7 "Assigns a public
    /// URL").
    pub fn public_tunnel_url(&self, kite_id: &str) -> String {
        format!("{}://{}/proxy?kiteID={}", self.config.public_scheme, self.config.public_host, kite_id)
    }

    pub fn tunnel_leg_url(&self, token: &str) -> String {
        format!("{}://{}/tunnel?token={}", self.config.public_scheme, self.config.public_host, token)
    }
}
