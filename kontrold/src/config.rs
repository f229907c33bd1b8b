//! kontrold configuration — all from environment variables.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for the `/kite` websocket RPC endpoint.
    pub listen_addr: String,
    /// Kontrol's own identity, used as `iss` on issued tokens.
    pub kontrol_user: String,
    /// Path to a PEM-encoded RSA private key. When unset a fresh keypair is
    /// generated at startup (fine for a single-process deployment, per the
    /// teacher's "fresh keypair is fine for Phase 1" precedent).
    pub rsa_key_path: Option<String>,
    /// Default heartbeat interval handed to newly registered kites, in
    /// seconds (spec §4.6).
    pub heartbeat_interval_secs: u64,
    /// Grace beyond `heartbeat_interval_secs` before an entry is evicted.
    /// Spec open question (c): one missed heartbeat's worth of grace.
    pub heartbeat_grace_secs: u64,
    /// Access token lifetime, in seconds.
    pub token_ttl_secs: i64,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        let heartbeat_interval_secs = env::var("KONTROL_HEARTBEAT_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        Self {
            listen_addr: env::var("KONTROL_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            kontrol_user: env::var("KONTROL_USER").unwrap_or_else(|_| "kontrol".into()),
            rsa_key_path: env::var("KONTROL_RSA_KEY_PATH").ok(),
            heartbeat_interval_secs,
            heartbeat_grace_secs: env::var("KONTROL_HEARTBEAT_GRACE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(heartbeat_interval_secs),
            token_ttl_secs: env::var("KONTROL_TOKEN_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "kontrold=info,tower_http=info".into()),
        }
    }
}
