//! kite-proxy configuration — all from environment variables.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for all three endpoints (`/kite`, `/proxy`, `/tunnel`).
    pub listen_addr: String,
    /// Host:port advertised in minted public URLs, e.g. `proxy.example.com`.
    pub public_host: String,
    /// `ws` or `wss`, matching how `public_host` is actually reachable.
    pub public_scheme: String,
    /// Path to a PEM-encoded RSA private key for signing tunnel tokens. When
    /// unset a fresh keypair is generated at startup.
    pub rsa_key_path: Option<String>,
    /// How long an allocated tunnel waits for its private-side leg to dial
    /// back before being abandoned (spec §4.7: one minute).
    pub pairing_timeout_secs: u64,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            listen_addr: env::var("KITE_PROXY_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8081".into()),
            public_host: env::var("KITE_PROXY_PUBLIC_HOST").unwrap_or_else(|_| "localhost:8081".into()),
            public_scheme: env::var("KITE_PROXY_PUBLIC_SCHEME").unwrap_or_else(|_| "ws".into()),
            rsa_key_path: env::var("KITE_PROXY_RSA_KEY_PATH").ok(),
            pairing_timeout_secs: env::var("KITE_PROXY_PAIRING_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "kite_proxy=info,tower_http=info".into()),
        }
    }
}
