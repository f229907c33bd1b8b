//! Shared kontrold state (modeled on the teacher's `AppState`).

use std::sync::Arc;

use kite_core::KiteIdentity;

use crate::config::Config;
use crate::registry::Registry;
use crate::token::TokenIssuer;

pub struct AppState {
    pub registry: Registry,
    pub token_issuer: TokenIssuer,
    /// Kontrol's own identity, used as the `local_kite` side of every
    /// inbound envelope it processes (spec §4.4 `Request.localKite`).
    pub identity: KiteIdentity,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> crate::error::Result<Arc<AppState>> {
        let token_issuer = match &config.rsa_key_path {
            Some(path) => {
                let pem = std::fs::read_to_string(path).map_err(|e| crate::error::KontroldError::Key(e.to_string()))?;
                TokenIssuer::from_pem(&pem, config.kontrol_user.clone(), "kite", config.token_ttl_secs)?
            }
            None => TokenIssuer::generate(config.kontrol_user.clone(), "kite", config.token_ttl_secs)?,
        };

        let hostname = hostname::get().map(|h| h.to_string_lossy().into_owned()).unwrap_or_else(|_| "unknown".into());
        let identity = KiteIdentity::new(
            config.kontrol_user.clone(),
            "prod",
            "kontrol",
            "1.0.0",
            "local",
            hostname,
            format!("ws://{}/kite", config.listen_addr),
        )?;

        Ok(Arc::new(AppState {
            registry: Registry::new(),
            token_issuer,
            identity,
            config,
        }))
    }
}
