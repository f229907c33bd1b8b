//! Authentication credentials and validators (spec §3, §4.4, §6).

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{KiteError, Result};

/// The three recognized credential kinds (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialKind {
    KiteKey,
    Token,
    #[serde(rename = "sessionID")]
    SessionId,
}

/// `{type, key, validUntil}` (spec §3). `valid_until` only applies to
/// `token` credentials and drives pre-emptive renewal (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "type")]
    pub kind: CredentialKind,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub valid_until: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn kite_key(key: impl Into<String>) -> Self {
        Credential {
            kind: CredentialKind::KiteKey,
            key: key.into(),
            valid_until: None,
        }
    }

    pub fn token(key: impl Into<String>, valid_until: DateTime<Utc>) -> Self {
        Credential {
            kind: CredentialKind::Token,
            key: key.into(),
            valid_until: Some(valid_until),
        }
    }

    pub fn session_id(key: impl Into<String>) -> Self {
        Credential {
            kind: CredentialKind::SessionId,
            key: key.into(),
            valid_until: None,
        }
    }

    /// Seconds until this credential should be renewed (30s before expiry,
    /// spec §4.4), or `None` if it never expires / isn't due yet to compute
    /// from a duration.
    pub fn renew_at(&self) -> Option<DateTime<Utc>> {
        self.valid_until.map(|exp| exp - chrono::Duration::seconds(30))
    }
}

/// Claims carried by the long-lived kite-key JWT (spec §3, §6). The core
/// only ever reads this; it never mints one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KiteKeyClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub jti: String,
    pub iat: i64,
    #[serde(rename = "kontrolURL")]
    pub kontrol_url: String,
    #[serde(rename = "kontrolKey")]
    pub kontrol_key: String,
}

/// Claims carried by a short-lived access token (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// The outcome of validating an inbound credential: who the caller is.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub username: String,
}

/// Looks up a `sessionID` credential against whatever external store holds
/// active sessions. The core has no opinion on that store's shape (spec §4.4
/// "defers to an external lookup"); a host process supplies one.
pub trait SessionLookup: Send + Sync {
    fn lookup(&self, session_id: &str) -> Option<String>;
}

/// Validates inbound `authentication` credentials against the matching kind
/// (spec §4.4). `local_kite_id` is this process's own id, since access
/// tokens must be scoped to it.
pub struct Authenticator {
    pub kontrol_public_key: Option<DecodingKey>,
    pub trusted_issuer: Option<String>,
    pub local_kite_id: String,
    pub session_lookup: Option<std::sync::Arc<dyn SessionLookup>>,
}

impl Authenticator {
    pub fn validate(&self, credential: &Credential) -> Result<Authenticated> {
        match credential.kind {
            CredentialKind::KiteKey => self.validate_kite_key(&credential.key),
            CredentialKind::Token => self.validate_token(&credential.key),
            CredentialKind::SessionId => self.validate_session(&credential.key),
        }
    }

    fn validate_kite_key(&self, token: &str) -> Result<Authenticated> {
        let key = self
            .kontrol_public_key
            .as_ref()
            .ok_or_else(|| KiteError::AuthenticationError("no trusted kontrol key configured".into()))?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        let data = decode::<KiteKeyClaims>(token, key, &validation).map_err(|e| KiteError::AuthenticationError(e.to_string()))?;
        if let Some(expected) = &self.trusted_issuer {
            if &data.claims.iss != expected {
                return Err(KiteError::AuthenticationError(format!("untrusted issuer: {}", data.claims.iss)));
            }
        }
        Ok(Authenticated {
            username: data.claims.sub,
        })
    }

    fn validate_token(&self, token: &str) -> Result<Authenticated> {
        let key = self
            .kontrol_public_key
            .as_ref()
            .ok_or_else(|| KiteError::AuthenticationError("no trusted kontrol key configured".into()))?;
        let validation = Validation::new(Algorithm::RS256);
        let data = decode::<AccessTokenClaims>(token, key, &validation).map_err(|e| KiteError::AuthenticationError(e.to_string()))?;
        if data.claims.sub != self.local_kite_id {
            return Err(KiteError::AuthenticationError("token not scoped to this kite".into()));
        }
        Ok(Authenticated {
            username: data.claims.sub,
        })
    }

    fn validate_session(&self, session_id: &str) -> Result<Authenticated> {
        let lookup = self
            .session_lookup
            .as_ref()
            .ok_or_else(|| KiteError::AuthenticationError("no session lookup configured".into()))?;
        lookup
            .lookup(session_id)
            .map(|username| Authenticated { username })
            .ok_or_else(|| KiteError::AuthenticationError("unknown session".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renew_at_is_thirty_seconds_before_expiry() {
        let exp = Utc::now() + chrono::Duration::seconds(120);
        let cred = Credential::token("abc", exp);
        let renew = cred.renew_at().unwrap();
        assert_eq!((exp - renew).num_seconds(), 30);
    }

    #[test]
    fn session_lookup_failure_is_authentication_error() {
        struct Empty;
        impl SessionLookup for Empty {
            fn lookup(&self, _session_id: &str) -> Option<String> {
                None
            }
        }
        let auth = Authenticator {
            kontrol_public_key: None,
            trusted_issuer: None,
            local_kite_id: "kite-1".into(),
            session_lookup: Some(std::sync::Arc::new(Empty)),
        };
        let err = auth.validate(&Credential::session_id("nope")).unwrap_err();
        assert_eq!(err.kind(), "authenticationError");
    }
}
