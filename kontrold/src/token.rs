//! RS256 access-token issuance (spec §4.6 "Token issuance", §6).

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use kite_core::auth::AccessTokenClaims;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::{KontroldError, Result};

/// Kontrol's signing material: an RSA keypair, PEM-encoded for
/// `jsonwebtoken`'s consumption. A fresh keypair may be generated per
/// startup (spec §4.6 "A fresh keypair may be rotated by the storage
/// layer"); issued tokens verify against whichever public key is current.
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    public_key_pem: String,
    issuer: String,
    audience: String,
    ttl: chrono::Duration,
}

impl TokenIssuer {
    /// Generate a fresh 2048-bit RSA keypair (teacher precedent: ed25519
    /// keys generated fresh per process start in `state.rs`, here RS256 per
    /// spec §6).
    pub fn generate(issuer: impl Into<String>, audience: impl Into<String>, ttl_secs: i64) -> Result<TokenIssuer> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).map_err(|e| KontroldError::Key(e.to_string()))?;
        Self::from_private_key(private_key, issuer, audience, ttl_secs)
    }

    pub fn from_pem(pem: &str, issuer: impl Into<String>, audience: impl Into<String>, ttl_secs: i64) -> Result<TokenIssuer> {
        let private_key = RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| KontroldError::Key(e.to_string()))?;
        Self::from_private_key(private_key, issuer, audience, ttl_secs)
    }

    fn from_private_key(private_key: RsaPrivateKey, issuer: impl Into<String>, audience: impl Into<String>, ttl_secs: i64) -> Result<TokenIssuer> {
        let public_key = RsaPublicKey::from(&private_key);
        let private_pem = private_key.to_pkcs1_pem(Default::default()).map_err(|e| KontroldError::Key(e.to_string()))?;
        let public_pem = public_key.to_pkcs1_pem(Default::default()).map_err(|e| KontroldError::Key(e.to_string()))?;

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).map_err(KontroldError::Jwt)?;

        Ok(TokenIssuer {
            encoding_key,
            public_key_pem: public_pem.to_string(),
            issuer: issuer.into(),
            audience: audience.into(),
            ttl: chrono::Duration::seconds(ttl_secs),
        })
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Sign an access token for `kite_id` (spec §4.6, §6 "Access token JWT
    /// claims"): `{iss, sub, aud, iat, exp}`.
    pub fn issue(&self, kite_id: &str) -> Result<(String, chrono::DateTime<Utc>)> {
        let now = Utc::now();
        let exp = now + self.ttl;
        let claims = AccessTokenClaims {
            iss: self.issuer.clone(),
            sub: kite_id.to_string(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };
        let header = Header::new(Algorithm::RS256);
        let token = encode(&header, &claims, &self.encoding_key).map_err(KontroldError::Jwt)?;
        Ok((token, exp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_carries_expected_claims() {
        let issuer = TokenIssuer::generate("kontrol", "kite", 60).unwrap();
        let (token, exp) = issuer.issue("kite-123").unwrap();
        assert!(!token.is_empty());
        assert!(exp > Utc::now());
    }
}
