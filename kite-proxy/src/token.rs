//! Tunnel token minting and verification (spec §4.7, §6 "Tunnel token JWT
//! claims"): `{iss, sub, seq, iat, exp = iat+1h, nbf = iat-1m}`, RS256.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelClaims {
    pub iss: String,
    /// The private kite's registry id this tunnel terminates at.
    pub sub: String,
    /// The tunnel sequence number, unique per proxy process instance.
    pub seq: u64,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
}

pub struct TunnelIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl TunnelIssuer {
    pub fn generate(issuer: impl Into<String>) -> Result<TunnelIssuer> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).map_err(|e| ProxyError::Key(e.to_string()))?;
        Self::from_private_key(private_key, issuer)
    }

    pub fn from_pem(pem: &str, issuer: impl Into<String>) -> Result<TunnelIssuer> {
        let private_key = RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| ProxyError::Key(e.to_string()))?;
        Self::from_private_key(private_key, issuer)
    }

    fn from_private_key(private_key: RsaPrivateKey, issuer: impl Into<String>) -> Result<TunnelIssuer> {
        let public_key = RsaPublicKey::from(&private_key);
        let private_pem = private_key.to_pkcs1_pem(Default::default()).map_err(|e| ProxyError::Key(e.to_string()))?;
        let public_pem = public_key.to_pkcs1_pem(Default::default()).map_err(|e| ProxyError::Key(e.to_string()))?;

        Ok(TunnelIssuer {
            encoding_key: EncodingKey::from_rsa_pem(private_pem.as_bytes()).map_err(ProxyError::Jwt)?,
            decoding_key: DecodingKey::from_rsa_pem(public_pem.as_bytes()).map_err(ProxyError::Jwt)?,
            issuer: issuer.into(),
        })
    }

    /// Sign a fresh tunnel token for `(kite_id, seq)` (spec §4.7 step iii).
    pub fn issue(&self, kite_id: &str, seq: u64) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = TunnelClaims {
            iss: self.issuer.clone(),
            sub: kite_id.to_string(),
            seq,
            iat: now,
            exp: now + 3600,
            nbf: now - 60,
        };
        let header = Header::new(Algorithm::RS256);
        encode(&header, &claims, &self.encoding_key).map_err(ProxyError::Jwt)
    }

    /// Decode and cryptographically validate a tunnel token (signature,
    /// `exp`, `nbf`), without checking `sub`/`seq` — used by the `/tunnel`
    /// handler to learn which pending tunnel the token claims before it
    /// knows what to check it against.
    pub fn decode(&self, token: &str) -> Result<TunnelClaims> {
        let validation = Validation::new(Algorithm::RS256);
        let data = decode::<TunnelClaims>(token, &self.decoding_key, &validation).map_err(ProxyError::Jwt)?;
        Ok(data.claims)
    }

    /// Verify a tunnel token presented on the `/tunnel` leg, checking `sub`
    /// and `seq` against what the proxy expects (spec §4.7 step v).
    pub fn verify(&self, token: &str, expected_kite_id: &str, expected_seq: u64) -> Result<TunnelClaims> {
        let claims = self.decode(token)?;
        if claims.sub != expected_kite_id || claims.seq != expected_seq {
            return Err(ProxyError::TunnelRejected("token does not match the requested tunnel".into()));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_round_trips_through_verify() {
        let issuer = TunnelIssuer::generate("kite-proxy").unwrap();
        let token = issuer.issue("kite-123", 7).unwrap();
        let claims = issuer.verify(&token, "kite-123", 7).unwrap();
        assert_eq!(claims.sub, "kite-123");
        assert_eq!(claims.seq, 7);
    }

    #[test]
    fn verify_rejects_mismatched_sequence() {
        let issuer = TunnelIssuer::generate("kite-proxy").unwrap();
        let token = issuer.issue("kite-123", 7).unwrap();
        assert!(issuer.verify(&token, "kite-123", 8).is_err());
    }
}
