//! Ed25519 key material and token minting for tests.
//!
//! Feature-gated behind `testutil`. Downstream crates enable it from
//! `[dev-dependencies]`:
//!
//! ```toml
//! orange = { workspace = true, features = ["testutil"] }
//! ```
//!
//! Keys are derived from a one-byte seed so that tests are deterministic.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use ed25519_dalek::SigningKey;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

use crate::jwks::SigningKeySet;

/// A deterministic Ed25519 signer standing in for the token authority.
pub struct TestSigner {
    kid: Option<String>,
    pkcs8_der: Vec<u8>,
    public_key: [u8; 32],
}

impl TestSigner {
    pub fn from_seed(seed: u8, kid: Option<&str>) -> Self {
        let signing_key = SigningKey::from_bytes(&[seed; 32]);
        let mut pkcs8_der = vec![
            0x30, 0x2e, // SEQUENCE, 46 bytes
            0x02, 0x01, 0x00, // INTEGER version 0
            0x30, 0x05, // SEQUENCE, algorithm identifier
            0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
            0x04, 0x22, // OCTET STRING, 34 bytes
            0x04, 0x20, // OCTET STRING, 32 bytes
        ];
        pkcs8_der.extend_from_slice(&signing_key.to_bytes());

        Self {
            kid: kid.map(str::to_string),
            pkcs8_der,
            public_key: signing_key.verifying_key().to_bytes(),
        }
    }

    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// Public half as an OKP JWK.
    pub fn jwk(&self) -> Jwk {
        let mut value = json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(self.public_key),
            "alg": "EdDSA",
            "use": "sig",
        });
        if let Some(kid) = &self.kid {
            value["kid"] = json!(kid);
        }
        serde_json::from_value(value).expect("OKP JWK is well-formed")
    }

    pub fn jwk_set(&self) -> JwkSet {
        jwk_set(&[self])
    }

    /// Sign `claims` with this key, putting `kid` in the header when set.
    ///
    /// # Panics
    ///
    /// Panics if encoding fails, which does not happen for JSON object claims.
    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = self.kid.clone();
        jsonwebtoken::encode(&header, claims, &EncodingKey::from_ed_der(&self.pkcs8_der))
            .expect("Ed25519 signing succeeds")
    }
}

pub fn jwk_set(signers: &[&TestSigner]) -> JwkSet {
    JwkSet {
        keys: signers.iter().map(|s| s.jwk()).collect(),
    }
}

pub fn key_set(signers: &[&TestSigner]) -> SigningKeySet {
    SigningKeySet::from_jwks(&jwk_set(signers)).expect("test key set is usable")
}

/// Claims of a token valid for the next hour.
pub fn valid_claims(jti: Option<&str>) -> Value {
    let now = Utc::now().timestamp();
    let mut claims = json!({
        "iss": "https://auth.orange.test",
        "sub": "user-42",
        "iat": now,
        "exp": now + 3600,
    });
    if let Some(jti) = jti {
        claims["jti"] = json!(jti);
    }
    claims
}

/// Claims of a token that expired an hour ago.
pub fn expired_claims(jti: Option<&str>) -> Value {
    let mut claims = valid_claims(jti);
    let now = Utc::now().timestamp();
    claims["iat"] = json!(now - 7200);
    claims["exp"] = json!(now - 3600);
    claims
}

/// Assemble a compact JWT from arbitrary parts without signing anything.
pub fn craft_raw_jwt(header: &Value, claims: &Value, signature: &[u8]) -> String {
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string()),
        URL_SAFE_NO_PAD.encode(signature)
    )
}
