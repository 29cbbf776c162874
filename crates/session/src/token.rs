//! Downstream session tokens: an opaque, HMAC-SHA256-signed, TTL-bound string
//! handed to clients at `initialize` and presented on every subsequent call.
//!
//! This is deliberately not a JWT — the token never leaves the pair of services
//! that mint and verify it, so there is no need for the header/claims envelope
//! or algorithm negotiation a general-purpose JWT library buys you. The
//! allow-list token verified in `broker` is a real external JWT; this one is a
//! first-party, symmetric-key secret.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use shared::primitives::WrappedUuidV4;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed session token")]
    Malformed,
    #[error("session token signature mismatch")]
    BadSignature,
    #[error("session token expired")]
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenPayload {
    session_id: WrappedUuidV4,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedToken {
    pub session_id: WrappedUuidV4,
    pub expires_at: DateTime<Utc>,
}

/// Issues and validates downstream session tokens against a single shared
/// signing secret. Clone is cheap; the secret is held behind an `Arc` via the
/// `hmac` key schedule being cloned per call rather than shared mutable state.
#[derive(Clone)]
pub struct SessionTokenManager {
    secret: Vec<u8>,
    ttl: Duration,
}

impl SessionTokenManager {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    /// Mints a fresh session id and wraps it in a signed, TTL-bound token.
    pub fn issue(&self) -> (WrappedUuidV4, String) {
        let session_id = WrappedUuidV4::new();
        let now = Utc::now();
        let payload = TokenPayload {
            session_id,
            issued_at: now,
            expires_at: now + self.ttl,
        };
        (session_id, self.encode(&payload))
    }

    pub fn validate(&self, token: &str) -> Result<ValidatedToken, TokenError> {
        let payload = self.decode(token)?;
        if payload.expires_at <= Utc::now() {
            return Err(TokenError::Expired);
        }
        Ok(ValidatedToken {
            session_id: payload.session_id,
            expires_at: payload.expires_at,
        })
    }

    pub fn expires_at(&self, token: &str) -> Result<DateTime<Utc>, TokenError> {
        Ok(self.decode(token)?.expires_at)
    }

    fn encode(&self, payload: &TokenPayload) -> String {
        let body = serde_json::to_vec(payload).expect("token payload is always serializable");
        let body_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&body);
        let tag = self.sign(body_b64.as_bytes());
        let tag_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(tag);
        format!("{body_b64}.{tag_b64}")
    }

    fn decode(&self, token: &str) -> Result<TokenPayload, TokenError> {
        let (body_b64, tag_b64) = token.split_once('.').ok_or(TokenError::Malformed)?;

        let expected_tag = self.sign(body_b64.as_bytes());
        let given_tag = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(tag_b64)
            .map_err(|_| TokenError::Malformed)?;

        if expected_tag.ct_eq(&given_tag).unwrap_u8() != 1 {
            return Err(TokenError::BadSignature);
        }

        let body = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(body_b64)
            .map_err(|_| TokenError::Malformed)?;
        serde_json::from_slice(&body).map_err(|_| TokenError::Malformed)
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts keys of any length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}
