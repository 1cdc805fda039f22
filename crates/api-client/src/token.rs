//! Bearer tokens and their expiry.
//!
//! Access tokens are JWTs. The client only reads the `exp` claim to decide when to refresh; it
//! never verifies signatures (the backend does). A token whose payload cannot be decoded, or
//! that carries no `exp`, is treated as invalid.

use crate::constants::BEARER_PREFIX;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Access/refresh token pair as issued by the backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.trim().is_empty()
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct ExpiryClaim {
    #[serde(default)]
    exp: Option<f64>,
}

/// Expiry timestamp from the token's `exp` claim.
///
/// Returns `None` if the token is not a three-part JWT, the payload is not base64url JSON, or
/// there is no usable `exp`.
pub fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.trim().split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&bytes).ok()?;
    let exp = claim.exp.filter(|exp| exp.is_finite())?;

    DateTime::<Utc>::from_timestamp(exp.trunc() as i64, 0)
}

/// True if the token decodes and has not yet expired.
pub fn is_token_valid(token: &str) -> bool {
    is_token_valid_at(token, Utc::now())
}

pub fn is_token_valid_at(token: &str, now: DateTime<Utc>) -> bool {
    decode_expiry(token).is_some_and(|exp| exp > now)
}

/// `Authorization` header value for an access token.
pub fn bearer(access_token: &str) -> String {
    format!("{BEARER_PREFIX}{access_token}")
}
