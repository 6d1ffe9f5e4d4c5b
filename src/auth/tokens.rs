//! Token storage and management

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Stored bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    pub expires_at: Option<u64>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl StoredToken {
    /// Wrap a JWT access token, reading its `exp` claim when present.
    pub fn from_jwt(token: String) -> Self {
        let expires_at = jwt_expiry(&token);
        Self { token, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            // Consider expired if less than 5 minutes remaining
            Some(exp) => unix_now() + 300 >= exp,
            None => false,
        }
    }
}

/// `exp` claim of an unverified JWT. The server is the one that validates it;
/// the client only uses it to avoid sending a token it knows is stale.
fn jwt_expiry(token: &str) -> Option<u64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp").and_then(|exp| exp.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with(claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{}.{}.sig", header, payload)
    }

    #[test]
    fn reads_exp_claim() {
        let token = StoredToken::from_jwt(jwt_with(&serde_json::json!({
            "sub": "ada@example.com",
            "exp": 4102444800u64
        })));
        assert_eq!(token.expires_at, Some(4102444800));
        assert!(!token.is_expired());
    }

    #[test]
    fn expired_jwt_is_detected() {
        let token = StoredToken::from_jwt(jwt_with(&serde_json::json!({"exp": 1000})));
        assert!(token.is_expired());
    }

    #[test]
    fn opaque_tokens_never_expire_locally() {
        let token = StoredToken::from_jwt("fake-token".to_string());
        assert_eq!(token.expires_at, None);
        assert!(!token.is_expired());
    }
}
