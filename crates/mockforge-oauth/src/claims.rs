//! JWT claims issued/verified against an [`mockforge_core::OAuthSpec`]'s
//! shared HMAC secret.

use serde::{Deserialize, Serialize};

/// Minimal OIDC claim set for a mock-issued access/ID token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Claims {
    pub fn new(issuer: &str, subject: &str, ttl_secs: u64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: subject.to_string(),
            iss: issuer.to_string(),
            aud: issuer.to_string(),
            iat: now,
            exp: now + ttl_secs as i64,
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }
}
