//! Ingress JWT validation.
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

/// Claims carried by an ingress bearer token. `exp` is mandatory and enforced;
/// `user_id` is forwarded upstream as `X-User-ID`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Validates HS256 bearer tokens against the process-wide `JWT_SECRET`.
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            // Validation::new requires and enforces `exp` by default.
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Read `JWT_SECRET` once at startup.
    pub fn from_env() -> Self {
        let secret = std::env::var("JWT_SECRET").unwrap_or_default();
        if secret.is_empty() {
            tracing::warn!("JWT_SECRET is not set; all bearer tokens will be rejected");
        }
        Self::new(&secret)
    }

    /// Parse and verify a token, returning its claims. The token itself is
    /// never logged here or by callers.
    pub fn validate(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding_key, &self.validation).map(|data| data.claims)
    }
}
