//! HMAC request signing for backend authentication.
//!
//! Every upstream request carries `X-Gateway-Timestamp` (Unix seconds) and
//! `X-Gateway-Signature`, the hex HMAC-SHA256 of `"<service>:<timestamp>"`
//! under the process-wide `GATEWAY_SECRET_KEY`. Backends re-compute the MAC to
//! verify the request came through the gateway.
use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use http::{HeaderMap, HeaderValue};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "X-Gateway-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-Gateway-Signature";

pub struct RequestSigner {
    secret: Vec<u8>,
}

impl RequestSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Read `GATEWAY_SECRET_KEY` once at startup. An empty key still signs,
    /// with a single warning.
    pub fn from_env() -> Self {
        let secret = std::env::var("GATEWAY_SECRET_KEY").unwrap_or_default();
        if secret.is_empty() {
            tracing::warn!(
                "GATEWAY_SECRET_KEY is not set; upstream requests will be signed with an empty key"
            );
        }
        Self::new(secret)
    }

    /// Attach the timestamp and signature headers for a request to `service`.
    pub fn sign(&self, service: &str, headers: &mut HeaderMap) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            .to_string();
        let signature = self.signature_for(service, &timestamp);

        if let Ok(value) = HeaderValue::from_str(&timestamp) {
            headers.insert(TIMESTAMP_HEADER, value);
        }
        if let Ok(value) = HeaderValue::from_str(&signature) {
            headers.insert(SIGNATURE_HEADER, value);
        }
    }

    /// Hex HMAC-SHA256 over `"<service>:<timestamp>"`.
    pub fn signature_for(&self, service: &str, timestamp: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts keys of any length");
        mac.update(format!("{service}:{timestamp}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}
