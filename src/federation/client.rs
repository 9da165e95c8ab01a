//! Federation outbound client
//!
//! Signs envelopes with the shared secret and posts them to the remote
//! hub's inbox. The signature covers the exact raw bytes that go on the
//! wire. Timeouts are bounded by the configured federation timeout; errors
//! leave the local receipt un-delivered for the caller to surface.

use super::envelope::{FederationEnvelope, SIGNATURE_HEADER, sign};
use super::FederationError;
use crate::config::FederationConfig;
use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

/// HTTP client for remote hub inboxes
#[derive(Debug, Clone)]
pub struct FederationClient {
    http: reqwest::Client,
    config: FederationConfig,
}

impl FederationClient {
    /// Builds a client with the configured outbound timeout
    #[must_use]
    pub fn new(config: FederationConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    /// Posts a signed envelope to `to_domain`'s inbox
    ///
    /// # Errors
    ///
    /// Returns an error on serialization or transport failure; non-2xx
    /// statuses are returned for the caller to interpret
    pub async fn send(
        &self,
        to_domain: &str,
        envelope: &FederationEnvelope,
    ) -> Result<StatusCode, FederationError> {
        let raw = envelope
            .to_signing_bytes()
            .map_err(|e| FederationError::Malformed {
                reason: e.to_string(),
            })?;
        let url = format!("http://{to_domain}/api/v1/a2a/federation/inbox");
        debug!(%url, envelope_id = %envelope.id, "posting federation envelope");
        self.post_signed(&url, raw).await
    }

    /// Posts an ACK for a previously received envelope back to its origin
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure
    pub async fn ack(
        &self,
        to_domain: &str,
        envelope_id: &str,
    ) -> Result<StatusCode, FederationError> {
        let raw = serde_json::to_vec(&json!({"message_id": envelope_id})).map_err(|e| {
            FederationError::Malformed {
                reason: e.to_string(),
            }
        })?;
        let url = format!("http://{to_domain}/api/v1/a2a/federation/ack");
        debug!(%url, envelope_id, "posting federation ack");
        self.post_signed(&url, raw).await
    }

    async fn post_signed(&self, url: &str, raw: Vec<u8>) -> Result<StatusCode, FederationError> {
        let mut request = self
            .http
            .post(url)
            .header("Content-Type", "application/json");
        if let Some(secret) = &self.config.shared_secret {
            request = request.header(SIGNATURE_HEADER, sign(secret, &raw));
        }
        let response = request
            .body(raw)
            .send()
            .await
            .map_err(|e| FederationError::Transport {
                detail: e.to_string(),
            })?;
        Ok(response.status())
    }
}
