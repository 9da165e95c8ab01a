//! Inter-hub envelope and HMAC signing
//!
//! The envelope is the outer JSON structure exchanged between hubs. The
//! signature covers the exact raw request body: signing always serializes
//! with compact encoding (no whitespace) and verification runs over the
//! bytes as received, so any byte mutation invalidates the signature.

use crate::config::FederationConfig;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Optional embedded signature block (alternative to the header transport)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvelopeSignature {
    /// Identifier of the signing key
    pub key_id: String,
    /// Signing algorithm label
    pub alg: String,
    /// Base64 signature bytes
    pub sig: String,
}

/// The inter-hub message envelope
///
/// `id` is the stable envelope id used for dedupe and ACK; outbound local
/// messages reuse their message id here so the remote hub can ACK it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationEnvelope {
    /// Stable envelope id
    pub id: String,
    /// Sender address `name@domain`
    pub from: String,
    /// Recipient address `name@domain`
    pub to: String,
    /// Message type; unknown values coerce to `notification`
    #[serde(rename = "type")]
    pub message_type: String,
    /// Opaque payload object
    pub payload: serde_json::Value,
    /// Optional ISO-8601 timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Whether the sender expects a response
    #[serde(default)]
    pub requires_response: bool,
    /// Optional embedded signature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<EnvelopeSignature>,
}

impl FederationEnvelope {
    /// Serializes with compact encoding for bit-stable signing
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized
    pub fn to_signing_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Signs a raw body, producing the `sha256=<hex>` header value
#[must_use]
pub fn sign(secret: &str, raw_body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts keys of any length"));
    mac.update(raw_body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verifies an inbound body against the signature header
///
/// Rules:
/// - when `hmac_required` is set, a secret must be configured and the
///   header must carry a valid digest;
/// - when not required, unsigned requests are accepted with a warning, but
///   a present header is still validated when a secret is configured.
///
/// Comparison is constant-time via the MAC verifier.
#[must_use]
pub fn verify_signature(
    config: &FederationConfig,
    raw_body: &[u8],
    header_value: Option<&str>,
) -> bool {
    let secret = config.shared_secret.as_deref();
    if !config.hmac_required {
        match (secret, header_value) {
            (None, _) => {
                warn!("federation HMAC not required and no secret configured");
                return true;
            }
            (Some(_), None) => {
                warn!("federation HMAC optional: accepting unsigned envelope");
                return true;
            }
            (Some(_), Some(_)) => {}
        }
    }

    let (Some(secret), Some(header)) = (secret, header_value) else {
        return false;
    };
    let Some(sent_hex) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(sent_bytes) = hex::decode(sent_hex.trim()) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts keys of any length"));
    mac.update(raw_body);
    mac.verify_slice(&sent_bytes).is_ok()
}
