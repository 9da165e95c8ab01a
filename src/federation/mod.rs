//! Federation layer
//!
//! Signed inter-hub envelopes with ACK, remote identity mirroring, and the
//! inbound inbox pipeline. Remote agents appear locally as stub `Agent`
//! rows pinned to `inactive` status in the `federated` category, linked to
//! an organization upserted for their hub domain.

pub mod client;
pub mod envelope;
pub mod inbound;

pub use client::FederationClient;
pub use envelope::{EnvelopeSignature, FederationEnvelope, SIGNATURE_HEADER, sign, verify_signature};
pub use inbound::{InboundOutcome, InboundProcessor};

use crate::database::DatabaseError;
use thiserror::Error;

/// Federation layer errors
#[derive(Debug, Error)]
pub enum FederationError {
    /// Missing or invalid body signature
    #[error("Invalid signature")]
    InvalidSignature,

    /// Envelope could not be parsed or violates addressing rules
    #[error("Malformed envelope: {reason}")]
    Malformed {
        /// Why the envelope was rejected
        reason: String,
    },

    /// Envelope addressed to a different hub
    #[error("Envelope not for this hub: {domain}")]
    WrongDomain {
        /// The domain the envelope was addressed to
        domain: String,
    },

    /// Local recipient does not exist
    #[error("Target agent not found: {name}")]
    UnknownRecipient {
        /// The unresolvable agent name
        name: String,
    },

    /// Federation ACL denied the interaction
    #[error("Federation ACL denied: {reason}")]
    AclDenied {
        /// The evaluator's reason
        reason: String,
    },

    /// Outbound HTTP failure
    #[error("Federation transport error: {detail}")]
    Transport {
        /// Transport-level detail
        detail: String,
    },

    /// Storage failure
    #[error("Storage error: {source}")]
    Storage {
        /// Underlying database error
        #[from]
        source: DatabaseError,
    },
}
