//! A2A message router
//!
//! The send path authenticates the calling principal against the sending
//! agent, applies rate limits, dedupes on the idempotency key, resolves the
//! target (local row or federated address), enforces the ACL for local
//! delivery, persists message + receipt, and pushes to online recipients.
//! Replays are never errors: they return the prior message id with
//! `duplicate` status.

mod router;

pub use router::{MessageRouter, SendOutcome, SendRequest, SendStatus, SendTarget};

use crate::database::DatabaseError;
use crate::domain_types::{ApiKeyId, UserId};
use thiserror::Error;

/// An authenticated caller, resolved by the outer transport layer
///
/// Credential validation (API-key lookup, bearer-token verification) is an
/// external concern; the router only consumes the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// An agent authenticated by API key
    ApiKey {
        /// The key row identity, used for rate limiting
        api_key_id: ApiKeyId,
        /// The user owning the key
        user_id: UserId,
        /// Stored per-key quota; `None` falls back to the configured default
        rate_limit_per_min: Option<u64>,
    },
    /// A user authenticated by bearer token
    User {
        /// The authenticated user
        user_id: UserId,
    },
}

impl Principal {
    /// The user behind the principal
    #[must_use]
    pub fn user_id(&self) -> UserId {
        match self {
            Self::ApiKey { user_id, .. } | Self::User { user_id } => *user_id,
        }
    }
}

/// Message router errors
#[derive(Debug, Error)]
pub enum RouterError {
    /// Agent, conversation, or receipt lookup failed
    #[error("Not found: {what}")]
    NotFound {
        /// What was missing
        what: String,
    },

    /// Caller may not act for this agent, or the ACL denied delivery
    #[error("Forbidden: {reason}")]
    Forbidden {
        /// Single human-readable reason
        reason: String,
    },

    /// Malformed request (missing addressing, bad field)
    #[error("Bad request: {reason}")]
    BadRequest {
        /// Why the request was rejected
        reason: String,
    },

    /// A rate limit rejected the send
    #[error("Rate limited: {scope}; retry after {retry_after_secs}s")]
    RateLimited {
        /// Which limit fired (`api_key` or `org`)
        scope: String,
        /// Suggested retry window
        retry_after_secs: u64,
    },

    /// Storage failure
    #[error("Storage error: {source}")]
    Storage {
        /// Underlying database error
        #[from]
        source: DatabaseError,
    },
}
