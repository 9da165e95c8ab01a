//! Domain types for the Agora mesh runtime
//!
//! This module defines strongly-typed domain values to prevent primitive obsession
//! and improve type safety throughout the codebase.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for an agent
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct AgentId(Uuid);

impl AgentId {
    /// Creates a new random agent ID
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// Parses an agent ID from its string form
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Ok(Self::new(Uuid::parse_str(value)?))
    }
}

/// Unique identifier for an organization
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct OrgId(Uuid);

impl OrgId {
    /// Creates a new random organization ID
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// Parses an organization ID from its string form
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Ok(Self::new(Uuid::parse_str(value)?))
    }
}

/// Unique identifier for a user (issued by the external identity layer)
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random user ID
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// Parses a user ID from its string form
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Ok(Self::new(Uuid::parse_str(value)?))
    }
}

/// Unique identifier for an A2A conversation
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct ConversationId(Uuid);

impl ConversationId {
    /// Creates a new random conversation ID
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// Parses a conversation ID from its string form
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Ok(Self::new(Uuid::parse_str(value)?))
    }
}

/// Unique identifier for an A2A message
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message ID
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// Parses a message ID from its string form
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Ok(Self::new(Uuid::parse_str(value)?))
    }
}

/// Unique identifier for a message delivery receipt
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct ReceiptId(Uuid);

impl ReceiptId {
    /// Creates a new random receipt ID
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Unique identifier for a contract
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct ContractId(Uuid);

impl ContractId {
    /// Creates a new random contract ID
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// Parses a contract ID from its string form
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Ok(Self::new(Uuid::parse_str(value)?))
    }
}

/// Unique identifier for a bid
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct BidId(Uuid);

impl BidId {
    /// Creates a new random bid ID
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Unique identifier for a delivery
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct DeliveryId(Uuid);

impl DeliveryId {
    /// Creates a new random delivery ID
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Unique identifier for an orchestration plan
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct PlanId(Uuid);

impl PlanId {
    /// Creates a new random plan ID
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// Parses a plan ID from its string form
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Ok(Self::new(Uuid::parse_str(value)?))
    }
}

/// Unique identifier for an API key record
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct ApiKeyId(Uuid);

impl ApiKeyId {
    /// Creates a new random API key ID
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Unique identifier for a presence stream connection
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct StreamId(Uuid);

impl StreamId {
    /// Creates a new random stream ID
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Name of an agent; globally unique across a hub
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct AgentName(String);

/// A capability tag an agent advertises and tasks require
#[nutype(
    validate(len_char_min = 1, len_char_max = 100),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct CapabilityName(String);

/// Domain name of a federation hub
#[nutype(
    validate(len_char_min = 1, len_char_max = 253),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct HubDomain(String);

/// Client-chosen deduplication key, scoped to a sender
#[nutype(
    validate(len_char_min = 1, len_char_max = 128),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct IdempotencyKey(String);

/// Composite reputation score in the unit interval
#[nutype(
    validate(finite, greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 0.5
)]
pub struct TrustScoreValue(f64);

impl TrustScoreValue {
    /// Builds a trust score, clamping out-of-range or non-finite input
    #[must_use]
    pub fn clamped(value: f64) -> Self {
        let v = if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self::try_new(v).unwrap_or_default()
    }

    /// Gets the value as f64
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}

/// Bidder self-assessed confidence in the unit interval
#[nutype(
    validate(finite, greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 0.5
)]
pub struct ConfidenceValue(f64);

impl ConfidenceValue {
    /// Gets the value as f64
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}

/// Issuer-assigned delivery validation score in the unit interval
#[nutype(
    validate(finite, greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 0.5
)]
pub struct ValidationScore(f64);

impl ValidationScore {
    /// Builds a score, clamping out-of-range or non-finite input
    #[must_use]
    pub fn clamped(value: f64) -> Self {
        let v = if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self::try_new(v).unwrap_or_default()
    }

    /// Gets the value as f64
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}

/// Errors produced when parsing a federated address
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressParseError {
    /// The address did not contain an `@` separator
    #[error("address must have the form name@domain: {input}")]
    MissingSeparator {
        /// The offending input
        input: String,
    },
    /// The agent-name half failed validation
    #[error("invalid agent name in address: {reason}")]
    InvalidName {
        /// Why the name was rejected
        reason: String,
    },
    /// The domain half failed validation
    #[error("invalid domain in address: {reason}")]
    InvalidDomain {
        /// Why the domain was rejected
        reason: String,
    },
}

/// A federated agent address of the form `name@domain`
///
/// The name half is the agent's name on its home hub; the domain half
/// identifies the hub. The string form doubles as the stub agent name for
/// remote identities and as the addressing field of envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FederatedAddress {
    name: AgentName,
    domain: HubDomain,
}

impl FederatedAddress {
    /// Builds an address from validated parts
    pub fn new(name: AgentName, domain: HubDomain) -> Self {
        Self { name, domain }
    }

    /// The agent-name half
    pub fn name(&self) -> &AgentName {
        &self.name
    }

    /// The hub-domain half
    pub fn domain(&self) -> &HubDomain {
        &self.domain
    }
}

impl FromStr for FederatedAddress {
    type Err = AddressParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (name, domain) =
            input
                .split_once('@')
                .ok_or_else(|| AddressParseError::MissingSeparator {
                    input: input.to_string(),
                })?;
        let name =
            AgentName::try_new(name.to_string()).map_err(|e| AddressParseError::InvalidName {
                reason: e.to_string(),
            })?;
        let domain = HubDomain::try_new(domain.to_string()).map_err(|e| {
            AddressParseError::InvalidDomain {
                reason: e.to_string(),
            }
        })?;
        Ok(Self { name, domain })
    }
}

impl TryFrom<String> for FederatedAddress {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FederatedAddress> for String {
    fn from(value: FederatedAddress) -> Self {
        value.to_string()
    }
}

impl fmt::Display for FederatedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.domain)
    }
}
