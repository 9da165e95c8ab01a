//! # Agora - Multi-Tenant Agent Mesh Runtime
//!
//! Agora is the mesh runtime for a multi-tenant agent-to-agent platform:
//! agents publish capabilities, discover one another, negotiate work over a
//! market-based contract protocol, and exchange messages across hubs
//! federated with signed envelopes.
//!
//! ## Core Subsystems
//!
//! - **Store**: durable state for agents, conversations, messages,
//!   receipts, contracts, bids, deliveries, reputation, ACL rules, and
//!   federation contacts
//! - **Contract engine**: open → bidding → awarded → delivered → validated
//!   → settled, with a background award sweeper
//! - **Message router**: authenticated, ACL- and rate-limit-governed A2A
//!   sends with idempotency and delivery receipts
//! - **Federation bridge**: HMAC-signed inter-hub envelopes with ACK and
//!   remote identity mirroring
//! - **Reputation engine**: multi-dimensional trust scoring feeding award
//!   strategies
//! - **Presence registry**: live stream fanout keyed by task, user, and
//!   agent
//! - **Orchestrator**: intent → DAG → per-node collaboration patterns
//!   (sequential, parallel, vote, debate, swarm, consensus)

pub mod acl;
pub mod config;
pub mod contracts;
pub mod database;
pub mod domain_types;
pub mod federation;
pub mod messaging;
pub mod orchestrator;
pub mod presence;
pub mod rate_limit;
pub mod reputation;
pub mod rest_api;
pub mod server;
pub mod storage;
pub mod time_provider;

pub use crate::acl::{AclDecision, AclEvaluator};
pub use crate::config::{AppConfig, FederationConfig, MeshConfig};
pub use crate::contracts::{AwardSweeper, ContractEngine, ContractError};
pub use crate::database::{DatabaseConnection, DatabaseError, DatabaseResult};
pub use crate::federation::{
    FederationClient, FederationEnvelope, FederationError, InboundOutcome, InboundProcessor,
};
pub use crate::messaging::{
    MessageRouter, Principal, RouterError, SendOutcome, SendRequest, SendStatus, SendTarget,
};
pub use crate::orchestrator::{Orchestrator, OrchestratorError, Pattern};
pub use crate::presence::{PresenceKey, PresenceRegistry};
pub use crate::rate_limit::RateLimiter;
pub use crate::reputation::ReputationEngine;
pub use crate::server::MeshRuntime;
pub use crate::storage::Store;
pub use crate::time_provider::{SharedTimeProvider, TimeProvider};
