//! Persistence layer
//!
//! One store per entity family, all sharing a [`DatabaseConnection`]. Each
//! store keeps its SQL in a pure `sql` module and its row conversions in a
//! pure `mapping` module; the store structs themselves are thin imperative
//! shells over the pool.

pub mod acl;
pub mod agents;
pub mod contracts;
pub mod conversations;
pub mod federation;
pub mod messages;
pub mod orgs;
pub mod plans;
pub mod reputation;

pub use acl::AclStore;
pub use agents::{AgentRecord, AgentStatus, AgentStore, NewAgent};
pub use contracts::{
    AwardStrategyKind, BidRecord, ContractRecord, ContractStatus, ContractStore, DeliveryRecord,
    NewBid, NewContract, UserPreferences,
};
pub use conversations::{ConversationRecord, ConversationStatus, ConversationStore};
pub use federation::{FederationContact, FederationStore, PolicyDecision};
pub use messages::{MessageRecord, MessageStore, MessageType, NewMessage, ReceiptRecord};
pub use orgs::{OrgMemberRole, OrgStore, Organization};
pub use plans::{CollaborationRecord, PlanRecord, PlanStatus, PlanStore};
pub use reputation::{MetricRecord, NewMetric, ReputationStore, TrustGrade, TrustSnapshot};

use crate::database::DatabaseConnection;

/// Bundle of every per-entity store over one shared pool
///
/// This is the single owner of persistent rows; other components hold only
/// primary keys and go through these stores to read or mutate.
#[derive(Clone, Debug)]
pub struct Store {
    agents: AgentStore,
    orgs: OrgStore,
    acl: AclStore,
    conversations: ConversationStore,
    messages: MessageStore,
    contracts: ContractStore,
    reputation: ReputationStore,
    federation: FederationStore,
    plans: PlanStore,
}

impl Store {
    /// Builds every store over the given connection
    pub fn new(connection: DatabaseConnection) -> Self {
        Self {
            agents: AgentStore::new(connection.clone()),
            orgs: OrgStore::new(connection.clone()),
            acl: AclStore::new(connection.clone()),
            conversations: ConversationStore::new(connection.clone()),
            messages: MessageStore::new(connection.clone()),
            contracts: ContractStore::new(connection.clone()),
            reputation: ReputationStore::new(connection.clone()),
            federation: FederationStore::new(connection.clone()),
            plans: PlanStore::new(connection),
        }
    }

    /// Agent rows and performance counters
    pub fn agents(&self) -> &AgentStore {
        &self.agents
    }

    /// Organizations and memberships
    pub fn orgs(&self) -> &OrgStore {
        &self.orgs
    }

    /// Directed allow rules
    pub fn acl(&self) -> &AclStore {
        &self.acl
    }

    /// A2A conversations
    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// A2A messages and delivery receipts
    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    /// Contracts, bids, deliveries, and award preferences
    pub fn contracts(&self) -> &ContractStore {
        &self.contracts
    }

    /// Agent metrics and trust snapshots
    pub fn reputation(&self) -> &ReputationStore {
        &self.reputation
    }

    /// Federation contacts and the policy cache
    pub fn federation(&self) -> &FederationStore {
        &self.federation
    }

    /// Orchestration plans and collaboration records
    pub fn plans(&self) -> &PlanStore {
        &self.plans
    }
}
