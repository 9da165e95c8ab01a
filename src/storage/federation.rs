//! Federation persistence
//!
//! Contact rows remember which remote identities have been seen and how
//! they map onto local stubs; the policy cache is a write-only record of
//! inbound ACL decisions kept for observability.

use crate::database::{DatabaseConnection, DatabaseResult, StorageError, StorageResult};
use crate::domain_types::{AgentId, OrgId};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

/// A remote agent identity observed on inbound federation
#[derive(Debug, Clone)]
pub struct FederationContact {
    /// Full `name@domain` address
    pub remote_address: String,
    /// Name half of the address
    pub remote_name: String,
    /// Domain half of the address
    pub remote_domain: String,
    /// Organization row created for the remote domain
    pub remote_org_id: Option<OrgId>,
    /// Local agent last addressed by this contact
    pub local_agent_id: Option<AgentId>,
    /// That agent's organization
    pub local_org_id: Option<OrgId>,
    /// Last inbound envelope time
    pub last_seen_at: DateTime<Utc>,
}

/// One recorded ACL decision for an inbound envelope
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    /// Source organization, when known
    pub source_org_id: Option<OrgId>,
    /// Target organization, when known
    pub target_org_id: Option<OrgId>,
    /// Source stub agent
    pub source_agent_id: Option<AgentId>,
    /// Target local agent
    pub target_agent_id: Option<AgentId>,
    /// The decision
    pub allowed: bool,
}

mod sql {
    pub(super) const UPSERT_CONTACT: &str = "INSERT INTO federation_contacts
        (remote_address, remote_name, remote_domain, remote_org_id,
         local_agent_id, local_org_id, last_seen_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (remote_address) DO UPDATE SET
            remote_org_id = excluded.remote_org_id,
            local_agent_id = excluded.local_agent_id,
            local_org_id = excluded.local_org_id,
            last_seen_at = excluded.last_seen_at";

    pub(super) const SELECT_CONTACT: &str =
        "SELECT * FROM federation_contacts WHERE remote_address = ?";

    pub(super) const INSERT_POLICY: &str = "INSERT INTO policy_cache
        (id, source_org_id, target_org_id, source_agent_id, target_agent_id,
         allowed, decided_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)";

    pub(super) const COUNT_POLICY: &str = "SELECT COUNT(*) AS n FROM policy_cache";
}

mod mapping {
    use super::{AgentId, FederationContact, OrgId, Row, SqliteRow, StorageError, StorageResult};

    fn decode<T>(column: &str, result: Result<T, impl ToString>) -> StorageResult<T> {
        result.map_err(|e| StorageError::Decode {
            column: column.to_string(),
            message: e.to_string(),
        })
    }

    pub(super) fn row_to_contact(row: &SqliteRow) -> StorageResult<FederationContact> {
        let remote_org: Option<String> = row.get("remote_org_id");
        let local_agent: Option<String> = row.get("local_agent_id");
        let local_org: Option<String> = row.get("local_org_id");
        Ok(FederationContact {
            remote_address: row.get("remote_address"),
            remote_name: row.get("remote_name"),
            remote_domain: row.get("remote_domain"),
            remote_org_id: remote_org
                .map(|v| decode("remote_org_id", OrgId::parse(&v)))
                .transpose()?,
            local_agent_id: local_agent
                .map(|v| decode("local_agent_id", AgentId::parse(&v)))
                .transpose()?,
            local_org_id: local_org
                .map(|v| decode("local_org_id", OrgId::parse(&v)))
                .transpose()?,
            last_seen_at: row.get("last_seen_at"),
        })
    }
}

/// Store for federation contacts and the policy cache
#[derive(Clone, Debug)]
pub struct FederationStore {
    connection: DatabaseConnection,
}

impl FederationStore {
    /// Creates the store over a shared connection
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Records (or refreshes) a remote contact
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn upsert_contact(&self, contact: &FederationContact) -> DatabaseResult<()> {
        sqlx::query(sql::UPSERT_CONTACT)
            .bind(&contact.remote_address)
            .bind(&contact.remote_name)
            .bind(&contact.remote_domain)
            .bind(contact.remote_org_id.map(|v| v.to_string()))
            .bind(contact.local_agent_id.map(|v| v.to_string()))
            .bind(contact.local_org_id.map(|v| v.to_string()))
            .bind(contact.last_seen_at)
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// Fetches a contact by remote address
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn get_contact(&self, address: &str) -> DatabaseResult<Option<FederationContact>> {
        let row = sqlx::query(sql::SELECT_CONTACT)
            .bind(address)
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| mapping::row_to_contact(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Appends a policy decision (write-only observability)
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn record_policy_decision(
        &self,
        decision: &PolicyDecision,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(sql::INSERT_POLICY)
            .bind(Uuid::new_v4().to_string())
            .bind(decision.source_org_id.map(|v| v.to_string()))
            .bind(decision.target_org_id.map(|v| v.to_string()))
            .bind(decision.source_agent_id.map(|v| v.to_string()))
            .bind(decision.target_agent_id.map(|v| v.to_string()))
            .bind(decision.allowed)
            .bind(now)
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// Number of recorded policy decisions
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn policy_decision_count(&self) -> DatabaseResult<i64> {
        let row = sqlx::query(sql::COUNT_POLICY)
            .fetch_one(self.connection.pool())
            .await?;
        Ok(row.get("n"))
    }
}
