//! Access-control rule persistence
//!
//! Directed allow/deny rules at organization and agent level. The table
//! primary keys guarantee at most one rule per directed pair; grants are
//! upserts so re-granting flips `allowed` in place.

use crate::database::{DatabaseConnection, DatabaseResult};
use crate::domain_types::{AgentId, OrgId};
use chrono::{DateTime, Utc};
use sqlx::Row;

mod sql {
    pub(super) const UPSERT_ORG_ALLOW: &str = "INSERT INTO a2a_org_allows
            (source_org_id, target_org_id, allowed, created_at) VALUES (?, ?, ?, ?)
        ON CONFLICT (source_org_id, target_org_id) DO UPDATE SET allowed = excluded.allowed";

    pub(super) const SELECT_ORG_ALLOW: &str =
        "SELECT allowed FROM a2a_org_allows WHERE source_org_id = ? AND target_org_id = ?";

    pub(super) const DELETE_ORG_ALLOW: &str =
        "DELETE FROM a2a_org_allows WHERE source_org_id = ? AND target_org_id = ?";

    pub(super) const UPSERT_AGENT_ALLOW: &str = "INSERT INTO a2a_agent_allows
            (source_agent_id, target_agent_id, allowed, created_at) VALUES (?, ?, ?, ?)
        ON CONFLICT (source_agent_id, target_agent_id) DO UPDATE SET allowed = excluded.allowed";

    pub(super) const SELECT_AGENT_ALLOW: &str =
        "SELECT allowed FROM a2a_agent_allows WHERE source_agent_id = ? AND target_agent_id = ?";

    pub(super) const DELETE_AGENT_ALLOW: &str =
        "DELETE FROM a2a_agent_allows WHERE source_agent_id = ? AND target_agent_id = ?";
}

/// Store for directed allow rules
#[derive(Clone, Debug)]
pub struct AclStore {
    connection: DatabaseConnection,
}

impl AclStore {
    /// Creates the store over a shared connection
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Grants or denies all traffic from one organization to another
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn set_org_allow(
        &self,
        source: OrgId,
        target: OrgId,
        allowed: bool,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(sql::UPSERT_ORG_ALLOW)
            .bind(source.to_string())
            .bind(target.to_string())
            .bind(allowed)
            .bind(now)
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// Looks up the org-level rule for a directed pair
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn find_org_allow(&self, source: OrgId, target: OrgId) -> DatabaseResult<Option<bool>> {
        let row = sqlx::query(sql::SELECT_ORG_ALLOW)
            .bind(source.to_string())
            .bind(target.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        Ok(row.map(|r| r.get("allowed")))
    }

    /// Removes an org-level rule; returns whether a rule existed
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn revoke_org_allow(&self, source: OrgId, target: OrgId) -> DatabaseResult<bool> {
        let result = sqlx::query(sql::DELETE_ORG_ALLOW)
            .bind(source.to_string())
            .bind(target.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Grants or denies traffic from one agent to another
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn set_agent_allow(
        &self,
        source: AgentId,
        target: AgentId,
        allowed: bool,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(sql::UPSERT_AGENT_ALLOW)
            .bind(source.to_string())
            .bind(target.to_string())
            .bind(allowed)
            .bind(now)
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// Looks up the agent-level rule for a directed pair
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn find_agent_allow(
        &self,
        source: AgentId,
        target: AgentId,
    ) -> DatabaseResult<Option<bool>> {
        let row = sqlx::query(sql::SELECT_AGENT_ALLOW)
            .bind(source.to_string())
            .bind(target.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        Ok(row.map(|r| r.get("allowed")))
    }

    /// Removes an agent-level rule; returns whether a rule existed
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn revoke_agent_allow(&self, source: AgentId, target: AgentId) -> DatabaseResult<bool> {
        let result = sqlx::query(sql::DELETE_AGENT_ALLOW)
            .bind(source.to_string())
            .bind(target.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
