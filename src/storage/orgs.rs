//! Organization persistence
//!
//! Tenancy scope for agents plus the membership rows used for send/ack
//! authorization. Remote hubs get an organization row keyed by domain,
//! upserted on inbound federation.

use crate::database::{DatabaseConnection, DatabaseResult, StorageError, StorageResult};
use crate::domain_types::{OrgId, UserId};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

/// Role of a user inside an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrgMemberRole {
    /// Ordinary member
    Member,
    /// Administrator
    Admin,
}

impl OrgMemberRole {
    /// Database representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
        }
    }

    /// Parses the database representation
    ///
    /// # Errors
    ///
    /// Returns an error for unknown role strings
    pub fn parse(value: &str) -> StorageResult<Self> {
        match value {
            "member" => Ok(Self::Member),
            "admin" => Ok(Self::Admin),
            other => Err(StorageError::Decode {
                column: "role".to_string(),
                message: format!("unknown member role: {other}"),
            }),
        }
    }
}

/// A persisted organization
#[derive(Debug, Clone)]
pub struct Organization {
    /// Primary key
    pub id: OrgId,
    /// Display name
    pub name: String,
    /// Hub domain for federated organizations
    pub domain: Option<String>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
}

mod sql {
    pub(super) const INSERT: &str =
        "INSERT INTO organizations (id, name, domain, created_at) VALUES (?, ?, ?, ?)";

    pub(super) const SELECT_BY_ID: &str = "SELECT * FROM organizations WHERE id = ?";

    pub(super) const SELECT_BY_DOMAIN: &str = "SELECT * FROM organizations WHERE domain = ?";

    pub(super) const UPSERT_MEMBER: &str = "INSERT INTO organization_members
            (org_id, user_id, role, created_at) VALUES (?, ?, ?, ?)
        ON CONFLICT (org_id, user_id) DO UPDATE SET role = excluded.role";

    pub(super) const SELECT_MEMBER_ROLE: &str =
        "SELECT role FROM organization_members WHERE org_id = ? AND user_id = ?";
}

mod mapping {
    use super::{OrgId, Organization, Row, SqliteRow, StorageError, StorageResult};

    pub(super) fn row_to_org(row: &SqliteRow) -> StorageResult<Organization> {
        let id: String = row.get("id");
        Ok(Organization {
            id: OrgId::parse(&id).map_err(|e| StorageError::Decode {
                column: "id".to_string(),
                message: e.to_string(),
            })?,
            name: row.get("name"),
            domain: row.get("domain"),
            created_at: row.get("created_at"),
        })
    }
}

/// Store for organizations and memberships
#[derive(Clone, Debug)]
pub struct OrgStore {
    connection: DatabaseConnection,
}

impl OrgStore {
    /// Creates the store over a shared connection
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Creates an organization
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn insert(
        &self,
        name: &str,
        domain: Option<&str>,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Organization> {
        let id = OrgId::generate();
        sqlx::query(sql::INSERT)
            .bind(id.to_string())
            .bind(name)
            .bind(domain)
            .bind(now)
            .execute(self.connection.pool())
            .await?;
        Ok(Organization {
            id,
            name: name.to_string(),
            domain: domain.map(ToString::to_string),
            created_at: now,
        })
    }

    /// Fetches an organization by ID
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn get(&self, id: OrgId) -> DatabaseResult<Option<Organization>> {
        let row = sqlx::query(sql::SELECT_BY_ID)
            .bind(id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| mapping::row_to_org(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Fetches or creates the organization for a federation domain
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn upsert_by_domain(
        &self,
        domain: &str,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Organization> {
        let existing = sqlx::query(sql::SELECT_BY_DOMAIN)
            .bind(domain)
            .fetch_optional(self.connection.pool())
            .await?;
        if let Some(row) = existing {
            return mapping::row_to_org(&row).map_err(Into::into);
        }
        self.insert(domain, Some(domain), now).await
    }

    /// Adds or updates a membership
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn upsert_member(
        &self,
        org_id: OrgId,
        user_id: UserId,
        role: OrgMemberRole,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(sql::UPSERT_MEMBER)
            .bind(org_id.to_string())
            .bind(user_id.to_string())
            .bind(role.as_str())
            .bind(now)
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// Membership check used by send/ack/inbox authorization
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn is_member(&self, org_id: OrgId, user_id: UserId) -> DatabaseResult<bool> {
        let row = sqlx::query(sql::SELECT_MEMBER_ROLE)
            .bind(org_id.to_string())
            .bind(user_id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        Ok(row.is_some())
    }

    /// Role of a member, if they belong to the organization
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn member_role(
        &self,
        org_id: OrgId,
        user_id: UserId,
    ) -> DatabaseResult<Option<OrgMemberRole>> {
        let row = sqlx::query(sql::SELECT_MEMBER_ROLE)
            .bind(org_id.to_string())
            .bind(user_id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| {
            let role: String = r.get("role");
            OrgMemberRole::parse(&role)
        })
        .transpose()
        .map_err(Into::into)
    }
}
