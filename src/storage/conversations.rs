//! Conversation persistence
//!
//! A conversation groups A2A messages between an initiator and a target.
//! The federation path reuses the active conversation for a pair; local
//! sends may open additional ones.

use crate::database::{DatabaseConnection, DatabaseResult, StorageError, StorageResult};
use crate::domain_types::{AgentId, ConversationId};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

/// Lifecycle status of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStatus {
    /// Open for new messages
    Active,
    /// Closed; no further messages expected
    Closed,
}

impl ConversationStatus {
    /// Database representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    /// Parses the database representation
    ///
    /// # Errors
    ///
    /// Returns an error for unknown status strings
    pub fn parse(value: &str) -> StorageResult<Self> {
        match value {
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            other => Err(StorageError::Decode {
                column: "status".to_string(),
                message: format!("unknown conversation status: {other}"),
            }),
        }
    }
}

/// A persisted conversation
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    /// Primary key
    pub id: ConversationId,
    /// Agent that opened the conversation
    pub initiator_id: AgentId,
    /// Agent being addressed
    pub target_id: AgentId,
    /// Free-form topic label
    pub topic: String,
    /// Lifecycle status
    pub status: ConversationStatus,
    /// Structured conversation context
    pub context_data: serde_json::Value,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

mod sql {
    pub(super) const INSERT: &str = "INSERT INTO conversations
        (id, initiator_id, target_id, topic, status, context_data, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'active', ?, ?, ?)";

    pub(super) const SELECT_BY_ID: &str = "SELECT * FROM conversations WHERE id = ?";

    pub(super) const SELECT_ACTIVE_PAIR: &str = "SELECT * FROM conversations
        WHERE initiator_id = ? AND target_id = ? AND status = 'active'
        ORDER BY created_at DESC LIMIT 1";

    pub(super) const CLOSE: &str =
        "UPDATE conversations SET status = 'closed', updated_at = ? WHERE id = ?";
}

mod mapping {
    use super::{
        AgentId, ConversationId, ConversationRecord, ConversationStatus, Row, SqliteRow,
        StorageError, StorageResult,
    };

    fn decode_id<T>(column: &str, result: Result<T, uuid::Error>) -> StorageResult<T> {
        result.map_err(|e| StorageError::Decode {
            column: column.to_string(),
            message: e.to_string(),
        })
    }

    pub(super) fn row_to_conversation(row: &SqliteRow) -> StorageResult<ConversationRecord> {
        let id: String = row.get("id");
        let initiator: String = row.get("initiator_id");
        let target: String = row.get("target_id");
        let status: String = row.get("status");
        let context: String = row.get("context_data");

        Ok(ConversationRecord {
            id: decode_id("id", ConversationId::parse(&id))?,
            initiator_id: decode_id("initiator_id", AgentId::parse(&initiator))?,
            target_id: decode_id("target_id", AgentId::parse(&target))?,
            topic: row.get("topic"),
            status: ConversationStatus::parse(&status)?,
            context_data: serde_json::from_str(&context).unwrap_or(serde_json::Value::Null),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

/// Store for conversations
#[derive(Clone, Debug)]
pub struct ConversationStore {
    connection: DatabaseConnection,
}

impl ConversationStore {
    /// Creates the store over a shared connection
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Opens a conversation
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn create(
        &self,
        initiator: AgentId,
        target: AgentId,
        topic: &str,
        context: serde_json::Value,
        now: DateTime<Utc>,
    ) -> DatabaseResult<ConversationRecord> {
        let id = ConversationId::generate();
        sqlx::query(sql::INSERT)
            .bind(id.to_string())
            .bind(initiator.to_string())
            .bind(target.to_string())
            .bind(topic)
            .bind(context.to_string())
            .bind(now)
            .bind(now)
            .execute(self.connection.pool())
            .await?;
        Ok(ConversationRecord {
            id,
            initiator_id: initiator,
            target_id: target,
            topic: topic.to_string(),
            status: ConversationStatus::Active,
            context_data: context,
            created_at: now,
            updated_at: now,
        })
    }

    /// Fetches a conversation by ID
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn get(&self, id: ConversationId) -> DatabaseResult<Option<ConversationRecord>> {
        let row = sqlx::query(sql::SELECT_BY_ID)
            .bind(id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| mapping::row_to_conversation(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Finds the most recent active conversation for a directed pair
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn find_active(
        &self,
        initiator: AgentId,
        target: AgentId,
    ) -> DatabaseResult<Option<ConversationRecord>> {
        let row = sqlx::query(sql::SELECT_ACTIVE_PAIR)
            .bind(initiator.to_string())
            .bind(target.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| mapping::row_to_conversation(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Fetches the active conversation for a pair, creating one if absent
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn get_or_create(
        &self,
        initiator: AgentId,
        target: AgentId,
        topic: &str,
        now: DateTime<Utc>,
    ) -> DatabaseResult<ConversationRecord> {
        if let Some(existing) = self.find_active(initiator, target).await? {
            return Ok(existing);
        }
        self.create(initiator, target, topic, serde_json::json!({}), now)
            .await
    }

    /// Closes a conversation
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn close(&self, id: ConversationId, now: DateTime<Utc>) -> DatabaseResult<()> {
        sqlx::query(sql::CLOSE)
            .bind(now)
            .bind(id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }
}
