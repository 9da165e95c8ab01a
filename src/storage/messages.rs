//! Message and receipt persistence
//!
//! Messages are immutable once written; receipts carry the per-recipient
//! delivery lifecycle (attempts, delivered, acked). Message + receipt are
//! inserted in one transaction so a crash can never leave a message without
//! its receipt. The partial unique index on `(from_agent_id,
//! idempotency_key)` backs the replay guarantee.

use crate::database::{DatabaseConnection, DatabaseResult, StorageError, StorageResult};
use crate::domain_types::{AgentId, ConversationId, IdempotencyKey, MessageId, ReceiptId};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

/// Type tag of an A2A message
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Asks the recipient to do something
    Request,
    /// Answers a prior request
    Response,
    /// One-way informational message
    Notification,
    /// Offer within a negotiation
    Proposal,
}

impl MessageType {
    /// Database representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Notification => "notification",
            Self::Proposal => "proposal",
        }
    }

    /// Parses a wire or database string; unknown types become `notification`
    #[must_use]
    pub fn parse_lossy(value: &str) -> Self {
        match value {
            "request" => Self::Request,
            "response" => Self::Response,
            "proposal" => Self::Proposal,
            _ => Self::Notification,
        }
    }
}

/// A persisted A2A message
#[derive(Debug, Clone)]
pub struct MessageRecord {
    /// Primary key
    pub id: MessageId,
    /// Owning conversation
    pub conversation_id: ConversationId,
    /// Sender
    pub from_agent_id: AgentId,
    /// Recipient
    pub to_agent_id: AgentId,
    /// Type tag
    pub message_type: MessageType,
    /// Structured payload
    pub content: serde_json::Value,
    /// Whether the sender expects a response
    pub requires_response: bool,
    /// Sender-scoped deduplication key
    pub idempotency_key: Option<IdempotencyKey>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
}

/// Per-recipient delivery lifecycle of a message
#[derive(Debug, Clone)]
pub struct ReceiptRecord {
    /// Primary key
    pub id: ReceiptId,
    /// Message this receipt tracks
    pub message_id: MessageId,
    /// Recipient agent
    pub agent_id: AgentId,
    /// Number of push attempts so far
    pub delivery_attempts: i64,
    /// Time of the most recent push attempt
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// First successful push time
    pub delivered_at: Option<DateTime<Utc>>,
    /// Recipient acknowledgement time; terminal once set
    pub acked_at: Option<DateTime<Utc>>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
}

/// Fields required to persist a message
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Owning conversation
    pub conversation_id: ConversationId,
    /// Sender
    pub from_agent_id: AgentId,
    /// Recipient
    pub to_agent_id: AgentId,
    /// Type tag
    pub message_type: MessageType,
    /// Structured payload
    pub content: serde_json::Value,
    /// Whether the sender expects a response
    pub requires_response: bool,
    /// Sender-scoped deduplication key
    pub idempotency_key: Option<IdempotencyKey>,
}

mod sql {
    pub(super) const INSERT_MESSAGE: &str = "INSERT INTO messages
        (id, conversation_id, from_agent_id, to_agent_id, message_type, content,
         requires_response, idempotency_key, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";

    pub(super) const INSERT_RECEIPT: &str = "INSERT INTO message_receipts
        (id, message_id, agent_id, delivery_attempts, last_attempt_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?)";

    pub(super) const SELECT_MESSAGE: &str = "SELECT * FROM messages WHERE id = ?";

    pub(super) const SELECT_REPLAY: &str =
        "SELECT * FROM messages WHERE from_agent_id = ? AND idempotency_key = ?";

    pub(super) const SELECT_REPLAY_IN_CONVERSATION: &str = "SELECT * FROM messages
        WHERE conversation_id = ? AND idempotency_key = ? AND from_agent_id = ?";

    pub(super) const SELECT_RECEIPT: &str =
        "SELECT * FROM message_receipts WHERE message_id = ? AND agent_id = ?";

    pub(super) const SELECT_RESPONSE: &str = "SELECT * FROM messages
        WHERE conversation_id = ? AND from_agent_id = ? AND message_type = 'response'
          AND created_at > ?
        ORDER BY created_at ASC LIMIT 1";

    pub(super) const MARK_ATTEMPT: &str = "UPDATE message_receipts SET
            delivery_attempts = delivery_attempts + 1,
            last_attempt_at = ?,
            delivered_at = COALESCE(delivered_at, ?)
        WHERE message_id = ? AND agent_id = ?";

    // Only the first ack writes; later acks find acked_at already set.
    pub(super) const ACK: &str = "UPDATE message_receipts SET acked_at = ?
        WHERE message_id = ? AND agent_id = ? AND acked_at IS NULL";

    pub(super) const ACK_ALL_FOR_MESSAGE: &str = "UPDATE message_receipts SET acked_at = ?
        WHERE message_id = ? AND acked_at IS NULL";

    pub(super) const SELECT_INBOX: &str = "SELECT m.*,
            r.id AS receipt_id, r.delivery_attempts, r.last_attempt_at,
            r.delivered_at, r.acked_at, r.created_at AS receipt_created_at
        FROM message_receipts r JOIN messages m ON m.id = r.message_id
        WHERE r.agent_id = ? AND r.acked_at IS NULL
        ORDER BY m.created_at DESC LIMIT ?";

    pub(super) const STAMP_DELIVERED: &str = "UPDATE message_receipts
        SET delivered_at = ? WHERE id = ? AND delivered_at IS NULL";

    pub(super) const SELECT_RECEIPTS_FOR_AGENT: &str = "SELECT m.*,
            r.id AS receipt_id, r.delivery_attempts, r.last_attempt_at,
            r.delivered_at, r.acked_at, r.created_at AS receipt_created_at
        FROM message_receipts r JOIN messages m ON m.id = r.message_id
        WHERE r.agent_id = ?
        ORDER BY r.created_at DESC LIMIT ?";
}

mod mapping {
    use super::{
        AgentId, ConversationId, IdempotencyKey, MessageId, MessageRecord, MessageType, ReceiptId,
        ReceiptRecord, Row, SqliteRow, StorageError, StorageResult,
    };

    fn decode<T>(column: &str, result: Result<T, impl ToString>) -> StorageResult<T> {
        result.map_err(|e| StorageError::Decode {
            column: column.to_string(),
            message: e.to_string(),
        })
    }

    pub(super) fn row_to_message(row: &SqliteRow) -> StorageResult<MessageRecord> {
        let id: String = row.get("id");
        let conversation: String = row.get("conversation_id");
        let from: String = row.get("from_agent_id");
        let to: String = row.get("to_agent_id");
        let message_type: String = row.get("message_type");
        let content: String = row.get("content");
        let idempotency_key: Option<String> = row.get("idempotency_key");

        Ok(MessageRecord {
            id: decode("id", MessageId::parse(&id))?,
            conversation_id: decode("conversation_id", ConversationId::parse(&conversation))?,
            from_agent_id: decode("from_agent_id", AgentId::parse(&from))?,
            to_agent_id: decode("to_agent_id", AgentId::parse(&to))?,
            message_type: MessageType::parse_lossy(&message_type),
            content: serde_json::from_str(&content).unwrap_or(serde_json::Value::Null),
            requires_response: row.get("requires_response"),
            idempotency_key: idempotency_key
                .map(|k| decode("idempotency_key", IdempotencyKey::try_new(k)))
                .transpose()?,
            created_at: row.get("created_at"),
        })
    }

    pub(super) fn row_to_joined_receipt(row: &SqliteRow) -> StorageResult<ReceiptRecord> {
        let receipt_id: String = row.get("receipt_id");
        let message_id: String = row.get("id");
        let agent_id: String = row.get("to_agent_id");
        Ok(ReceiptRecord {
            id: decode("receipt_id", uuid::Uuid::parse_str(&receipt_id).map(ReceiptId::new))?,
            message_id: decode("id", MessageId::parse(&message_id))?,
            agent_id: decode("to_agent_id", AgentId::parse(&agent_id))?,
            delivery_attempts: row.get("delivery_attempts"),
            last_attempt_at: row.get("last_attempt_at"),
            delivered_at: row.get("delivered_at"),
            acked_at: row.get("acked_at"),
            created_at: row.get("receipt_created_at"),
        })
    }

    pub(super) fn row_to_receipt(row: &SqliteRow) -> StorageResult<ReceiptRecord> {
        let receipt_id: String = row.get("id");
        let message_id: String = row.get("message_id");
        let agent_id: String = row.get("agent_id");
        Ok(ReceiptRecord {
            id: decode("id", uuid::Uuid::parse_str(&receipt_id).map(ReceiptId::new))?,
            message_id: decode("message_id", MessageId::parse(&message_id))?,
            agent_id: decode("agent_id", AgentId::parse(&agent_id))?,
            delivery_attempts: row.get("delivery_attempts"),
            last_attempt_at: row.get("last_attempt_at"),
            delivered_at: row.get("delivered_at"),
            acked_at: row.get("acked_at"),
            created_at: row.get("created_at"),
        })
    }
}

/// Store for messages and receipts
#[derive(Clone, Debug)]
pub struct MessageStore {
    connection: DatabaseConnection,
}

impl MessageStore {
    /// Creates the store over a shared connection
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Persists a message together with its recipient receipt
    ///
    /// Both rows commit in one transaction. `initial_attempts` is 0 for
    /// local sends (push happens afterwards) and 1 for federation inbound
    /// (the remote hub already attempted delivery to us).
    ///
    /// # Errors
    ///
    /// Returns an error on idempotency-key collision or database failure
    pub async fn insert_with_receipt(
        &self,
        new: NewMessage,
        initial_attempts: i64,
        last_attempt_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DatabaseResult<(MessageRecord, ReceiptRecord)> {
        let message_id = MessageId::generate();
        let receipt_id = ReceiptId::generate();

        let mut tx = self.connection.pool().begin().await?;
        sqlx::query(sql::INSERT_MESSAGE)
            .bind(message_id.to_string())
            .bind(new.conversation_id.to_string())
            .bind(new.from_agent_id.to_string())
            .bind(new.to_agent_id.to_string())
            .bind(new.message_type.as_str())
            .bind(new.content.to_string())
            .bind(new.requires_response)
            .bind(new.idempotency_key.as_ref().map(ToString::to_string))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        sqlx::query(sql::INSERT_RECEIPT)
            .bind(receipt_id.to_string())
            .bind(message_id.to_string())
            .bind(new.to_agent_id.to_string())
            .bind(initial_attempts)
            .bind(last_attempt_at)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let message = MessageRecord {
            id: message_id,
            conversation_id: new.conversation_id,
            from_agent_id: new.from_agent_id,
            to_agent_id: new.to_agent_id,
            message_type: new.message_type,
            content: new.content,
            requires_response: new.requires_response,
            idempotency_key: new.idempotency_key,
            created_at: now,
        };
        let receipt = ReceiptRecord {
            id: receipt_id,
            message_id,
            agent_id: message.to_agent_id,
            delivery_attempts: initial_attempts,
            last_attempt_at,
            delivered_at: None,
            acked_at: None,
            created_at: now,
        };
        Ok((message, receipt))
    }

    /// Fetches a message by ID
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn get(&self, id: MessageId) -> DatabaseResult<Option<MessageRecord>> {
        let row = sqlx::query(sql::SELECT_MESSAGE)
            .bind(id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| mapping::row_to_message(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Replay lookup by `(sender, idempotency_key)`
    ///
    /// Served by the partial unique index, so this is O(1) expected.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn find_replay(
        &self,
        from: AgentId,
        key: &IdempotencyKey,
    ) -> DatabaseResult<Option<MessageRecord>> {
        let row = sqlx::query(sql::SELECT_REPLAY)
            .bind(from.to_string())
            .bind(key.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| mapping::row_to_message(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Federation dedupe lookup by `(conversation, envelope id, stub sender)`
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn find_replay_in_conversation(
        &self,
        conversation: ConversationId,
        key: &IdempotencyKey,
        from: AgentId,
    ) -> DatabaseResult<Option<MessageRecord>> {
        let row = sqlx::query(sql::SELECT_REPLAY_IN_CONVERSATION)
            .bind(conversation.to_string())
            .bind(key.to_string())
            .bind(from.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| mapping::row_to_message(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Fetches the receipt for a message/recipient pair
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn get_receipt(
        &self,
        message_id: MessageId,
        agent_id: AgentId,
    ) -> DatabaseResult<Option<ReceiptRecord>> {
        let row = sqlx::query(sql::SELECT_RECEIPT)
            .bind(message_id.to_string())
            .bind(agent_id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| mapping::row_to_receipt(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Records one push attempt: bumps the counter, stamps `last_attempt_at`,
    /// and sets `delivered_at` if this is the first successful push
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn mark_delivery_attempt(
        &self,
        message_id: MessageId,
        agent_id: AgentId,
        delivered: bool,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        let delivered_at = delivered.then_some(now);
        sqlx::query(sql::MARK_ATTEMPT)
            .bind(now)
            .bind(delivered_at)
            .bind(message_id.to_string())
            .bind(agent_id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// Acknowledges a message for a recipient
    ///
    /// Idempotent: only the first call writes `acked_at`; repeats leave the
    /// original timestamp. Returns whether this call was the first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn ack(
        &self,
        message_id: MessageId,
        agent_id: AgentId,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let result = sqlx::query(sql::ACK)
            .bind(now)
            .bind(message_id.to_string())
            .bind(agent_id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// First response in a conversation from `from` after `after`
    ///
    /// Used by the orchestrator's polling loop while waiting on a
    /// dispatched agent.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn find_response(
        &self,
        conversation: ConversationId,
        from: AgentId,
        after: DateTime<Utc>,
    ) -> DatabaseResult<Option<MessageRecord>> {
        let row = sqlx::query(sql::SELECT_RESPONSE)
            .bind(conversation.to_string())
            .bind(from.to_string())
            .bind(after)
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| mapping::row_to_message(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Acknowledges every receipt of a message, for federation ACKs keyed
    /// by envelope id
    ///
    /// Idempotent in the same way as [`MessageStore::ack`].
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn ack_all_for_message(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let result = sqlx::query(sql::ACK_ALL_FOR_MESSAGE)
            .bind(now)
            .bind(message_id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stamps `delivered_at` on a receipt without touching the attempt
    /// counter, for paths that already counted the attempt at insert
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn stamp_delivered(
        &self,
        receipt_id: ReceiptId,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(sql::STAMP_DELIVERED)
            .bind(now)
            .bind(receipt_id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// Most recent unacked messages for a recipient, newest first
    ///
    /// Opportunistically stamps `delivered_at` for rows still missing it;
    /// a pull from the inbox counts as a delivery.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn inbox(
        &self,
        agent_id: AgentId,
        limit: i64,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Vec<(MessageRecord, ReceiptRecord)>> {
        let rows = sqlx::query(sql::SELECT_INBOX)
            .bind(agent_id.to_string())
            .bind(limit)
            .fetch_all(self.connection.pool())
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let message = mapping::row_to_message(row)?;
            let mut receipt = mapping::row_to_joined_receipt(row)?;
            if receipt.delivered_at.is_none() {
                sqlx::query(sql::STAMP_DELIVERED)
                    .bind(now)
                    .bind(receipt.id.to_string())
                    .execute(self.connection.pool())
                    .await?;
                receipt.delivered_at = Some(now);
            }
            items.push((message, receipt));
        }
        Ok(items)
    }

    /// Recent receipts for a recipient regardless of ack state
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn receipts_for_agent(
        &self,
        agent_id: AgentId,
        limit: i64,
    ) -> DatabaseResult<Vec<(MessageRecord, ReceiptRecord)>> {
        let rows = sqlx::query(sql::SELECT_RECEIPTS_FOR_AGENT)
            .bind(agent_id.to_string())
            .bind(limit)
            .fetch_all(self.connection.pool())
            .await?;
        rows.iter()
            .map(|row| {
                Ok((
                    mapping::row_to_message(row)?,
                    mapping::row_to_joined_receipt(row)?,
                ))
            })
            .collect::<StorageResult<Vec<_>>>()
            .map_err(Into::into)
    }
}
