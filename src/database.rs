//! Database module for embedded SQLite storage
//!
//! Provides the connection pool shared by every store plus schema bootstrap.
//! Schema statements live in a pure `schema` module; the imperative shell is
//! limited to pool construction and statement execution.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// Database-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Database error from `SQLx`
    #[error("Database error: {message}")]
    Database {
        /// Error message from database operation
        message: String,
    },

    /// A stored value could not be decoded into its domain type
    #[error("Decode error in column {column}: {message}")]
    Decode {
        /// Column whose value failed decoding
        column: String,
        /// Why decoding failed
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {field} - {reason}")]
    Configuration {
        /// Name of the configuration field that was invalid
        field: String,
        /// Reason why the configuration was invalid
        reason: String,
    },
}

/// Database error types
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error from `SQLx`
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl DatabaseError {
    /// Whether the underlying driver reported a unique-constraint violation
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Sqlx(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

/// Database result type
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Storage result type for pure functions
pub type StorageResult<T> = Result<T, StorageError>;

/// Schema statements executed at startup
///
/// Every table mirrors one persisted entity; unique indexes enforce the
/// invariants the stores rely on (agent name uniqueness, one bid per
/// contract+agent, idempotency-key dedupe, one receipt per recipient).
mod schema {
    pub(super) const STATEMENTS: &[&str] = &[
        "CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            endpoint TEXT NOT NULL DEFAULT '',
            capabilities TEXT NOT NULL DEFAULT '[]',
            category TEXT NOT NULL DEFAULT 'general',
            status TEXT NOT NULL DEFAULT 'active',
            creator_id TEXT,
            org_id TEXT,
            trust_score REAL NOT NULL DEFAULT 0.5,
            is_public INTEGER NOT NULL DEFAULT 0,
            cost_per_request REAL NOT NULL DEFAULT 0,
            total_calls INTEGER NOT NULL DEFAULT 0,
            successful_calls INTEGER NOT NULL DEFAULT 0,
            failed_calls INTEGER NOT NULL DEFAULT 0,
            avg_duration_ms REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS organizations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            domain TEXT UNIQUE,
            created_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS organization_members (
            org_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'member',
            created_at TEXT NOT NULL,
            PRIMARY KEY (org_id, user_id)
        )",
        "CREATE TABLE IF NOT EXISTS a2a_org_allows (
            source_org_id TEXT NOT NULL,
            target_org_id TEXT NOT NULL,
            allowed INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (source_org_id, target_org_id)
        )",
        "CREATE TABLE IF NOT EXISTS a2a_agent_allows (
            source_agent_id TEXT NOT NULL,
            target_agent_id TEXT NOT NULL,
            allowed INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (source_agent_id, target_agent_id)
        )",
        "CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            initiator_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            topic TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            context_data TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            from_agent_id TEXT NOT NULL,
            to_agent_id TEXT NOT NULL,
            message_type TEXT NOT NULL,
            content TEXT NOT NULL,
            requires_response INTEGER NOT NULL DEFAULT 0,
            idempotency_key TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
        )",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_idempotency
            ON messages(from_agent_id, idempotency_key)
            WHERE idempotency_key IS NOT NULL",
        "CREATE TABLE IF NOT EXISTS message_receipts (
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            delivery_attempts INTEGER NOT NULL DEFAULT 0,
            last_attempt_at TEXT,
            delivered_at TEXT,
            acked_at TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (message_id, agent_id),
            FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
        )",
        "CREATE TABLE IF NOT EXISTS contracts (
            id TEXT PRIMARY KEY,
            issuer TEXT NOT NULL,
            intent TEXT NOT NULL,
            context TEXT NOT NULL DEFAULT '{}',
            reward_amount TEXT NOT NULL,
            status TEXT NOT NULL,
            award_strategy TEXT NOT NULL DEFAULT 'reputation_weighted',
            awarded_to TEXT,
            created_at TEXT NOT NULL,
            awarded_at TEXT,
            completed_at TEXT,
            expires_at TEXT
        )",
        "CREATE TABLE IF NOT EXISTS bids (
            id TEXT PRIMARY KEY,
            contract_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            price TEXT NOT NULL,
            eta_seconds REAL NOT NULL,
            confidence REAL NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (contract_id, agent_id),
            FOREIGN KEY (contract_id) REFERENCES contracts(id)
        )",
        "CREATE TABLE IF NOT EXISTS deliveries (
            id TEXT PRIMARY KEY,
            contract_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            data TEXT NOT NULL,
            delivered_at TEXT NOT NULL,
            is_validated INTEGER NOT NULL DEFAULT 0,
            validation_score REAL,
            UNIQUE (contract_id, agent_id),
            FOREIGN KEY (contract_id) REFERENCES contracts(id)
        )",
        "CREATE TABLE IF NOT EXISTS agent_metrics (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            contract_id TEXT NOT NULL,
            execution_time REAL NOT NULL,
            promised_time REAL NOT NULL,
            success INTEGER NOT NULL,
            user_rating INTEGER,
            recorded_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_agent_metrics_agent
            ON agent_metrics(agent_id)",
        "CREATE TABLE IF NOT EXISTS trust_scores (
            agent_id TEXT PRIMARY KEY,
            quality_score REAL NOT NULL,
            reliability_score REAL NOT NULL,
            speed_score REAL NOT NULL,
            honesty_score REAL NOT NULL,
            collaboration_score REAL NOT NULL,
            trust_score REAL NOT NULL,
            trust_grade TEXT NOT NULL,
            total_contracts INTEGER NOT NULL DEFAULT 0,
            successful_contracts INTEGER NOT NULL DEFAULT 0,
            failed_contracts INTEGER NOT NULL DEFAULT 0,
            last_calculated TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS trust_metrics (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            quality_score REAL NOT NULL,
            reliability_score REAL NOT NULL,
            speed_score REAL NOT NULL,
            honesty_score REAL NOT NULL,
            collaboration_score REAL NOT NULL,
            trust_score REAL NOT NULL,
            contracts_at_time INTEGER NOT NULL,
            recorded_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_trust_metrics_agent
            ON trust_metrics(agent_id, recorded_at)",
        "CREATE TABLE IF NOT EXISTS user_preferences (
            user_id TEXT PRIMARY KEY,
            price_weight REAL NOT NULL DEFAULT 0.25,
            performance_weight REAL NOT NULL DEFAULT 0.25,
            speed_weight REAL NOT NULL DEFAULT 0.25,
            reputation_weight REAL NOT NULL DEFAULT 0.25,
            max_price TEXT,
            min_confidence REAL NOT NULL DEFAULT 0,
            max_latency REAL,
            min_reputation REAL NOT NULL DEFAULT 0,
            free_only INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS federation_contacts (
            remote_address TEXT PRIMARY KEY,
            remote_name TEXT NOT NULL,
            remote_domain TEXT NOT NULL,
            remote_org_id TEXT,
            local_agent_id TEXT,
            local_org_id TEXT,
            last_seen_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS policy_cache (
            id TEXT PRIMARY KEY,
            source_org_id TEXT,
            target_org_id TEXT,
            source_agent_id TEXT,
            target_agent_id TEXT,
            allowed INTEGER NOT NULL,
            decided_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS plans (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            query TEXT NOT NULL,
            pattern TEXT NOT NULL,
            complexity REAL NOT NULL,
            graph TEXT NOT NULL,
            agent_assignments TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL,
            final_result TEXT,
            created_at TEXT NOT NULL,
            completed_at TEXT,
            total_duration_ms INTEGER
        )",
        "CREATE TABLE IF NOT EXISTS collaborations (
            id TEXT PRIMARY KEY,
            plan_id TEXT NOT NULL,
            step_id TEXT NOT NULL,
            pattern TEXT NOT NULL,
            step_description TEXT NOT NULL,
            agent_ids TEXT NOT NULL,
            config TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL,
            synthesized TEXT,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            duration_ms INTEGER,
            FOREIGN KEY (plan_id) REFERENCES plans(id) ON DELETE CASCADE
        )",
        "CREATE TABLE IF NOT EXISTS collaboration_results (
            id TEXT PRIMARY KEY,
            collaboration_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            result TEXT NOT NULL,
            confidence REAL NOT NULL,
            duration_ms INTEGER NOT NULL,
            FOREIGN KEY (collaboration_id) REFERENCES collaborations(id) ON DELETE CASCADE
        )",
    ];
}

/// Shared SQLite connection pool
///
/// Cloning is cheap; every store holds its own clone. WAL mode and foreign
/// keys are always enabled.
#[derive(Clone, Debug)]
pub struct DatabaseConnection {
    pool: Pool<Sqlite>,
}

impl DatabaseConnection {
    /// Opens (creating if needed) a database file and bootstraps the schema
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created or schema bootstrap fails
    pub async fn connect<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        let path_display = path.as_ref().display().to_string();
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path_display}?mode=rwc"))
            .map_err(DatabaseError::Sqlx)?
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let connection = Self { pool };
        connection.init_schema().await?;
        info!(database = %path_display, "database ready");
        Ok(connection)
    }

    /// Opens an in-memory database for tests
    ///
    /// The pool is pinned to a single connection so every store sees the
    /// same in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created or schema bootstrap fails
    pub async fn in_memory() -> DatabaseResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(DatabaseError::Sqlx)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let connection = Self { pool };
        connection.init_schema().await?;
        Ok(connection)
    }

    /// The underlying pool, for stores issuing queries
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn init_schema(&self) -> DatabaseResult<()> {
        for statement in schema::STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_database_bootstraps_schema() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert!(row.0 >= 15, "expected full schema, got {} tables", row.0);
    }

    #[tokio::test]
    async fn schema_bootstrap_is_idempotent() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.init_schema().await.unwrap();
        db.init_schema().await.unwrap();
    }

    #[tokio::test]
    async fn file_database_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.db");
        let _db = DatabaseConnection::connect(&path).await.unwrap();
        assert!(path.exists());
    }
}
