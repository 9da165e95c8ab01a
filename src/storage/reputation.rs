//! Reputation persistence
//!
//! Append-only per-contract metrics, the current trust snapshot per agent,
//! and the historical trust-metric rows used for trend queries.

use crate::database::{DatabaseConnection, DatabaseResult, StorageError, StorageResult};
use crate::domain_types::{AgentId, ContractId, TrustScoreValue};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

/// Letter bucket for a composite trust score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrustGrade {
    /// ≥ 0.95
    APlus,
    /// ≥ 0.90
    A,
    /// ≥ 0.75
    B,
    /// ≥ 0.60
    C,
    /// ≥ 0.40
    D,
    /// Below 0.40
    F,
}

impl TrustGrade {
    /// Buckets a composite score
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.95 {
            Self::APlus
        } else if score >= 0.90 {
            Self::A
        } else if score >= 0.75 {
            Self::B
        } else if score >= 0.60 {
            Self::C
        } else if score >= 0.40 {
            Self::D
        } else {
            Self::F
        }
    }

    /// Database and display representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::APlus => "A+",
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        }
    }

    /// Parses the database representation
    ///
    /// # Errors
    ///
    /// Returns an error for unknown grade strings
    pub fn parse(value: &str) -> StorageResult<Self> {
        match value {
            "A+" => Ok(Self::APlus),
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            "F" => Ok(Self::F),
            other => Err(StorageError::Decode {
                column: "trust_grade".to_string(),
                message: format!("unknown trust grade: {other}"),
            }),
        }
    }
}

/// One performance observation per completed contract
#[derive(Debug, Clone)]
pub struct MetricRecord {
    /// Agent the observation belongs to
    pub agent_id: AgentId,
    /// Contract that produced it
    pub contract_id: ContractId,
    /// Actual execution time in seconds
    pub execution_time: f64,
    /// Promised execution time from the winning bid
    pub promised_time: f64,
    /// Whether the contract completed successfully
    pub success: bool,
    /// Optional 1..=5 user rating
    pub user_rating: Option<i64>,
    /// Observation time
    pub recorded_at: DateTime<Utc>,
}

/// Fields required to append a metric
#[derive(Debug, Clone)]
pub struct NewMetric {
    /// Agent the observation belongs to
    pub agent_id: AgentId,
    /// Contract that produced it
    pub contract_id: ContractId,
    /// Actual execution time in seconds
    pub execution_time: f64,
    /// Promised execution time from the winning bid
    pub promised_time: f64,
    /// Whether the contract completed successfully
    pub success: bool,
    /// Optional 1..=5 user rating
    pub user_rating: Option<i64>,
}

/// Current multi-dimensional trust snapshot for an agent
#[derive(Debug, Clone)]
pub struct TrustSnapshot {
    /// Agent the snapshot describes
    pub agent_id: AgentId,
    /// Mean validation score over validated deliveries
    pub quality: f64,
    /// Success rate with volume boost
    pub reliability: f64,
    /// Promised-versus-actual timing score
    pub speed: f64,
    /// Bid-confidence accuracy score
    pub honesty: f64,
    /// Multi-agent collaboration participation score
    pub collaboration: f64,
    /// Weighted composite
    pub trust_score: TrustScoreValue,
    /// Letter bucket for the composite
    pub trust_grade: TrustGrade,
    /// Contracts awarded to the agent at computation time
    pub total_contracts: i64,
    /// Of those, settled
    pub successful_contracts: i64,
    /// Of those, failed
    pub failed_contracts: i64,
    /// Computation time
    pub last_calculated: DateTime<Utc>,
}

mod sql {
    pub(super) const INSERT_METRIC: &str = "INSERT INTO agent_metrics
        (id, agent_id, contract_id, execution_time, promised_time, success,
         user_rating, recorded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

    pub(super) const SELECT_METRICS: &str =
        "SELECT * FROM agent_metrics WHERE agent_id = ? ORDER BY recorded_at ASC";

    pub(super) const UPSERT_SNAPSHOT: &str = "INSERT INTO trust_scores
        (agent_id, quality_score, reliability_score, speed_score, honesty_score,
         collaboration_score, trust_score, trust_grade, total_contracts,
         successful_contracts, failed_contracts, last_calculated)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (agent_id) DO UPDATE SET
            quality_score = excluded.quality_score,
            reliability_score = excluded.reliability_score,
            speed_score = excluded.speed_score,
            honesty_score = excluded.honesty_score,
            collaboration_score = excluded.collaboration_score,
            trust_score = excluded.trust_score,
            trust_grade = excluded.trust_grade,
            total_contracts = excluded.total_contracts,
            successful_contracts = excluded.successful_contracts,
            failed_contracts = excluded.failed_contracts,
            last_calculated = excluded.last_calculated";

    pub(super) const SELECT_SNAPSHOT: &str = "SELECT * FROM trust_scores WHERE agent_id = ?";

    pub(super) const INSERT_HISTORY: &str = "INSERT INTO trust_metrics
        (id, agent_id, quality_score, reliability_score, speed_score, honesty_score,
         collaboration_score, trust_score, contracts_at_time, recorded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

    pub(super) const SELECT_HISTORY_SINCE: &str = "SELECT * FROM trust_metrics
        WHERE agent_id = ? AND recorded_at >= ? ORDER BY recorded_at ASC";

    pub(super) const COUNT_COLLABORATIONS: &str =
        "SELECT COUNT(*) AS n FROM collaboration_results WHERE agent_id = ?";

    pub(super) const CONTRACT_STATS: &str = "SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN status = 'settled' THEN 1 ELSE 0 END), 0) AS settled,
            COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed
        FROM contracts WHERE awarded_to = ?";
}

mod mapping {
    use super::{
        AgentId, ContractId, MetricRecord, Row, SqliteRow, StorageError, StorageResult,
        TrustGrade, TrustScoreValue, TrustSnapshot,
    };

    fn decode<T>(column: &str, result: Result<T, impl ToString>) -> StorageResult<T> {
        result.map_err(|e| StorageError::Decode {
            column: column.to_string(),
            message: e.to_string(),
        })
    }

    pub(super) fn row_to_metric(row: &SqliteRow) -> StorageResult<MetricRecord> {
        let agent: String = row.get("agent_id");
        let contract: String = row.get("contract_id");
        Ok(MetricRecord {
            agent_id: decode("agent_id", AgentId::parse(&agent))?,
            contract_id: decode("contract_id", ContractId::parse(&contract))?,
            execution_time: row.get("execution_time"),
            promised_time: row.get("promised_time"),
            success: row.get("success"),
            user_rating: row.get("user_rating"),
            recorded_at: row.get("recorded_at"),
        })
    }

    pub(super) fn row_to_snapshot(row: &SqliteRow) -> StorageResult<TrustSnapshot> {
        let agent: String = row.get("agent_id");
        let grade: String = row.get("trust_grade");
        let trust: f64 = row.get("trust_score");
        Ok(TrustSnapshot {
            agent_id: decode("agent_id", AgentId::parse(&agent))?,
            quality: row.get("quality_score"),
            reliability: row.get("reliability_score"),
            speed: row.get("speed_score"),
            honesty: row.get("honesty_score"),
            collaboration: row.get("collaboration_score"),
            trust_score: TrustScoreValue::clamped(trust),
            trust_grade: TrustGrade::parse(&grade)?,
            total_contracts: row.get("total_contracts"),
            successful_contracts: row.get("successful_contracts"),
            failed_contracts: row.get("failed_contracts"),
            last_calculated: row.get("last_calculated"),
        })
    }
}

/// Store for metrics, snapshots, and trust history
#[derive(Clone, Debug)]
pub struct ReputationStore {
    connection: DatabaseConnection,
}

impl ReputationStore {
    /// Creates the store over a shared connection
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Appends one performance metric
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn append_metric(&self, new: NewMetric, now: DateTime<Utc>) -> DatabaseResult<()> {
        sqlx::query(sql::INSERT_METRIC)
            .bind(Uuid::new_v4().to_string())
            .bind(new.agent_id.to_string())
            .bind(new.contract_id.to_string())
            .bind(new.execution_time)
            .bind(new.promised_time)
            .bind(new.success)
            .bind(new.user_rating)
            .bind(now)
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// All metrics for an agent, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn metrics_for(&self, agent_id: AgentId) -> DatabaseResult<Vec<MetricRecord>> {
        let rows = sqlx::query(sql::SELECT_METRICS)
            .bind(agent_id.to_string())
            .fetch_all(self.connection.pool())
            .await?;
        rows.iter()
            .map(|r| mapping::row_to_metric(r).map_err(Into::into))
            .collect()
    }

    /// Writes the current snapshot and appends a history row
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn save_snapshot(&self, snapshot: &TrustSnapshot) -> DatabaseResult<()> {
        let mut tx = self.connection.pool().begin().await?;
        sqlx::query(sql::UPSERT_SNAPSHOT)
            .bind(snapshot.agent_id.to_string())
            .bind(snapshot.quality)
            .bind(snapshot.reliability)
            .bind(snapshot.speed)
            .bind(snapshot.honesty)
            .bind(snapshot.collaboration)
            .bind(snapshot.trust_score.as_f64())
            .bind(snapshot.trust_grade.as_str())
            .bind(snapshot.total_contracts)
            .bind(snapshot.successful_contracts)
            .bind(snapshot.failed_contracts)
            .bind(snapshot.last_calculated)
            .execute(&mut *tx)
            .await?;
        sqlx::query(sql::INSERT_HISTORY)
            .bind(Uuid::new_v4().to_string())
            .bind(snapshot.agent_id.to_string())
            .bind(snapshot.quality)
            .bind(snapshot.reliability)
            .bind(snapshot.speed)
            .bind(snapshot.honesty)
            .bind(snapshot.collaboration)
            .bind(snapshot.trust_score.as_f64())
            .bind(snapshot.total_contracts)
            .bind(snapshot.last_calculated)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Current snapshot for an agent, if one was ever computed
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn get_snapshot(&self, agent_id: AgentId) -> DatabaseResult<Option<TrustSnapshot>> {
        let row = sqlx::query(sql::SELECT_SNAPSHOT)
            .bind(agent_id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| mapping::row_to_snapshot(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Snapshot history since a point in time, for trend queries
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn history_since(
        &self,
        agent_id: AgentId,
        since: DateTime<Utc>,
    ) -> DatabaseResult<Vec<TrustSnapshot>> {
        let rows = sqlx::query(sql::SELECT_HISTORY_SINCE)
            .bind(agent_id.to_string())
            .bind(since)
            .fetch_all(self.connection.pool())
            .await?;
        rows.iter()
            .map(|r| {
                let agent: String = r.get("agent_id");
                let trust: f64 = r.get("trust_score");
                Ok(TrustSnapshot {
                    agent_id: AgentId::parse(&agent).map_err(|e| StorageError::Decode {
                        column: "agent_id".to_string(),
                        message: e.to_string(),
                    })?,
                    quality: r.get("quality_score"),
                    reliability: r.get("reliability_score"),
                    speed: r.get("speed_score"),
                    honesty: r.get("honesty_score"),
                    collaboration: r.get("collaboration_score"),
                    trust_score: TrustScoreValue::clamped(trust),
                    trust_grade: TrustGrade::from_score(trust),
                    total_contracts: r.get("contracts_at_time"),
                    successful_contracts: 0,
                    failed_contracts: 0,
                    last_calculated: r.get("recorded_at"),
                })
            })
            .collect::<StorageResult<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Number of collaboration results the agent has participated in
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn collaboration_count(&self, agent_id: AgentId) -> DatabaseResult<i64> {
        let row = sqlx::query(sql::COUNT_COLLABORATIONS)
            .bind(agent_id.to_string())
            .fetch_one(self.connection.pool())
            .await?;
        Ok(row.get("n"))
    }

    /// `(total, settled, failed)` contract counts for an agent
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn contract_stats(&self, agent_id: AgentId) -> DatabaseResult<(i64, i64, i64)> {
        let row = sqlx::query(sql::CONTRACT_STATS)
            .bind(agent_id.to_string())
            .fetch_one(self.connection.pool())
            .await?;
        Ok((row.get("total"), row.get("settled"), row.get("failed")))
    }
}
