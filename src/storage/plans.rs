//! Orchestration plan persistence
//!
//! Every orchestration run records its plan, one collaboration row per
//! executed step, and one result row per participating agent. Collaboration
//! result counts also feed the reputation engine's collaboration dimension.

use crate::database::{DatabaseConnection, DatabaseResult, StorageError, StorageResult};
use crate::domain_types::{AgentId, PlanId, UserId};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

/// Lifecycle status of an orchestration plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    /// Intent parsed, graph under construction
    Planning,
    /// Agents assigned, ready to execute
    Ready,
    /// Steps running
    Executing,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed,
}

impl PlanStatus {
    /// Database representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses the database representation
    ///
    /// # Errors
    ///
    /// Returns an error for unknown status strings
    pub fn parse(value: &str) -> StorageResult<Self> {
        match value {
            "planning" => Ok(Self::Planning),
            "ready" => Ok(Self::Ready),
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StorageError::Decode {
                column: "status".to_string(),
                message: format!("unknown plan status: {other}"),
            }),
        }
    }
}

/// A persisted orchestration plan
#[derive(Debug, Clone)]
pub struct PlanRecord {
    /// Primary key
    pub id: PlanId,
    /// Requesting user
    pub user_id: UserId,
    /// Original natural-language query
    pub query: String,
    /// Collaboration pattern chosen for the run
    pub pattern: String,
    /// Intent complexity estimate
    pub complexity: f64,
    /// Serialized execution graph
    pub graph: serde_json::Value,
    /// Node to agent assignments
    pub agent_assignments: serde_json::Value,
    /// Lifecycle status
    pub status: PlanStatus,
    /// Synthesized final result once completed
    pub final_result: Option<serde_json::Value>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Terminal time
    pub completed_at: Option<DateTime<Utc>>,
    /// Total wall-clock duration
    pub total_duration_ms: Option<i64>,
}

/// A persisted collaboration step
#[derive(Debug, Clone)]
pub struct CollaborationRecord {
    /// Primary key
    pub id: Uuid,
    /// Owning plan
    pub plan_id: PlanId,
    /// Step node identifier within the plan graph
    pub step_id: String,
    /// Pattern the step executed under
    pub pattern: String,
    /// Step task description
    pub step_description: String,
    /// Participating agents
    pub agent_ids: Vec<AgentId>,
    /// Synthesized step result
    pub synthesized: Option<serde_json::Value>,
    /// Step start time
    pub started_at: DateTime<Utc>,
    /// Step completion time
    pub completed_at: Option<DateTime<Utc>>,
    /// Step duration
    pub duration_ms: Option<i64>,
}

mod sql {
    pub(super) const INSERT_PLAN: &str = "INSERT INTO plans
        (id, user_id, query, pattern, complexity, graph, agent_assignments,
         status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";

    pub(super) const SELECT_PLAN: &str = "SELECT * FROM plans WHERE id = ?";

    pub(super) const UPDATE_ASSIGNMENTS: &str =
        "UPDATE plans SET agent_assignments = ?, status = ? WHERE id = ?";

    pub(super) const COMPLETE_PLAN: &str = "UPDATE plans SET
            status = ?, final_result = ?, completed_at = ?, total_duration_ms = ?
        WHERE id = ?";

    pub(super) const INSERT_COLLABORATION: &str = "INSERT INTO collaborations
        (id, plan_id, step_id, pattern, step_description, agent_ids, config,
         status, started_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'executing', ?)";

    pub(super) const COMPLETE_COLLABORATION: &str = "UPDATE collaborations SET
            status = 'completed', synthesized = ?, completed_at = ?, duration_ms = ?
        WHERE id = ?";

    pub(super) const SELECT_COLLABORATIONS: &str =
        "SELECT * FROM collaborations WHERE plan_id = ? ORDER BY started_at ASC";

    pub(super) const INSERT_RESULT: &str = "INSERT INTO collaboration_results
        (id, collaboration_id, agent_id, result, confidence, duration_ms)
        VALUES (?, ?, ?, ?, ?, ?)";
}

mod mapping {
    use super::{
        AgentId, CollaborationRecord, PlanId, PlanRecord, PlanStatus, Row, SqliteRow, StorageError,
        StorageResult, UserId, Uuid,
    };

    fn decode<T>(column: &str, result: Result<T, impl ToString>) -> StorageResult<T> {
        result.map_err(|e| StorageError::Decode {
            column: column.to_string(),
            message: e.to_string(),
        })
    }

    pub(super) fn agent_ids_to_json(ids: &[AgentId]) -> String {
        let raw: Vec<String> = ids.iter().map(ToString::to_string).collect();
        serde_json::to_string(&raw).unwrap_or_else(|_| "[]".to_string())
    }

    pub(super) fn row_to_plan(row: &SqliteRow) -> StorageResult<PlanRecord> {
        let id: String = row.get("id");
        let user: String = row.get("user_id");
        let status: String = row.get("status");
        let graph: String = row.get("graph");
        let assignments: String = row.get("agent_assignments");
        let final_result: Option<String> = row.get("final_result");
        Ok(PlanRecord {
            id: decode("id", PlanId::parse(&id))?,
            user_id: decode("user_id", UserId::parse(&user))?,
            query: row.get("query"),
            pattern: row.get("pattern"),
            complexity: row.get("complexity"),
            graph: serde_json::from_str(&graph).unwrap_or(serde_json::Value::Null),
            agent_assignments: serde_json::from_str(&assignments)
                .unwrap_or(serde_json::Value::Null),
            status: PlanStatus::parse(&status)?,
            final_result: final_result.map(|v| serde_json::from_str(&v).unwrap_or(serde_json::Value::Null)),
            created_at: row.get("created_at"),
            completed_at: row.get("completed_at"),
            total_duration_ms: row.get("total_duration_ms"),
        })
    }

    pub(super) fn row_to_collaboration(row: &SqliteRow) -> StorageResult<CollaborationRecord> {
        let id: String = row.get("id");
        let plan: String = row.get("plan_id");
        let agent_ids: String = row.get("agent_ids");
        let synthesized: Option<String> = row.get("synthesized");
        Ok(CollaborationRecord {
            id: decode("id", Uuid::parse_str(&id))?,
            plan_id: decode("plan_id", PlanId::parse(&plan))?,
            step_id: row.get("step_id"),
            pattern: row.get("pattern"),
            step_description: row.get("step_description"),
            agent_ids: serde_json::from_str::<Vec<String>>(&agent_ids)
                .unwrap_or_default()
                .iter()
                .filter_map(|v| AgentId::parse(v).ok())
                .collect(),
            synthesized: synthesized
                .map(|v| serde_json::from_str(&v).unwrap_or(serde_json::Value::Null)),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            duration_ms: row.get("duration_ms"),
        })
    }
}

/// Store for plans, collaborations, and per-agent results
#[derive(Clone, Debug)]
pub struct PlanStore {
    connection: DatabaseConnection,
}

impl PlanStore {
    /// Creates the store over a shared connection
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Records a new plan in PLANNING
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_plan(
        &self,
        user_id: UserId,
        query: &str,
        pattern: &str,
        complexity: f64,
        graph: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> DatabaseResult<PlanId> {
        let id = PlanId::generate();
        sqlx::query(sql::INSERT_PLAN)
            .bind(id.to_string())
            .bind(user_id.to_string())
            .bind(query)
            .bind(pattern)
            .bind(complexity)
            .bind(graph.to_string())
            .bind("{}")
            .bind(PlanStatus::Planning.as_str())
            .bind(now)
            .execute(self.connection.pool())
            .await?;
        Ok(id)
    }

    /// Fetches a plan by ID
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn get(&self, id: PlanId) -> DatabaseResult<Option<PlanRecord>> {
        let row = sqlx::query(sql::SELECT_PLAN)
            .bind(id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| mapping::row_to_plan(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Stores node-to-agent assignments and moves the plan to READY
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn set_assignments(
        &self,
        id: PlanId,
        assignments: &serde_json::Value,
    ) -> DatabaseResult<()> {
        sqlx::query(sql::UPDATE_ASSIGNMENTS)
            .bind(assignments.to_string())
            .bind(PlanStatus::Ready.as_str())
            .bind(id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// Finishes a plan with a terminal status and final result
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn finish_plan(
        &self,
        id: PlanId,
        status: PlanStatus,
        final_result: Option<&serde_json::Value>,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(sql::COMPLETE_PLAN)
            .bind(status.as_str())
            .bind(final_result.map(ToString::to_string))
            .bind(now)
            .bind(duration_ms)
            .bind(id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// Records the start of one collaboration step
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_collaboration(
        &self,
        plan_id: PlanId,
        step_id: &str,
        pattern: &str,
        description: &str,
        agents: &[AgentId],
        config: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(sql::INSERT_COLLABORATION)
            .bind(id.to_string())
            .bind(plan_id.to_string())
            .bind(step_id)
            .bind(pattern)
            .bind(description)
            .bind(mapping::agent_ids_to_json(agents))
            .bind(config.to_string())
            .bind(now)
            .execute(self.connection.pool())
            .await?;
        Ok(id)
    }

    /// Completes a collaboration step with its synthesized result
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn complete_collaboration(
        &self,
        id: Uuid,
        synthesized: &serde_json::Value,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(sql::COMPLETE_COLLABORATION)
            .bind(synthesized.to_string())
            .bind(now)
            .bind(duration_ms)
            .bind(id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// Lists a plan's collaboration steps in execution order
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn collaborations_for(
        &self,
        plan_id: PlanId,
    ) -> DatabaseResult<Vec<CollaborationRecord>> {
        let rows = sqlx::query(sql::SELECT_COLLABORATIONS)
            .bind(plan_id.to_string())
            .fetch_all(self.connection.pool())
            .await?;
        rows.iter()
            .map(|r| mapping::row_to_collaboration(r).map_err(Into::into))
            .collect()
    }

    /// Records one agent's result within a collaboration
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn insert_result(
        &self,
        collaboration_id: Uuid,
        agent_id: AgentId,
        result: &serde_json::Value,
        confidence: f64,
        duration_ms: i64,
    ) -> DatabaseResult<()> {
        sqlx::query(sql::INSERT_RESULT)
            .bind(Uuid::new_v4().to_string())
            .bind(collaboration_id.to_string())
            .bind(agent_id.to_string())
            .bind(result.to_string())
            .bind(confidence)
            .bind(duration_ms)
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }
}
