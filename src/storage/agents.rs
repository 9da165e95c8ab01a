//! Agent persistence
//!
//! Owns the `agents` table: registration rows, lifecycle status, performance
//! counters, and the denormalized composite trust score consumed by award
//! strategies and discovery ranking.

use crate::database::{DatabaseConnection, DatabaseResult, StorageError, StorageResult};
use crate::domain_types::{AgentId, AgentName, CapabilityName, OrgId, TrustScoreValue, UserId};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

/// Lifecycle status of an agent row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentStatus {
    /// Fully registered and eligible for messaging and bidding
    Active,
    /// Registered but not reachable; federation stubs are pinned here
    Inactive,
    /// Awaiting review by an operator
    PendingReview,
    /// Rejected by an operator
    Rejected,
}

impl AgentStatus {
    /// Database representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::PendingReview => "pending_review",
            Self::Rejected => "rejected",
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
            "inactive" => Ok(Self::Inactive),
            "pending_review" => Ok(Self::PendingReview),
            "rejected" => Ok(Self::Rejected),
            other => Err(StorageError::Decode {
                column: "status".to_string(),
                message: format!("unknown agent status: {other}"),
            }),
        }
    }
}

/// A persisted agent
#[derive(Debug, Clone)]
pub struct AgentRecord {
    /// Primary key
    pub id: AgentId,
    /// Globally unique name; federation stubs use `name@domain`
    pub name: AgentName,
    /// Human-readable description
    pub description: String,
    /// Callback endpoint for the agent's own service
    pub endpoint: String,
    /// Advertised capability tags
    pub capabilities: Vec<CapabilityName>,
    /// Discovery category
    pub category: String,
    /// Lifecycle status
    pub status: AgentStatus,
    /// Registering user, if any
    pub creator_id: Option<UserId>,
    /// Owning organization, if any
    pub org_id: Option<OrgId>,
    /// Denormalized composite trust score
    pub trust_score: TrustScoreValue,
    /// Whether any agent may message this one
    pub is_public: bool,
    /// Price charged per call, for cost-aware selection
    pub cost_per_request: f64,
    /// Total recorded calls
    pub total_calls: i64,
    /// Calls that succeeded
    pub successful_calls: i64,
    /// Calls that failed
    pub failed_calls: i64,
    /// Rolling mean call duration in milliseconds
    pub avg_duration_ms: f64,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl AgentRecord {
    /// Success fraction over recorded calls, defaulting to 0.5 with no data
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.5
        } else {
            self.successful_calls as f64 / self.total_calls as f64
        }
    }
}

/// Fields required to register an agent
#[derive(Debug, Clone)]
pub struct NewAgent {
    /// Globally unique name
    pub name: AgentName,
    /// Human-readable description
    pub description: String,
    /// Callback endpoint
    pub endpoint: String,
    /// Advertised capability tags
    pub capabilities: Vec<CapabilityName>,
    /// Discovery category
    pub category: String,
    /// Initial lifecycle status
    pub status: AgentStatus,
    /// Registering user
    pub creator_id: Option<UserId>,
    /// Owning organization
    pub org_id: Option<OrgId>,
    /// Whether any agent may message this one
    pub is_public: bool,
    /// Price charged per call
    pub cost_per_request: f64,
}

mod sql {
    pub(super) const INSERT: &str = "INSERT INTO agents (
            id, name, description, endpoint, capabilities, category, status,
            creator_id, org_id, trust_score, is_public, cost_per_request,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0.5, ?, ?, ?, ?)";

    pub(super) const SELECT_BY_ID: &str = "SELECT * FROM agents WHERE id = ?";

    pub(super) const SELECT_BY_NAME: &str = "SELECT * FROM agents WHERE name = ?";

    pub(super) const SELECT_ACTIVE: &str = "SELECT * FROM agents WHERE status = 'active'";

    pub(super) const SELECT_CANDIDATES: &str =
        "SELECT * FROM agents WHERE status = 'active' ORDER BY trust_score DESC";

    pub(super) const UPDATE_STATUS: &str =
        "UPDATE agents SET status = ?, updated_at = ? WHERE id = ?";

    pub(super) const UPDATE_ORG: &str = "UPDATE agents SET org_id = ?, updated_at = ? WHERE id = ?";

    pub(super) const UPDATE_TRUST: &str =
        "UPDATE agents SET trust_score = ?, updated_at = ? WHERE id = ?";

    pub(super) const RECORD_CALL: &str = "UPDATE agents SET
            total_calls = total_calls + 1,
            successful_calls = successful_calls + ?,
            failed_calls = failed_calls + ?,
            avg_duration_ms = (avg_duration_ms * total_calls + ?) / (total_calls + 1),
            updated_at = ?
        WHERE id = ?";
}

mod mapping {
    use super::{
        AgentId, AgentName, AgentRecord, AgentStatus, CapabilityName, OrgId, Row, SqliteRow,
        StorageError, StorageResult, TrustScoreValue, UserId,
    };

    pub(super) fn capabilities_to_json(capabilities: &[CapabilityName]) -> String {
        let names: Vec<String> = capabilities.iter().map(ToString::to_string).collect();
        serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string())
    }

    pub(super) fn parse_capabilities(raw: &str) -> Vec<CapabilityName> {
        serde_json::from_str::<Vec<String>>(raw)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|name| CapabilityName::try_new(name).ok())
            .collect()
    }

    pub(super) fn decode<T>(column: &str, result: Result<T, impl ToString>) -> StorageResult<T> {
        result.map_err(|e| StorageError::Decode {
            column: column.to_string(),
            message: e.to_string(),
        })
    }

    pub(super) fn row_to_agent(row: &SqliteRow) -> StorageResult<AgentRecord> {
        let id: String = row.get("id");
        let name: String = row.get("name");
        let status: String = row.get("status");
        let capabilities: String = row.get("capabilities");
        let creator_id: Option<String> = row.get("creator_id");
        let org_id: Option<String> = row.get("org_id");
        let trust_score: f64 = row.get("trust_score");

        Ok(AgentRecord {
            id: decode("id", AgentId::parse(&id))?,
            name: decode("name", AgentName::try_new(name))?,
            description: row.get("description"),
            endpoint: row.get("endpoint"),
            capabilities: parse_capabilities(&capabilities),
            category: row.get("category"),
            status: AgentStatus::parse(&status)?,
            creator_id: creator_id
                .map(|v| decode("creator_id", UserId::parse(&v)))
                .transpose()?,
            org_id: org_id
                .map(|v| decode("org_id", OrgId::parse(&v)))
                .transpose()?,
            trust_score: TrustScoreValue::clamped(trust_score),
            is_public: row.get("is_public"),
            cost_per_request: row.get("cost_per_request"),
            total_calls: row.get("total_calls"),
            successful_calls: row.get("successful_calls"),
            failed_calls: row.get("failed_calls"),
            avg_duration_ms: row.get("avg_duration_ms"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Discovery ranking over a candidate row: substring hits over name and
    /// description plus capability overlap, weighted toward capabilities.
    pub(super) fn search_rank(
        agent: &AgentRecord,
        query: &str,
        capabilities: &[CapabilityName],
    ) -> f64 {
        let query = query.to_lowercase();
        let mut score = 0.0;

        if !query.is_empty() {
            if agent.name.to_string().to_lowercase().contains(&query) {
                score += 2.0;
            }
            if agent.description.to_lowercase().contains(&query) {
                score += 1.0;
            }
        }

        if !capabilities.is_empty() {
            let overlap = capabilities
                .iter()
                .filter(|cap| agent.capabilities.contains(cap))
                .count();
            score += 3.0 * overlap as f64 / capabilities.len() as f64;
        }

        // Trust breaks ties between equally relevant agents.
        score + agent.trust_score.as_f64() * 0.1
    }
}

/// Store for agent rows
#[derive(Clone, Debug)]
pub struct AgentStore {
    connection: DatabaseConnection,
}

impl AgentStore {
    /// Creates the store over a shared connection
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Registers a new agent
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate name or database failure
    pub async fn insert(&self, new: NewAgent, now: DateTime<Utc>) -> DatabaseResult<AgentRecord> {
        let id = AgentId::generate();
        sqlx::query(sql::INSERT)
            .bind(id.to_string())
            .bind(new.name.to_string())
            .bind(&new.description)
            .bind(&new.endpoint)
            .bind(mapping::capabilities_to_json(&new.capabilities))
            .bind(&new.category)
            .bind(new.status.as_str())
            .bind(new.creator_id.map(|v| v.to_string()))
            .bind(new.org_id.map(|v| v.to_string()))
            .bind(new.is_public)
            .bind(new.cost_per_request)
            .bind(now)
            .bind(now)
            .execute(self.connection.pool())
            .await?;

        self.get(id).await?.ok_or_else(|| {
            StorageError::Database {
                message: format!("agent {id} missing after insert"),
            }
            .into()
        })
    }

    /// Fetches an agent by ID
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn get(&self, id: AgentId) -> DatabaseResult<Option<AgentRecord>> {
        let row = sqlx::query(sql::SELECT_BY_ID)
            .bind(id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| mapping::row_to_agent(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Fetches an agent by its globally unique name
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn find_by_name(&self, name: &str) -> DatabaseResult<Option<AgentRecord>> {
        let row = sqlx::query(sql::SELECT_BY_NAME)
            .bind(name)
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| mapping::row_to_agent(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Fetches several agents in a single batched read
    ///
    /// Missing IDs are silently absent from the result.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn get_many(&self, ids: &[AgentId]) -> DatabaseResult<Vec<AgentRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let query = format!("SELECT * FROM agents WHERE id IN ({placeholders})");
        let mut q = sqlx::query(&query);
        for id in ids {
            q = q.bind(id.to_string());
        }
        let rows = q.fetch_all(self.connection.pool()).await?;
        rows.iter()
            .map(|r| mapping::row_to_agent(r).map_err(Into::into))
            .collect()
    }

    /// Lists every active agent
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn list_active(&self) -> DatabaseResult<Vec<AgentRecord>> {
        let rows = sqlx::query(sql::SELECT_ACTIVE)
            .fetch_all(self.connection.pool())
            .await?;
        rows.iter()
            .map(|r| mapping::row_to_agent(r).map_err(Into::into))
            .collect()
    }

    /// Ranked discovery over active agents
    ///
    /// Ranking is substring match over name/description plus capability
    /// overlap; agents with zero relevance are dropped unless both the query
    /// and capability filter are empty.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn search(
        &self,
        query: &str,
        capabilities: &[CapabilityName],
        category: Option<&str>,
        limit: usize,
    ) -> DatabaseResult<Vec<AgentRecord>> {
        let rows = sqlx::query(sql::SELECT_CANDIDATES)
            .fetch_all(self.connection.pool())
            .await?;
        let mut candidates: Vec<AgentRecord> = rows
            .iter()
            .map(|r| mapping::row_to_agent(r))
            .collect::<StorageResult<_>>()?;

        if let Some(category) = category {
            candidates.retain(|agent| agent.category == category);
        }

        let unfiltered = query.is_empty() && capabilities.is_empty();
        let mut ranked: Vec<(f64, AgentRecord)> = candidates
            .into_iter()
            .map(|agent| (mapping::search_rank(&agent, query, capabilities), agent))
            .filter(|(rank, agent)| unfiltered || *rank > agent.trust_score.as_f64() * 0.1)
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(_, agent)| agent)
            .collect())
    }

    /// Mutates an agent's lifecycle status
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn set_status(
        &self,
        id: AgentId,
        status: AgentStatus,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(sql::UPDATE_STATUS)
            .bind(status.as_str())
            .bind(now)
            .bind(id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// Links an agent to an organization
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn set_org(
        &self,
        id: AgentId,
        org_id: Option<OrgId>,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(sql::UPDATE_ORG)
            .bind(org_id.map(|v| v.to_string()))
            .bind(now)
            .bind(id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// Writes the denormalized composite trust score
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn set_trust_score(
        &self,
        id: AgentId,
        score: TrustScoreValue,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(sql::UPDATE_TRUST)
            .bind(score.as_f64())
            .bind(now)
            .bind(id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// Records one call against the agent's performance counters
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn record_call(
        &self,
        id: AgentId,
        success: bool,
        duration_ms: f64,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(sql::RECORD_CALL)
            .bind(i64::from(success))
            .bind(i64::from(!success))
            .bind(duration_ms)
            .bind(now)
            .bind(id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseConnection;

    fn new_agent(name: &str) -> NewAgent {
        NewAgent {
            name: AgentName::try_new(name.to_string()).unwrap(),
            description: format!("{name} test agent"),
            endpoint: "http://localhost:9000".to_string(),
            capabilities: vec![CapabilityName::try_new("search".to_string()).unwrap()],
            category: "general".to_string(),
            status: AgentStatus::Active,
            creator_id: None,
            org_id: None,
            is_public: false,
            cost_per_request: 0.0,
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_round_trip() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        let store = AgentStore::new(db);
        let agent = store.insert(new_agent("alpha"), Utc::now()).await.unwrap();

        let by_id = store.get(agent.id).await.unwrap().unwrap();
        assert_eq!(by_id.name.to_string(), "alpha");
        assert_eq!(by_id.status, AgentStatus::Active);
        assert_eq!(by_id.trust_score.as_f64(), 0.5);

        let by_name = store.find_by_name("alpha").await.unwrap().unwrap();
        assert_eq!(by_name.id, agent.id);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        let store = AgentStore::new(db);
        store.insert(new_agent("dup"), Utc::now()).await.unwrap();
        assert!(store.insert(new_agent("dup"), Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn record_call_updates_counters() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        let store = AgentStore::new(db);
        let agent = store.insert(new_agent("worker"), Utc::now()).await.unwrap();

        store
            .record_call(agent.id, true, 100.0, Utc::now())
            .await
            .unwrap();
        store
            .record_call(agent.id, false, 300.0, Utc::now())
            .await
            .unwrap();

        let agent = store.get(agent.id).await.unwrap().unwrap();
        assert_eq!(agent.total_calls, 2);
        assert_eq!(agent.successful_calls, 1);
        assert_eq!(agent.failed_calls, 1);
        assert!((agent.avg_duration_ms - 200.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn search_prefers_capability_overlap() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        let store = AgentStore::new(db);
        let mut flights = new_agent("flight-bot");
        flights.capabilities = vec![CapabilityName::try_new("flight_search".to_string()).unwrap()];
        let mut hotels = new_agent("hotel-bot");
        hotels.capabilities = vec![CapabilityName::try_new("hotel_search".to_string()).unwrap()];
        store.insert(flights, Utc::now()).await.unwrap();
        store.insert(hotels, Utc::now()).await.unwrap();

        let caps = vec![CapabilityName::try_new("flight_search".to_string()).unwrap()];
        let results = store.search("", &caps, None, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name.to_string(), "flight-bot");
    }

    #[tokio::test]
    async fn inactive_agents_are_not_discoverable() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        let store = AgentStore::new(db);
        let agent = store.insert(new_agent("ghost"), Utc::now()).await.unwrap();
        store
            .set_status(agent.id, AgentStatus::Inactive, Utc::now())
            .await
            .unwrap();

        let results = store.search("ghost", &[], None, 10).await.unwrap();
        assert!(results.is_empty());
    }
}
