//! Contract, bid, delivery, and preference persistence
//!
//! Contract status transitions are guarded in SQL (`WHERE status = ...`) so
//! concurrent writers serialize on the row: the first transition wins and
//! later ones observe zero affected rows. Unique constraints keep one bid
//! per `(contract, agent)` and one delivery per `(contract, agent)`.

use crate::database::{DatabaseConnection, DatabaseResult, StorageError, StorageResult};
use crate::domain_types::{
    AgentId, BidId, ConfidenceValue, ContractId, DeliveryId, UserId, ValidationScore,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::str::FromStr;

/// Lifecycle status of a contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractStatus {
    /// Created but not yet open for bids
    Open,
    /// Accepting bids
    Bidding,
    /// Awarded to a winner
    Awarded,
    /// Winner has started execution
    InProgress,
    /// Winner delivered a result
    Delivered,
    /// Issuer validated the delivery
    Validated,
    /// Reward released; terminal success
    Settled,
    /// Terminal failure (validation rejected or execution window overrun)
    Failed,
    /// Terminal cancellation (no bids before expiry)
    Cancelled,
}

impl ContractStatus {
    /// Database representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Bidding => "bidding",
            Self::Awarded => "awarded",
            Self::InProgress => "in_progress",
            Self::Delivered => "delivered",
            Self::Validated => "validated",
            Self::Settled => "settled",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses the database representation
    ///
    /// # Errors
    ///
    /// Returns an error for unknown status strings
    pub fn parse(value: &str) -> StorageResult<Self> {
        match value {
            "open" => Ok(Self::Open),
            "bidding" => Ok(Self::Bidding),
            "awarded" => Ok(Self::Awarded),
            "in_progress" => Ok(Self::InProgress),
            "delivered" => Ok(Self::Delivered),
            "validated" => Ok(Self::Validated),
            "settled" => Ok(Self::Settled),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(StorageError::Decode {
                column: "status".to_string(),
                message: format!("unknown contract status: {other}"),
            }),
        }
    }
}

/// Award strategy selected at contract creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AwardStrategyKind {
    /// Minimum price; ties by confidence then trust
    LowestPrice,
    /// Minimum ETA; ties by confidence then trust
    Fastest,
    /// Maximum trust; ties by lowest price
    HighestTrust,
    /// Weighted blend of price, confidence, speed, and reputation
    #[default]
    ReputationWeighted,
}

impl AwardStrategyKind {
    /// Database representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LowestPrice => "lowest_price",
            Self::Fastest => "fastest",
            Self::HighestTrust => "highest_trust",
            Self::ReputationWeighted => "reputation_weighted",
        }
    }

    /// Parses a wire or database string; unknown strategies fall back to
    /// `reputation_weighted`
    #[must_use]
    pub fn parse_lossy(value: &str) -> Self {
        match value {
            "lowest_price" => Self::LowestPrice,
            "fastest" => Self::Fastest,
            "highest_trust" => Self::HighestTrust,
            _ => Self::ReputationWeighted,
        }
    }
}

/// Issuer of a contract: a user or another agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issuer {
    /// A human principal
    User(UserId),
    /// An agent acting on its own behalf
    Agent(AgentId),
}

impl Issuer {
    /// Database representation (`user:<uuid>` / `agent:<uuid>`)
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::User(id) => format!("user:{id}"),
            Self::Agent(id) => format!("agent:{id}"),
        }
    }

    /// Parses the database representation
    ///
    /// # Errors
    ///
    /// Returns an error for malformed values
    pub fn decode(value: &str) -> StorageResult<Self> {
        let err = || StorageError::Decode {
            column: "issuer".to_string(),
            message: format!("malformed issuer: {value}"),
        };
        let (kind, id) = value.split_once(':').ok_or_else(err)?;
        match kind {
            "user" => UserId::parse(id).map(Self::User).map_err(|_| err()),
            "agent" => AgentId::parse(id).map(Self::Agent).map_err(|_| err()),
            _ => Err(err()),
        }
    }

    /// The user behind the issuer, if any
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(*id),
            Self::Agent(_) => None,
        }
    }
}

/// A persisted contract
#[derive(Debug, Clone)]
pub struct ContractRecord {
    /// Primary key
    pub id: ContractId,
    /// Who posted the work
    pub issuer: Issuer,
    /// What the issuer wants done
    pub intent: String,
    /// Structured task context
    pub context: serde_json::Value,
    /// Reward released on settlement
    pub reward_amount: Decimal,
    /// Lifecycle status
    pub status: ContractStatus,
    /// Strategy the sweeper applies at award time
    pub award_strategy: AwardStrategyKind,
    /// Winning agent once awarded
    pub awarded_to: Option<AgentId>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Award time
    pub awarded_at: Option<DateTime<Utc>>,
    /// Settlement or failure time
    pub completed_at: Option<DateTime<Utc>>,
    /// Bid-less cancellation deadline
    pub expires_at: Option<DateTime<Utc>>,
}

impl ContractRecord {
    /// Seconds since creation at `now`
    #[must_use]
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_milliseconds() as f64 / 1000.0
    }

    /// Whether the execution window has elapsed without delivery
    #[must_use]
    pub fn execution_overrun(&self, now: DateTime<Utc>, window: std::time::Duration) -> bool {
        match self.awarded_at {
            Some(awarded_at) => {
                now - awarded_at > Duration::milliseconds(window.as_millis() as i64)
            }
            None => false,
        }
    }
}

/// Fields required to post a contract
#[derive(Debug, Clone)]
pub struct NewContract {
    /// Who posted the work
    pub issuer: Issuer,
    /// What the issuer wants done
    pub intent: String,
    /// Structured task context
    pub context: serde_json::Value,
    /// Reward released on settlement
    pub reward_amount: Decimal,
    /// Strategy the sweeper applies at award time
    pub award_strategy: AwardStrategyKind,
    /// Bid-less cancellation deadline
    pub expires_at: Option<DateTime<Utc>>,
}

/// A persisted bid
#[derive(Debug, Clone)]
pub struct BidRecord {
    /// Primary key
    pub id: BidId,
    /// Contract the bid targets
    pub contract_id: ContractId,
    /// Bidding agent
    pub agent_id: AgentId,
    /// Asking price
    pub price: Decimal,
    /// Promised completion time
    pub eta_seconds: f64,
    /// Bidder self-assessed confidence
    pub confidence: ConfidenceValue,
    /// Row creation time
    pub created_at: DateTime<Utc>,
}

/// Fields required to submit a bid
#[derive(Debug, Clone)]
pub struct NewBid {
    /// Contract the bid targets
    pub contract_id: ContractId,
    /// Bidding agent
    pub agent_id: AgentId,
    /// Asking price
    pub price: Decimal,
    /// Promised completion time
    pub eta_seconds: f64,
    /// Bidder self-assessed confidence
    pub confidence: ConfidenceValue,
}

/// A persisted delivery
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    /// Primary key
    pub id: DeliveryId,
    /// Contract the delivery fulfils
    pub contract_id: ContractId,
    /// Delivering agent
    pub agent_id: AgentId,
    /// Result payload
    pub data: serde_json::Value,
    /// Delivery time
    pub delivered_at: DateTime<Utc>,
    /// Whether the issuer validated it
    pub is_validated: bool,
    /// Issuer-assigned score once validated
    pub validation_score: Option<ValidationScore>,
}

/// Issuer award preferences: weight vector plus hard filters
#[derive(Debug, Clone)]
pub struct UserPreferences {
    /// Weight on low price
    pub price_weight: f64,
    /// Weight on bid confidence
    pub performance_weight: f64,
    /// Weight on fast ETA
    pub speed_weight: f64,
    /// Weight on trust score
    pub reputation_weight: f64,
    /// Hard cap on price
    pub max_price: Option<Decimal>,
    /// Hard floor on confidence
    pub min_confidence: f64,
    /// Hard cap on ETA seconds
    pub max_latency: Option<f64>,
    /// Hard floor on trust score
    pub min_reputation: f64,
    /// Only zero-price bids qualify
    pub free_only: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            price_weight: 0.25,
            performance_weight: 0.25,
            speed_weight: 0.25,
            reputation_weight: 0.25,
            max_price: None,
            min_confidence: 0.0,
            max_latency: None,
            min_reputation: 0.0,
            free_only: false,
        }
    }
}

mod sql {
    pub(super) const INSERT_CONTRACT: &str = "INSERT INTO contracts
        (id, issuer, intent, context, reward_amount, status, award_strategy,
         created_at, expires_at)
        VALUES (?, ?, ?, ?, ?, 'bidding', ?, ?, ?)";

    pub(super) const SELECT_CONTRACT: &str = "SELECT * FROM contracts WHERE id = ?";

    pub(super) const SELECT_BY_STATUS: &str =
        "SELECT * FROM contracts WHERE status = ? ORDER BY created_at ASC";

    pub(super) const AWARD: &str = "UPDATE contracts
        SET status = 'awarded', awarded_to = ?, awarded_at = ?
        WHERE id = ? AND status = 'bidding'";

    pub(super) const CANCEL_IF_BIDDING: &str =
        "UPDATE contracts SET status = 'cancelled', completed_at = ?
        WHERE id = ? AND status = 'bidding'";

    pub(super) const DELIVER_TRANSITION: &str = "UPDATE contracts SET status = 'delivered'
        WHERE id = ? AND awarded_to = ? AND status IN ('awarded', 'in_progress')";

    pub(super) const SET_VALIDATED: &str = "UPDATE contracts SET status = 'validated'
        WHERE id = ? AND status = 'delivered'";

    pub(super) const SET_SETTLED: &str =
        "UPDATE contracts SET status = 'settled', completed_at = ?
        WHERE id = ? AND status = 'validated'";

    pub(super) const SET_FAILED: &str =
        "UPDATE contracts SET status = 'failed', completed_at = ?
        WHERE id = ? AND status IN ('awarded', 'in_progress', 'delivered')";

    pub(super) const INSERT_BID: &str = "INSERT INTO bids
        (id, contract_id, agent_id, price, eta_seconds, confidence, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)";

    pub(super) const SELECT_BIDS: &str =
        "SELECT * FROM bids WHERE contract_id = ? ORDER BY created_at ASC";

    pub(super) const SELECT_BID: &str =
        "SELECT * FROM bids WHERE contract_id = ? AND agent_id = ?";

    pub(super) const INSERT_DELIVERY: &str = "INSERT INTO deliveries
        (id, contract_id, agent_id, data, delivered_at) VALUES (?, ?, ?, ?, ?)";

    pub(super) const SELECT_DELIVERY: &str = "SELECT * FROM deliveries WHERE contract_id = ?";

    pub(super) const VALIDATE_DELIVERY: &str = "UPDATE deliveries
        SET is_validated = 1, validation_score = ? WHERE contract_id = ? AND agent_id = ?";

    pub(super) const SELECT_VALIDATED_FOR_AGENT: &str = "SELECT * FROM deliveries
        WHERE agent_id = ? AND is_validated = 1";

    pub(super) const SELECT_HONESTY_ROWS: &str = "SELECT b.confidence, d.validation_score
        FROM deliveries d JOIN bids b ON b.contract_id = d.contract_id AND b.agent_id = d.agent_id
        WHERE d.agent_id = ? AND d.is_validated = 1 AND d.validation_score IS NOT NULL";

    pub(super) const UPSERT_PREFERENCES: &str = "INSERT INTO user_preferences
        (user_id, price_weight, performance_weight, speed_weight, reputation_weight,
         max_price, min_confidence, max_latency, min_reputation, free_only, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (user_id) DO UPDATE SET
            price_weight = excluded.price_weight,
            performance_weight = excluded.performance_weight,
            speed_weight = excluded.speed_weight,
            reputation_weight = excluded.reputation_weight,
            max_price = excluded.max_price,
            min_confidence = excluded.min_confidence,
            max_latency = excluded.max_latency,
            min_reputation = excluded.min_reputation,
            free_only = excluded.free_only,
            updated_at = excluded.updated_at";

    pub(super) const SELECT_PREFERENCES: &str =
        "SELECT * FROM user_preferences WHERE user_id = ?";
}

mod mapping {
    use super::{
        AgentId, AwardStrategyKind, BidId, BidRecord, ConfidenceValue, ContractId, ContractRecord,
        ContractStatus, Decimal, DeliveryId, DeliveryRecord, FromStr, Issuer, Row, SqliteRow,
        StorageError, StorageResult, UserPreferences, ValidationScore,
    };

    pub(super) fn decimal_to_string(value: Decimal) -> String {
        value.to_string()
    }

    pub(super) fn parse_decimal(column: &str, raw: &str) -> StorageResult<Decimal> {
        Decimal::from_str(raw).map_err(|e| StorageError::Decode {
            column: column.to_string(),
            message: e.to_string(),
        })
    }

    fn decode<T>(column: &str, result: Result<T, impl ToString>) -> StorageResult<T> {
        result.map_err(|e| StorageError::Decode {
            column: column.to_string(),
            message: e.to_string(),
        })
    }

    pub(super) fn row_to_contract(row: &SqliteRow) -> StorageResult<ContractRecord> {
        let id: String = row.get("id");
        let issuer: String = row.get("issuer");
        let context: String = row.get("context");
        let reward: String = row.get("reward_amount");
        let status: String = row.get("status");
        let strategy: String = row.get("award_strategy");
        let awarded_to: Option<String> = row.get("awarded_to");

        Ok(ContractRecord {
            id: decode("id", ContractId::parse(&id))?,
            issuer: Issuer::decode(&issuer)?,
            intent: row.get("intent"),
            context: serde_json::from_str(&context).unwrap_or(serde_json::Value::Null),
            reward_amount: parse_decimal("reward_amount", &reward)?,
            status: ContractStatus::parse(&status)?,
            award_strategy: AwardStrategyKind::parse_lossy(&strategy),
            awarded_to: awarded_to
                .map(|v| decode("awarded_to", AgentId::parse(&v)))
                .transpose()?,
            created_at: row.get("created_at"),
            awarded_at: row.get("awarded_at"),
            completed_at: row.get("completed_at"),
            expires_at: row.get("expires_at"),
        })
    }

    pub(super) fn row_to_bid(row: &SqliteRow) -> StorageResult<BidRecord> {
        let id: String = row.get("id");
        let contract: String = row.get("contract_id");
        let agent: String = row.get("agent_id");
        let price: String = row.get("price");
        let confidence: f64 = row.get("confidence");

        Ok(BidRecord {
            id: decode("id", uuid::Uuid::parse_str(&id).map(BidId::new))?,
            contract_id: decode("contract_id", ContractId::parse(&contract))?,
            agent_id: decode("agent_id", AgentId::parse(&agent))?,
            price: parse_decimal("price", &price)?,
            eta_seconds: row.get("eta_seconds"),
            confidence: decode("confidence", ConfidenceValue::try_new(confidence))?,
            created_at: row.get("created_at"),
        })
    }

    pub(super) fn row_to_delivery(row: &SqliteRow) -> StorageResult<DeliveryRecord> {
        let id: String = row.get("id");
        let contract: String = row.get("contract_id");
        let agent: String = row.get("agent_id");
        let data: String = row.get("data");
        let score: Option<f64> = row.get("validation_score");

        Ok(DeliveryRecord {
            id: decode("id", uuid::Uuid::parse_str(&id).map(DeliveryId::new))?,
            contract_id: decode("contract_id", ContractId::parse(&contract))?,
            agent_id: decode("agent_id", AgentId::parse(&agent))?,
            data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
            delivered_at: row.get("delivered_at"),
            is_validated: row.get("is_validated"),
            validation_score: score
                .map(|v| decode("validation_score", ValidationScore::try_new(v)))
                .transpose()?,
        })
    }

    pub(super) fn row_to_preferences(row: &SqliteRow) -> StorageResult<UserPreferences> {
        let max_price: Option<String> = row.get("max_price");
        Ok(UserPreferences {
            price_weight: row.get("price_weight"),
            performance_weight: row.get("performance_weight"),
            speed_weight: row.get("speed_weight"),
            reputation_weight: row.get("reputation_weight"),
            max_price: max_price
                .map(|v| parse_decimal("max_price", &v))
                .transpose()?,
            min_confidence: row.get("min_confidence"),
            max_latency: row.get("max_latency"),
            min_reputation: row.get("min_reputation"),
            free_only: row.get("free_only"),
        })
    }
}

/// Store for contracts, bids, deliveries, and award preferences
#[derive(Clone, Debug)]
pub struct ContractStore {
    connection: DatabaseConnection,
}

impl ContractStore {
    /// Creates the store over a shared connection
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Posts a contract; it enters BIDDING immediately
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn insert(
        &self,
        new: NewContract,
        now: DateTime<Utc>,
    ) -> DatabaseResult<ContractRecord> {
        let id = ContractId::generate();
        sqlx::query(sql::INSERT_CONTRACT)
            .bind(id.to_string())
            .bind(new.issuer.encode())
            .bind(&new.intent)
            .bind(new.context.to_string())
            .bind(mapping::decimal_to_string(new.reward_amount))
            .bind(new.award_strategy.as_str())
            .bind(now)
            .bind(new.expires_at)
            .execute(self.connection.pool())
            .await?;
        Ok(ContractRecord {
            id,
            issuer: new.issuer,
            intent: new.intent,
            context: new.context,
            reward_amount: new.reward_amount,
            status: ContractStatus::Bidding,
            award_strategy: new.award_strategy,
            awarded_to: None,
            created_at: now,
            awarded_at: None,
            completed_at: None,
            expires_at: new.expires_at,
        })
    }

    /// Fetches a contract by ID
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn get(&self, id: ContractId) -> DatabaseResult<Option<ContractRecord>> {
        let row = sqlx::query(sql::SELECT_CONTRACT)
            .bind(id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| mapping::row_to_contract(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Lists contracts in a given status, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn list_by_status(
        &self,
        status: ContractStatus,
    ) -> DatabaseResult<Vec<ContractRecord>> {
        let rows = sqlx::query(sql::SELECT_BY_STATUS)
            .bind(status.as_str())
            .fetch_all(self.connection.pool())
            .await?;
        rows.iter()
            .map(|r| mapping::row_to_contract(r).map_err(Into::into))
            .collect()
    }

    /// Awards a contract to a winner
    ///
    /// Guarded on `status = 'bidding'`: returns false when another writer
    /// already moved the contract, which makes the sweeper a no-op for
    /// anything not in BIDDING.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn award(
        &self,
        id: ContractId,
        winner: AgentId,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let result = sqlx::query(sql::AWARD)
            .bind(winner.to_string())
            .bind(now)
            .bind(id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Cancels a contract still in BIDDING; returns whether it transitioned
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn cancel_if_bidding(
        &self,
        id: ContractId,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let result = sqlx::query(sql::CANCEL_IF_BIDDING)
            .bind(now)
            .bind(id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Records a delivery and transitions the contract to DELIVERED
    ///
    /// Only the awarded agent can deliver; the transition covers both
    /// AWARDED (implicit start) and IN_PROGRESS. Returns false when the
    /// guard rejects the writer.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate delivery or database failure
    pub async fn deliver(
        &self,
        contract_id: ContractId,
        agent_id: AgentId,
        data: serde_json::Value,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let mut tx = self.connection.pool().begin().await?;
        let result = sqlx::query(sql::DELIVER_TRANSITION)
            .bind(contract_id.to_string())
            .bind(agent_id.to_string())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query(sql::INSERT_DELIVERY)
            .bind(DeliveryId::generate().to_string())
            .bind(contract_id.to_string())
            .bind(agent_id.to_string())
            .bind(data.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Marks the delivery validated and the contract VALIDATED
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn validate(
        &self,
        contract_id: ContractId,
        agent_id: AgentId,
        score: ValidationScore,
    ) -> DatabaseResult<bool> {
        let mut tx = self.connection.pool().begin().await?;
        let result = sqlx::query(sql::SET_VALIDATED)
            .bind(contract_id.to_string())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query(sql::VALIDATE_DELIVERY)
            .bind(score.as_f64())
            .bind(contract_id.to_string())
            .bind(agent_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Settles a VALIDATED contract; returns whether it transitioned
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn settle(&self, id: ContractId, now: DateTime<Utc>) -> DatabaseResult<bool> {
        let result = sqlx::query(sql::SET_SETTLED)
            .bind(now)
            .bind(id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fails an awarded, in-progress, or delivered contract
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn fail(&self, id: ContractId, now: DateTime<Utc>) -> DatabaseResult<bool> {
        let result = sqlx::query(sql::SET_FAILED)
            .bind(now)
            .bind(id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Submits a bid
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate `(contract, agent)` bid or database
    /// failure
    pub async fn insert_bid(&self, new: NewBid, now: DateTime<Utc>) -> DatabaseResult<BidRecord> {
        let id = BidId::generate();
        sqlx::query(sql::INSERT_BID)
            .bind(id.to_string())
            .bind(new.contract_id.to_string())
            .bind(new.agent_id.to_string())
            .bind(mapping::decimal_to_string(new.price))
            .bind(new.eta_seconds)
            .bind(new.confidence.as_f64())
            .bind(now)
            .execute(self.connection.pool())
            .await?;
        Ok(BidRecord {
            id,
            contract_id: new.contract_id,
            agent_id: new.agent_id,
            price: new.price,
            eta_seconds: new.eta_seconds,
            confidence: new.confidence,
            created_at: now,
        })
    }

    /// Lists all bids on a contract, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn bids_for(&self, contract_id: ContractId) -> DatabaseResult<Vec<BidRecord>> {
        let rows = sqlx::query(sql::SELECT_BIDS)
            .bind(contract_id.to_string())
            .fetch_all(self.connection.pool())
            .await?;
        rows.iter()
            .map(|r| mapping::row_to_bid(r).map_err(Into::into))
            .collect()
    }

    /// Fetches a single agent's bid on a contract
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn get_bid(
        &self,
        contract_id: ContractId,
        agent_id: AgentId,
    ) -> DatabaseResult<Option<BidRecord>> {
        let row = sqlx::query(sql::SELECT_BID)
            .bind(contract_id.to_string())
            .bind(agent_id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| mapping::row_to_bid(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Fetches the delivery for a contract, if any
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn get_delivery(
        &self,
        contract_id: ContractId,
    ) -> DatabaseResult<Option<DeliveryRecord>> {
        let row = sqlx::query(sql::SELECT_DELIVERY)
            .bind(contract_id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| mapping::row_to_delivery(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// All validated deliveries by an agent, for reputation scoring
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn validated_deliveries_for(
        &self,
        agent_id: AgentId,
    ) -> DatabaseResult<Vec<DeliveryRecord>> {
        let rows = sqlx::query(sql::SELECT_VALIDATED_FOR_AGENT)
            .bind(agent_id.to_string())
            .fetch_all(self.connection.pool())
            .await?;
        rows.iter()
            .map(|r| mapping::row_to_delivery(r).map_err(Into::into))
            .collect()
    }

    /// `(bid confidence, validation score)` pairs for honesty scoring
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn honesty_rows(&self, agent_id: AgentId) -> DatabaseResult<Vec<(f64, f64)>> {
        let rows = sqlx::query(sql::SELECT_HONESTY_ROWS)
            .bind(agent_id.to_string())
            .fetch_all(self.connection.pool())
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get("confidence"), r.get("validation_score")))
            .collect())
    }

    /// Stores (or replaces) a user's award preferences
    ///
    /// # Errors
    ///
    /// Returns an error on database failure
    pub async fn set_preferences(
        &self,
        user_id: UserId,
        preferences: &UserPreferences,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(sql::UPSERT_PREFERENCES)
            .bind(user_id.to_string())
            .bind(preferences.price_weight)
            .bind(preferences.performance_weight)
            .bind(preferences.speed_weight)
            .bind(preferences.reputation_weight)
            .bind(preferences.max_price.map(mapping::decimal_to_string))
            .bind(preferences.min_confidence)
            .bind(preferences.max_latency)
            .bind(preferences.min_reputation)
            .bind(preferences.free_only)
            .bind(now)
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// Fetches a user's award preferences; absent rows yield the defaults
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or undecodable rows
    pub async fn get_preferences(&self, user_id: UserId) -> DatabaseResult<UserPreferences> {
        let row = sqlx::query(sql::SELECT_PREFERENCES)
            .bind(user_id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        match row {
            Some(row) => mapping::row_to_preferences(&row).map_err(Into::into),
            None => Ok(UserPreferences::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseConnection;
    use rust_decimal::Decimal;

    fn new_contract() -> NewContract {
        NewContract {
            issuer: Issuer::User(UserId::generate()),
            intent: "flight_search".to_string(),
            context: serde_json::json!({"origin": "SFO"}),
            reward_amount: Decimal::new(10, 0),
            award_strategy: AwardStrategyKind::LowestPrice,
            expires_at: None,
        }
    }

    fn bid(contract_id: ContractId, agent_id: AgentId, price: i64) -> NewBid {
        NewBid {
            contract_id,
            agent_id,
            price: Decimal::new(price, 0),
            eta_seconds: 30.0,
            confidence: ConfidenceValue::try_new(0.9).unwrap(),
        }
    }

    #[tokio::test]
    async fn contract_enters_bidding_on_creation() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        let store = ContractStore::new(db);
        let contract = store.insert(new_contract(), Utc::now()).await.unwrap();
        let fetched = store.get(contract.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ContractStatus::Bidding);
        assert_eq!(fetched.reward_amount, Decimal::new(10, 0));
    }

    #[tokio::test]
    async fn duplicate_bid_is_rejected() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        let store = ContractStore::new(db);
        let contract = store.insert(new_contract(), Utc::now()).await.unwrap();
        let agent = AgentId::generate();

        store
            .insert_bid(bid(contract.id, agent, 8), Utc::now())
            .await
            .unwrap();
        assert!(
            store
                .insert_bid(bid(contract.id, agent, 6), Utc::now())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn award_is_at_most_once() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        let store = ContractStore::new(db);
        let contract = store.insert(new_contract(), Utc::now()).await.unwrap();
        let winner = AgentId::generate();

        assert!(store.award(contract.id, winner, Utc::now()).await.unwrap());
        // Second award attempt observes the contract out of BIDDING.
        assert!(
            !store
                .award(contract.id, AgentId::generate(), Utc::now())
                .await
                .unwrap()
        );

        let fetched = store.get(contract.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ContractStatus::Awarded);
        assert_eq!(fetched.awarded_to, Some(winner));
    }

    #[tokio::test]
    async fn only_awardee_can_deliver() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        let store = ContractStore::new(db);
        let contract = store.insert(new_contract(), Utc::now()).await.unwrap();
        let winner = AgentId::generate();
        let impostor = AgentId::generate();
        store.award(contract.id, winner, Utc::now()).await.unwrap();

        assert!(
            !store
                .deliver(contract.id, impostor, serde_json::json!({}), Utc::now())
                .await
                .unwrap()
        );
        assert!(
            store
                .deliver(contract.id, winner, serde_json::json!({"ok": true}), Utc::now())
                .await
                .unwrap()
        );
        // Once DELIVERED the guard rejects any further delivery.
        assert!(
            !store
                .deliver(contract.id, winner, serde_json::json!({}), Utc::now())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn full_lifecycle_to_settled() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        let store = ContractStore::new(db);
        let contract = store.insert(new_contract(), Utc::now()).await.unwrap();
        let winner = AgentId::generate();

        store.award(contract.id, winner, Utc::now()).await.unwrap();
        store
            .deliver(contract.id, winner, serde_json::json!({}), Utc::now())
            .await
            .unwrap();
        assert!(
            store
                .validate(contract.id, winner, ValidationScore::try_new(0.9).unwrap())
                .await
                .unwrap()
        );
        assert!(store.settle(contract.id, Utc::now()).await.unwrap());

        let fetched = store.get(contract.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ContractStatus::Settled);
        assert!(fetched.completed_at.is_some());

        let delivery = store.get_delivery(contract.id).await.unwrap().unwrap();
        assert!(delivery.is_validated);
        assert_eq!(delivery.validation_score.unwrap().as_f64(), 0.9);
    }

    #[tokio::test]
    async fn preferences_default_to_balanced_weights() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        let store = ContractStore::new(db);
        let prefs = store.get_preferences(UserId::generate()).await.unwrap();
        assert_eq!(prefs.price_weight, 0.25);
        assert_eq!(prefs.reputation_weight, 0.25);
        assert!(prefs.max_price.is_none());
        assert!(!prefs.free_only);
    }
}
