//! Contract lifecycle engine
//!
//! Contracts enter BIDDING on creation; a background sweeper awards them
//! once the bidding window elapses, cancels bid-less contracts at expiry,
//! and fails winners that overrun the execution window. Delivery is only
//! accepted from the awarded agent; validation settles or fails the
//! contract and feeds the reputation engine.

pub mod award;
pub mod sweeper;

pub use award::{ScoredBid, select_winner};
pub use sweeper::AwardSweeper;

use crate::config::MeshConfig;
use crate::database::DatabaseError;
use crate::domain_types::{AgentId, ConfidenceValue, ContractId, ValidationScore};
use crate::presence::PresenceRegistry;
use crate::reputation::ReputationEngine;
use crate::storage::contracts::Issuer;
use crate::storage::reputation::NewMetric;
use crate::storage::{
    AgentStatus, AwardStrategyKind, BidRecord, ContractRecord, ContractStatus, NewBid, NewContract,
    Store, UserPreferences,
};
use crate::time_provider::SharedTimeProvider;
use chrono::Duration as ChronoDuration;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Contract engine errors
#[derive(Debug, Error)]
pub enum ContractError {
    /// Contract does not exist
    #[error("Contract not found: {contract_id}")]
    NotFound {
        /// The missing contract
        contract_id: ContractId,
    },

    /// Caller is not allowed to perform the operation
    #[error("Forbidden: {reason}")]
    Forbidden {
        /// Why the caller was rejected
        reason: String,
    },

    /// Request is malformed or arrives in the wrong lifecycle state
    #[error("Bad request: {reason}")]
    BadRequest {
        /// Why the request was rejected
        reason: String,
    },

    /// Uniqueness violation (duplicate bid or delivery)
    #[error("Conflict: {reason}")]
    Conflict {
        /// What collided
        reason: String,
    },

    /// Storage failure
    #[error("Storage error: {source}")]
    Storage {
        /// Underlying database error
        #[from]
        source: DatabaseError,
    },
}

/// The contract lifecycle engine
#[derive(Clone)]
pub struct ContractEngine {
    store: Store,
    reputation: ReputationEngine,
    presence: Arc<PresenceRegistry>,
    config: MeshConfig,
    time: SharedTimeProvider,
}

impl ContractEngine {
    /// Builds the engine over the shared runtime services
    pub fn new(
        store: Store,
        reputation: ReputationEngine,
        presence: Arc<PresenceRegistry>,
        config: MeshConfig,
        time: SharedTimeProvider,
    ) -> Self {
        Self {
            store,
            reputation,
            presence,
            config,
            time,
        }
    }

    /// Posts a contract; it immediately starts accepting bids
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure
    pub async fn create_contract(
        &self,
        issuer: Issuer,
        intent: &str,
        context: serde_json::Value,
        reward_amount: Decimal,
        strategy: AwardStrategyKind,
    ) -> Result<ContractRecord, ContractError> {
        let now = self.time.now();
        let expires_at = now
            + ChronoDuration::milliseconds(self.config.no_bid_expiry.as_millis() as i64);
        let contract = self
            .store
            .contracts()
            .insert(
                NewContract {
                    issuer,
                    intent: intent.to_string(),
                    context,
                    reward_amount,
                    award_strategy: strategy,
                    expires_at: Some(expires_at),
                },
                now,
            )
            .await?;
        info!(contract = %contract.id, intent, "contract created");
        Ok(contract)
    }

    /// Fetches a contract
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown IDs
    pub async fn get_contract(&self, id: ContractId) -> Result<ContractRecord, ContractError> {
        self.store
            .contracts()
            .get(id)
            .await?
            .ok_or(ContractError::NotFound { contract_id: id })
    }

    /// Fetches the delivery recorded for a contract, if any
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure
    pub async fn delivery_for(
        &self,
        contract_id: ContractId,
    ) -> Result<Option<crate::storage::DeliveryRecord>, ContractError> {
        Ok(self.store.contracts().get_delivery(contract_id).await?)
    }

    /// Submits a bid on a BIDDING contract
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` outside the bidding phase, `Forbidden` for
    /// inactive bidders, and `Conflict` on a duplicate bid
    pub async fn submit_bid(
        &self,
        contract_id: ContractId,
        agent_id: AgentId,
        price: Decimal,
        eta_seconds: f64,
        confidence: ConfidenceValue,
    ) -> Result<BidRecord, ContractError> {
        let contract = self.get_contract(contract_id).await?;
        if contract.status != ContractStatus::Bidding {
            return Err(ContractError::BadRequest {
                reason: format!("contract is {}, not accepting bids", contract.status.as_str()),
            });
        }
        if eta_seconds <= 0.0 || !eta_seconds.is_finite() {
            return Err(ContractError::BadRequest {
                reason: "eta_seconds must be positive".to_string(),
            });
        }
        if price < Decimal::ZERO {
            return Err(ContractError::BadRequest {
                reason: "price must not be negative".to_string(),
            });
        }
        let bidder = self.store.agents().get(agent_id).await?;
        match bidder {
            Some(agent) if agent.status == AgentStatus::Active => {}
            Some(_) => {
                return Err(ContractError::Forbidden {
                    reason: "bidding agent is not active".to_string(),
                });
            }
            None => {
                return Err(ContractError::Forbidden {
                    reason: "bidding agent is not registered".to_string(),
                });
            }
        }

        let result = self
            .store
            .contracts()
            .insert_bid(
                NewBid {
                    contract_id,
                    agent_id,
                    price,
                    eta_seconds,
                    confidence,
                },
                self.time.now(),
            )
            .await;
        match result {
            Ok(bid) => {
                info!(contract = %contract_id, agent = %agent_id, %price, "bid submitted");
                Ok(bid)
            }
            Err(error) if error.is_unique_violation() => Err(ContractError::Conflict {
                reason: "agent already bid on this contract".to_string(),
            }),
            Err(error) => Err(error.into()),
        }
    }

    /// Awards a BIDDING contract using its configured strategy
    ///
    /// Returns the winner, or `None` when no bid qualifies or another
    /// writer already moved the contract out of BIDDING.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure
    pub async fn try_award(
        &self,
        contract: &ContractRecord,
    ) -> Result<Option<AgentId>, ContractError> {
        let bids = self.store.contracts().bids_for(contract.id).await?;
        if bids.is_empty() {
            return Ok(None);
        }

        let bidder_ids: Vec<AgentId> = bids.iter().map(|b| b.agent_id).collect();
        let bidders = self.store.agents().get_many(&bidder_ids).await?;
        let trust: HashMap<AgentId, f64> = bidders
            .iter()
            .map(|a| (a.id, a.trust_score.as_f64()))
            .collect();

        let scored: Vec<ScoredBid> = bids
            .into_iter()
            .map(|bid| {
                let trust = trust.get(&bid.agent_id).copied().unwrap_or(0.5);
                ScoredBid { bid, trust }
            })
            .collect();

        let preferences = match contract.issuer.user_id() {
            Some(user_id) => self.store.contracts().get_preferences(user_id).await?,
            None => UserPreferences::default(),
        };

        let Some(winner) = select_winner(contract.award_strategy, &scored, &preferences) else {
            warn!(contract = %contract.id, "no bid passed the award filters");
            return Ok(None);
        };
        let winner_id = winner.bid.agent_id;
        let winner_price = winner.bid.price;

        let now = self.time.now();
        if !self.store.contracts().award(contract.id, winner_id, now).await? {
            return Ok(None);
        }
        info!(contract = %contract.id, winner = %winner_id, price = %winner_price, "contract awarded");

        let event = json!({
            "type": "contract_awarded",
            "contract_id": contract.id.to_string(),
            "intent": contract.intent.clone(),
            "price": winner_price.to_string(),
            "timestamp": now.to_rfc3339(),
        });
        self.presence.send_to_agent(winner_id, &event);
        if let Some(user_id) = contract.issuer.user_id() {
            self.presence.send_to_user(user_id, &event);
        }
        Ok(Some(winner_id))
    }

    /// Accepts a delivery from the awarded agent
    ///
    /// The winner transitions AWARDED → IN_PROGRESS implicitly on its first
    /// delivery attempt, so the store guard covers both states.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` for non-awardees and `BadRequest` for contracts
    /// not awaiting delivery
    pub async fn deliver(
        &self,
        contract_id: ContractId,
        agent_id: AgentId,
        data: serde_json::Value,
    ) -> Result<(), ContractError> {
        let contract = self.get_contract(contract_id).await?;
        if contract.awarded_to != Some(agent_id) {
            return Err(ContractError::Forbidden {
                reason: "only the awarded agent may deliver".to_string(),
            });
        }

        let result = self
            .store
            .contracts()
            .deliver(contract_id, agent_id, data, self.time.now())
            .await;
        match result {
            Ok(true) => {
                info!(contract = %contract_id, agent = %agent_id, "result delivered");
                Ok(())
            }
            Ok(false) => Err(ContractError::BadRequest {
                reason: format!(
                    "contract is {}, not awaiting delivery",
                    contract.status.as_str()
                ),
            }),
            Err(error) if error.is_unique_violation() => Err(ContractError::Conflict {
                reason: "delivery already recorded for this contract".to_string(),
            }),
            Err(error) => Err(error.into()),
        }
    }

    /// Validates a delivered contract
    ///
    /// Scores at or above the configured threshold settle the contract and
    /// emit a settlement event plus a success metric; lower scores fail it
    /// with a failure metric. Only the issuer may validate.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` for non-issuers and `BadRequest` outside the
    /// DELIVERED state
    pub async fn validate(
        &self,
        contract_id: ContractId,
        caller: &Issuer,
        score: ValidationScore,
    ) -> Result<ContractStatus, ContractError> {
        let contract = self.get_contract(contract_id).await?;
        if &contract.issuer != caller {
            return Err(ContractError::Forbidden {
                reason: "only the issuer may validate".to_string(),
            });
        }
        if contract.status != ContractStatus::Delivered {
            return Err(ContractError::BadRequest {
                reason: format!("contract is {}, not delivered", contract.status.as_str()),
            });
        }
        let Some(winner) = contract.awarded_to else {
            return Err(ContractError::BadRequest {
                reason: "contract has no awarded agent".to_string(),
            });
        };

        if score.as_f64() < self.config.validation_threshold {
            self.fail_contract(&contract, false, Some(score)).await?;
            return Ok(ContractStatus::Failed);
        }

        self.store
            .contracts()
            .validate(contract_id, winner, score)
            .await?;
        let now = self.time.now();
        self.store.contracts().settle(contract_id, now).await?;
        info!(contract = %contract_id, winner = %winner, "contract settled");

        let (execution_time, promised_time) = self.execution_times(&contract, winner).await?;
        self.store
            .agents()
            .record_call(winner, true, execution_time * 1000.0, now)
            .await?;
        if let Err(error) = self
            .reputation
            .record_settlement(NewMetric {
                agent_id: winner,
                contract_id,
                execution_time,
                promised_time,
                success: true,
                user_rating: None,
            })
            .await
        {
            warn!(contract = %contract_id, %error, "settlement metric failed");
        }

        let event = json!({
            "type": "contract_settled",
            "contract_id": contract_id.to_string(),
            "amount": contract.reward_amount.to_string(),
            "validation_score": score.as_f64(),
            "timestamp": now.to_rfc3339(),
        });
        self.presence.send_to_agent(winner, &event);
        if let Some(user_id) = contract.issuer.user_id() {
            self.presence.send_to_user(user_id, &event);
        }
        Ok(ContractStatus::Settled)
    }

    /// One sweep pass: award matured contracts, cancel bid-less expired
    /// ones, fail execution-window overruns
    ///
    /// # Errors
    ///
    /// Returns an error only when listing contracts fails; per-contract
    /// failures are logged and skipped
    pub async fn sweep_once(&self) -> Result<(), ContractError> {
        let now = self.time.now();

        for contract in self
            .store
            .contracts()
            .list_by_status(ContractStatus::Bidding)
            .await?
        {
            let age = contract.age_seconds(now);
            if age < self.config.bidding_window.as_secs_f64() {
                continue;
            }
            let has_bids = !self.store.contracts().bids_for(contract.id).await?.is_empty();
            if has_bids {
                if let Err(error) = self.try_award(&contract).await {
                    warn!(contract = %contract.id, %error, "award attempt failed");
                }
            } else if contract.expires_at.is_some_and(|deadline| now >= deadline)
                && self.store.contracts().cancel_if_bidding(contract.id, now).await?
            {
                info!(contract = %contract.id, "cancelled: no bids before expiry");
            }
        }

        for status in [ContractStatus::Awarded, ContractStatus::InProgress] {
            for contract in self.store.contracts().list_by_status(status).await? {
                if contract.execution_overrun(now, self.config.max_execution_window) {
                    if let Err(error) = self.fail_contract(&contract, true, None).await {
                        warn!(contract = %contract.id, %error, "overrun handling failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// Fails a contract and records a failure metric for the winner
    async fn fail_contract(
        &self,
        contract: &ContractRecord,
        overrun: bool,
        score: Option<ValidationScore>,
    ) -> Result<(), ContractError> {
        let now = self.time.now();
        if !self.store.contracts().fail(contract.id, now).await? {
            return Ok(());
        }
        let reason = if overrun {
            "execution window elapsed"
        } else {
            "validation below threshold"
        };
        info!(contract = %contract.id, reason, "contract failed");

        if let Some(winner) = contract.awarded_to {
            let (execution_time, promised_time) = self.execution_times(contract, winner).await?;
            self.store
                .agents()
                .record_call(winner, false, execution_time * 1000.0, now)
                .await?;
            if let Err(error) = self
                .reputation
                .record_settlement(NewMetric {
                    agent_id: winner,
                    contract_id: contract.id,
                    execution_time,
                    promised_time,
                    success: false,
                    user_rating: None,
                })
                .await
            {
                warn!(contract = %contract.id, %error, "failure metric failed");
            }

            let event = json!({
                "type": "contract_failed",
                "contract_id": contract.id.to_string(),
                "reason": reason,
                "validation_score": score.map(|s| s.as_f64()),
                "timestamp": now.to_rfc3339(),
            });
            self.presence.send_to_agent(winner, &event);
            if let Some(user_id) = contract.issuer.user_id() {
                self.presence.send_to_user(user_id, &event);
            }
        }
        Ok(())
    }

    /// `(actual, promised)` execution seconds for a contract's winner
    async fn execution_times(
        &self,
        contract: &ContractRecord,
        winner: AgentId,
    ) -> Result<(f64, f64), ContractError> {
        let promised = self
            .store
            .contracts()
            .get_bid(contract.id, winner)
            .await?
            .map_or(0.0, |bid| bid.eta_seconds);
        let actual = match (
            contract.awarded_at,
            self.store.contracts().get_delivery(contract.id).await?,
        ) {
            (Some(awarded_at), Some(delivery)) => {
                (delivery.delivered_at - awarded_at).num_milliseconds() as f64 / 1000.0
            }
            (Some(awarded_at), None) => {
                (self.time.now() - awarded_at).num_milliseconds() as f64 / 1000.0
            }
            _ => 0.0,
        };
        Ok((actual.max(0.0), promised))
    }
}
