//! Node executors
//!
//! Two production dispatch paths: the messaging plane (send a request,
//! poll for the agent's response) and the contract market (post a
//! contract, wait for delivery). Both use an explicit polling budget with
//! cooperative yielding; an agent that never answers produces a
//! zero-confidence error result rather than wedging the plan.

use super::patterns::{NodeExecutor, NodeResult};
use crate::contracts::ContractEngine;
use crate::domain_types::AgentId;
use crate::messaging::{MessageRouter, Principal, SendRequest, SendStatus, SendTarget};
use crate::storage::contracts::Issuer;
use crate::storage::{AgentRecord, ContractStatus, MessageType, Store};
use crate::time_provider::SharedTimeProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::warn;

fn error_result(agent: &AgentRecord, detail: &str, started: DateTime<Utc>, now: DateTime<Utc>) -> NodeResult {
    NodeResult {
        agent_id: agent.id,
        agent_name: agent.name.to_string(),
        output: json!({"error": detail}),
        confidence: 0.0,
        quality: 0.0,
        duration_ms: (now - started).num_milliseconds(),
    }
}

fn result_from_payload(
    agent_id: AgentId,
    agent_name: &str,
    payload: &Value,
    started: DateTime<Utc>,
    now: DateTime<Utc>,
) -> NodeResult {
    NodeResult {
        agent_id,
        agent_name: agent_name.to_string(),
        output: payload.clone(),
        confidence: payload
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.8),
        quality: payload.get("quality").and_then(Value::as_f64).unwrap_or(1.0),
        duration_ms: (now - started).num_milliseconds(),
    }
}

/// Dispatches a node over the A2A messaging plane
///
/// Sends a `request` message from the conductor identity to the selected
/// agent and polls the conversation for the agent's `response`.
pub struct RoutedNodeExecutor {
    router: MessageRouter,
    store: Store,
    time: SharedTimeProvider,
    principal: Principal,
    conductor_id: AgentId,
    poll_budget: Duration,
    poll_interval: Duration,
}

impl RoutedNodeExecutor {
    /// Builds the executor around the conductor identity
    pub fn new(
        router: MessageRouter,
        store: Store,
        time: SharedTimeProvider,
        principal: Principal,
        conductor_id: AgentId,
        poll_budget: Duration,
    ) -> Self {
        Self {
            router,
            store,
            time,
            principal,
            conductor_id,
            poll_budget,
            poll_interval: Duration::from_millis(50),
        }
    }
}

#[async_trait]
impl NodeExecutor for RoutedNodeExecutor {
    async fn execute(&self, agent: &AgentRecord, task: &str, context: &Value) -> NodeResult {
        let started = self.time.now();
        let request = SendRequest {
            from_agent_id: self.conductor_id,
            target: SendTarget::Local(agent.id),
            conversation_id: None,
            message_type: MessageType::Request,
            content: json!({"task": task, "context": context}),
            requires_response: true,
            idempotency_key: None,
        };

        let outcome = match self.router.send(&self.principal, request).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(agent = %agent.id, %error, "node dispatch failed");
                return error_result(agent, &error.to_string(), started, self.time.now());
            }
        };
        if let SendStatus::Error(detail) = &outcome.status {
            return error_result(agent, detail, started, self.time.now());
        }

        let mut waited = Duration::ZERO;
        while waited < self.poll_budget {
            match self
                .store
                .messages()
                .find_response(outcome.conversation_id, agent.id, started)
                .await
            {
                Ok(Some(response)) => {
                    return result_from_payload(
                        agent.id,
                        &agent.name.to_string(),
                        &response.content,
                        started,
                        self.time.now(),
                    );
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(agent = %agent.id, %error, "response poll failed");
                }
            }
            self.time.sleep(self.poll_interval).await;
            waited += self.poll_interval;
        }
        error_result(agent, "no response within budget", started, self.time.now())
    }
}

/// Dispatches a node through the contract market
///
/// Posts a contract for the task and waits for the market to award,
/// execute, and deliver it; the delivery payload becomes the node result
/// and is validated with its self-reported confidence.
pub struct MarketNodeExecutor {
    engine: ContractEngine,
    time: SharedTimeProvider,
    issuer: Issuer,
    reward: Decimal,
    poll_budget: Duration,
    poll_interval: Duration,
}

impl MarketNodeExecutor {
    /// Builds the executor issuing contracts as `issuer`
    pub fn new(
        engine: ContractEngine,
        time: SharedTimeProvider,
        issuer: Issuer,
        reward: Decimal,
        poll_budget: Duration,
    ) -> Self {
        Self {
            engine,
            time,
            issuer,
            reward,
            poll_budget,
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[async_trait]
impl NodeExecutor for MarketNodeExecutor {
    async fn execute(&self, agent: &AgentRecord, task: &str, context: &Value) -> NodeResult {
        let started = self.time.now();
        let contract = match self
            .engine
            .create_contract(
                self.issuer.clone(),
                task,
                context.clone(),
                self.reward,
                crate::storage::AwardStrategyKind::ReputationWeighted,
            )
            .await
        {
            Ok(contract) => contract,
            Err(error) => {
                warn!(%error, "market dispatch failed");
                return error_result(agent, &error.to_string(), started, self.time.now());
            }
        };

        let mut waited = Duration::ZERO;
        while waited < self.poll_budget {
            match self.engine.get_contract(contract.id).await {
                Ok(current) if current.status == ContractStatus::Delivered => {
                    let Ok(Some(delivery)) =
                        self.engine.delivery_for(contract.id).await
                    else {
                        break;
                    };
                    let winner = current.awarded_to.unwrap_or(agent.id);
                    let result = result_from_payload(
                        winner,
                        &agent.name.to_string(),
                        &delivery.data,
                        started,
                        self.time.now(),
                    );
                    let score = crate::domain_types::ValidationScore::clamped(result.confidence);
                    if let Err(error) = self.engine.validate(contract.id, &self.issuer, score).await
                    {
                        warn!(contract = %contract.id, %error, "market validation failed");
                    }
                    return result;
                }
                Ok(current)
                    if matches!(
                        current.status,
                        ContractStatus::Failed | ContractStatus::Cancelled
                    ) =>
                {
                    return error_result(
                        agent,
                        &format!("contract {}", current.status.as_str()),
                        started,
                        self.time.now(),
                    );
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(contract = %contract.id, %error, "contract poll failed");
                }
            }
            self.time.sleep(self.poll_interval).await;
            waited += self.poll_interval;
        }
        error_result(agent, "no delivery within budget", started, self.time.now())
    }
}
