//! Contract lifecycle scenarios: bidding, award strategies, delivery
//! authorization, validation, settlement, expiry, and execution overruns

mod common;

use agora::config::MeshConfig;
use agora::contracts::{ContractEngine, ContractError};
use agora::domain_types::{AgentId, ConfidenceValue, UserId, ValidationScore};
use agora::presence::{PresenceKey, PresenceRegistry};
use agora::reputation::ReputationEngine;
use agora::storage::contracts::Issuer;
use agora::storage::{AwardStrategyKind, ContractStatus, Store};
use agora::time_provider::MockTimeProvider;
use common::{TestAgent, register_agent};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    store: Store,
    engine: ContractEngine,
    presence: Arc<PresenceRegistry>,
    clock: Arc<MockTimeProvider>,
}

async fn harness() -> Harness {
    let database = agora::database::DatabaseConnection::in_memory()
        .await
        .unwrap();
    let store = Store::new(database);
    let clock = Arc::new(MockTimeProvider::new());
    let presence = Arc::new(PresenceRegistry::new());
    let reputation = ReputationEngine::new(store.clone(), clock.clone());
    let engine = ContractEngine::new(
        store.clone(),
        reputation,
        presence.clone(),
        MeshConfig::default(),
        clock.clone(),
    );
    Harness {
        store,
        engine,
        presence,
        clock,
    }
}

async fn bid(
    harness: &Harness,
    contract: agora::domain_types::ContractId,
    agent: AgentId,
    price: i64,
    eta: f64,
    confidence: f64,
) {
    harness
        .engine
        .submit_bid(
            contract,
            agent,
            Decimal::new(price, 0),
            eta,
            ConfidenceValue::try_new(confidence).unwrap(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn lowest_price_award_and_full_lifecycle() {
    let harness = harness().await;
    let issuer = Issuer::User(UserId::generate());

    let agent1 = register_agent(&harness.store, TestAgent::named("agent1")).await;
    let agent2 = register_agent(&harness.store, TestAgent::named("agent2")).await;
    let agent3 = register_agent(&harness.store, TestAgent::named("agent3")).await;

    let contract = harness
        .engine
        .create_contract(
            issuer.clone(),
            "flight_search",
            json!({"origin": "SFO"}),
            Decimal::new(10, 0),
            AwardStrategyKind::LowestPrice,
        )
        .await
        .unwrap();
    assert_eq!(contract.status, ContractStatus::Bidding);

    bid(&harness, contract.id, agent1, 8, 30.0, 0.9).await;
    bid(&harness, contract.id, agent2, 6, 45.0, 0.8).await;
    bid(&harness, contract.id, agent3, 9, 20.0, 0.7).await;

    // Watch the winner's stream for the award event.
    let (_stream, mut winner_rx) = harness.presence.connect(&PresenceKey::Agent(agent2));

    // Inside the bidding window the sweeper must not award.
    harness.engine.sweep_once().await.unwrap();
    assert_eq!(
        harness.engine.get_contract(contract.id).await.unwrap().status,
        ContractStatus::Bidding
    );

    harness.clock.advance(Duration::from_secs(4));
    harness.engine.sweep_once().await.unwrap();

    let awarded = harness.engine.get_contract(contract.id).await.unwrap();
    assert_eq!(awarded.status, ContractStatus::Awarded);
    assert_eq!(awarded.awarded_to, Some(agent2));

    let award_event = winner_rx.recv().await.unwrap();
    assert_eq!(award_event["type"], "contract_awarded");
    assert_eq!(award_event["price"], "6");

    // A losing bidder cannot deliver.
    let forbidden = harness
        .engine
        .deliver(contract.id, agent1, json!({"flights": []}))
        .await
        .unwrap_err();
    assert!(matches!(forbidden, ContractError::Forbidden { .. }));

    harness
        .engine
        .deliver(contract.id, agent2, json!({"flights": ["UA100"]}))
        .await
        .unwrap();
    assert_eq!(
        harness.engine.get_contract(contract.id).await.unwrap().status,
        ContractStatus::Delivered
    );

    let status = harness
        .engine
        .validate(
            contract.id,
            &issuer,
            ValidationScore::try_new(0.9).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(status, ContractStatus::Settled);

    let settled = harness.engine.get_contract(contract.id).await.unwrap();
    assert_eq!(settled.status, ContractStatus::Settled);
    assert!(settled.completed_at.is_some());

    let settle_event = winner_rx.recv().await.unwrap();
    assert_eq!(settle_event["type"], "contract_settled");

    // Settlement fed the reputation engine.
    let metrics = harness.store.reputation().metrics_for(agent2).await.unwrap();
    assert_eq!(metrics.len(), 1);
    assert!(metrics[0].success);
    assert!(
        harness
            .store
            .reputation()
            .get_snapshot(agent2)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn duplicate_bid_is_conflict() {
    let harness = harness().await;
    let agent = register_agent(&harness.store, TestAgent::named("bidder")).await;
    let contract = harness
        .engine
        .create_contract(
            Issuer::User(UserId::generate()),
            "task",
            json!({}),
            Decimal::new(5, 0),
            AwardStrategyKind::LowestPrice,
        )
        .await
        .unwrap();

    bid(&harness, contract.id, agent, 3, 10.0, 0.9).await;
    let second = harness
        .engine
        .submit_bid(
            contract.id,
            agent,
            Decimal::new(2, 0),
            10.0,
            ConfidenceValue::try_new(0.9).unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(second, ContractError::Conflict { .. }));
}

#[tokio::test]
async fn no_bids_before_expiry_cancels() {
    let harness = harness().await;
    let contract = harness
        .engine
        .create_contract(
            Issuer::User(UserId::generate()),
            "task",
            json!({}),
            Decimal::new(5, 0),
            AwardStrategyKind::ReputationWeighted,
        )
        .await
        .unwrap();

    // Past the window but before expiry: still bidding.
    harness.clock.advance(Duration::from_secs(10));
    harness.engine.sweep_once().await.unwrap();
    assert_eq!(
        harness.engine.get_contract(contract.id).await.unwrap().status,
        ContractStatus::Bidding
    );

    harness.clock.advance(Duration::from_secs(60));
    harness.engine.sweep_once().await.unwrap();
    assert_eq!(
        harness.engine.get_contract(contract.id).await.unwrap().status,
        ContractStatus::Cancelled
    );
}

#[tokio::test]
async fn execution_overrun_fails_contract_with_metric() {
    let harness = harness().await;
    let agent = register_agent(&harness.store, TestAgent::named("slow")).await;
    let contract = harness
        .engine
        .create_contract(
            Issuer::User(UserId::generate()),
            "task",
            json!({}),
            Decimal::new(5, 0),
            AwardStrategyKind::LowestPrice,
        )
        .await
        .unwrap();
    bid(&harness, contract.id, agent, 1, 5.0, 0.9).await;

    harness.clock.advance(Duration::from_secs(4));
    harness.engine.sweep_once().await.unwrap();
    assert_eq!(
        harness.engine.get_contract(contract.id).await.unwrap().status,
        ContractStatus::Awarded
    );

    // The winner never delivers within the execution window.
    harness.clock.advance(Duration::from_secs(301));
    harness.engine.sweep_once().await.unwrap();

    let failed = harness.engine.get_contract(contract.id).await.unwrap();
    assert_eq!(failed.status, ContractStatus::Failed);

    let metrics = harness.store.reputation().metrics_for(agent).await.unwrap();
    assert_eq!(metrics.len(), 1);
    assert!(!metrics[0].success);
}

#[tokio::test]
async fn validation_below_threshold_fails() {
    let harness = harness().await;
    let issuer = Issuer::User(UserId::generate());
    let agent = register_agent(&harness.store, TestAgent::named("sloppy")).await;
    let contract = harness
        .engine
        .create_contract(
            issuer.clone(),
            "task",
            json!({}),
            Decimal::new(5, 0),
            AwardStrategyKind::LowestPrice,
        )
        .await
        .unwrap();
    bid(&harness, contract.id, agent, 1, 5.0, 0.9).await;
    harness.clock.advance(Duration::from_secs(4));
    harness.engine.sweep_once().await.unwrap();
    harness
        .engine
        .deliver(contract.id, agent, json!({"junk": true}))
        .await
        .unwrap();

    let status = harness
        .engine
        .validate(contract.id, &issuer, ValidationScore::try_new(0.4).unwrap())
        .await
        .unwrap();
    assert_eq!(status, ContractStatus::Failed);
}

#[tokio::test]
async fn only_issuer_may_validate() {
    let harness = harness().await;
    let issuer = Issuer::User(UserId::generate());
    let agent = register_agent(&harness.store, TestAgent::named("worker")).await;
    let contract = harness
        .engine
        .create_contract(
            issuer,
            "task",
            json!({}),
            Decimal::new(5, 0),
            AwardStrategyKind::LowestPrice,
        )
        .await
        .unwrap();
    bid(&harness, contract.id, agent, 1, 5.0, 0.9).await;
    harness.clock.advance(Duration::from_secs(4));
    harness.engine.sweep_once().await.unwrap();
    harness
        .engine
        .deliver(contract.id, agent, json!({}))
        .await
        .unwrap();

    let impostor = Issuer::User(UserId::generate());
    let denied = harness
        .engine
        .validate(contract.id, &impostor, ValidationScore::try_new(0.9).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(denied, ContractError::Forbidden { .. }));
}

#[tokio::test]
async fn sweeper_is_noop_for_non_bidding_contracts() {
    let harness = harness().await;
    let agent = register_agent(&harness.store, TestAgent::named("winner")).await;
    let contract = harness
        .engine
        .create_contract(
            Issuer::User(UserId::generate()),
            "task",
            json!({}),
            Decimal::new(5, 0),
            AwardStrategyKind::LowestPrice,
        )
        .await
        .unwrap();
    bid(&harness, contract.id, agent, 1, 5.0, 0.9).await;
    harness.clock.advance(Duration::from_secs(4));
    harness.engine.sweep_once().await.unwrap();

    let awarded = harness.engine.get_contract(contract.id).await.unwrap();
    // Further sweeps leave the awarded contract untouched.
    harness.engine.sweep_once().await.unwrap();
    harness.engine.sweep_once().await.unwrap();
    let after = harness.engine.get_contract(contract.id).await.unwrap();
    assert_eq!(after.status, ContractStatus::Awarded);
    assert_eq!(after.awarded_to, awarded.awarded_to);
    assert_eq!(after.awarded_at, awarded.awarded_at);
}
