//! Reputation scenarios: a consistently good agent climbs well above the
//! neutral default, and snapshots track contract statistics

mod common;

use agora::config::MeshConfig;
use agora::contracts::ContractEngine;
use agora::domain_types::{ConfidenceValue, UserId, ValidationScore};
use agora::presence::PresenceRegistry;
use agora::reputation::ReputationEngine;
use agora::storage::contracts::Issuer;
use agora::storage::{AwardStrategyKind, Store, TrustGrade};
use agora::time_provider::MockTimeProvider;
use common::{TestAgent, register_agent};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;

async fn setup() -> (Store, ContractEngine, ReputationEngine) {
    let database = agora::database::DatabaseConnection::in_memory()
        .await
        .unwrap();
    let store = Store::new(database);
    let clock = Arc::new(MockTimeProvider::new());
    let reputation = ReputationEngine::new(store.clone(), clock.clone());
    let engine = ContractEngine::new(
        store.clone(),
        reputation.clone(),
        Arc::new(PresenceRegistry::new()),
        MeshConfig::default(),
        clock,
    );
    (store, engine, reputation)
}

#[tokio::test]
async fn hundred_clean_settlements_raise_composite_above_085() {
    let (store, engine, reputation) = setup().await;
    let issuer = Issuer::User(UserId::generate());
    let agent = register_agent(&store, TestAgent::named("dependable")).await;

    assert!(
        (reputation.trust_score(agent).await.unwrap().as_f64() - 0.5).abs() < 1e-9,
        "fresh agents start at the neutral default"
    );

    for i in 0..100 {
        let contract = engine
            .create_contract(
                issuer.clone(),
                &format!("job-{i}"),
                json!({}),
                Decimal::new(5, 0),
                AwardStrategyKind::LowestPrice,
            )
            .await
            .unwrap();
        engine
            .submit_bid(
                contract.id,
                agent,
                Decimal::new(1, 0),
                10.0,
                ConfidenceValue::try_new(0.9).unwrap(),
            )
            .await
            .unwrap();
        engine.try_award(&contract).await.unwrap();
        engine
            .deliver(contract.id, agent, json!({"result": i}))
            .await
            .unwrap();
        engine
            .validate(contract.id, &issuer, ValidationScore::try_new(0.9).unwrap())
            .await
            .unwrap();
    }

    let snapshot = store.reputation().get_snapshot(agent).await.unwrap().unwrap();
    assert!(
        snapshot.trust_score.as_f64() > 0.85,
        "composite was {}",
        snapshot.trust_score.as_f64()
    );
    assert!(
        snapshot.trust_grade <= TrustGrade::B,
        "grade was {}",
        snapshot.trust_grade.as_str()
    );
    assert_eq!(snapshot.total_contracts, 100);
    assert_eq!(snapshot.successful_contracts, 100);
    assert_eq!(snapshot.failed_contracts, 0);

    // The denormalized agent-row score follows the snapshot.
    let row = store.agents().get(agent).await.unwrap().unwrap();
    assert!((row.trust_score.as_f64() - snapshot.trust_score.as_f64()).abs() < 1e-9);
}

#[tokio::test]
async fn failures_drag_the_composite_down() {
    let (store, engine, _reputation) = setup().await;
    let issuer = Issuer::User(UserId::generate());
    let agent = register_agent(&store, TestAgent::named("flaky")).await;

    for i in 0..10 {
        let contract = engine
            .create_contract(
                issuer.clone(),
                &format!("job-{i}"),
                json!({}),
                Decimal::new(5, 0),
                AwardStrategyKind::LowestPrice,
            )
            .await
            .unwrap();
        engine
            .submit_bid(
                contract.id,
                agent,
                Decimal::new(1, 0),
                10.0,
                ConfidenceValue::try_new(0.95).unwrap(),
            )
            .await
            .unwrap();
        engine.try_award(&contract).await.unwrap();
        engine
            .deliver(contract.id, agent, json!({}))
            .await
            .unwrap();
        // Every delivery scores below the validation threshold.
        engine
            .validate(contract.id, &issuer, ValidationScore::try_new(0.2).unwrap())
            .await
            .unwrap();
    }

    let snapshot = store.reputation().get_snapshot(agent).await.unwrap().unwrap();
    assert!(snapshot.trust_score.as_f64() < 0.5);
    assert_eq!(snapshot.failed_contracts, 10);
    assert_eq!(snapshot.successful_contracts, 0);
}

#[tokio::test]
async fn periodic_sweep_covers_all_active_agents() {
    let (store, _engine, reputation) = setup().await;
    register_agent(&store, TestAgent::named("one")).await;
    register_agent(&store, TestAgent::named("two")).await;
    register_agent(
        &store,
        TestAgent {
            status: agora::storage::AgentStatus::Inactive,
            ..TestAgent::named("sleeper")
        },
    )
    .await;

    let count = reputation.recalculate_all().await.unwrap();
    assert_eq!(count, 2, "inactive agents are skipped");
}
