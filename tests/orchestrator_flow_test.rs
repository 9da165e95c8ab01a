//! Orchestration scenarios: routed dispatch over the messaging plane with a
//! live responder, and market dispatch through the contract engine with a
//! live bidder

mod common;

use agora::config::MeshConfig;
use agora::contracts::{AwardSweeper, ContractEngine};
use agora::domain_types::{AgentId, ConfidenceValue, UserId};
use agora::messaging::{Principal, SendRequest, SendTarget};
use agora::orchestrator::{MarketNodeExecutor, NodeExecutor};
use agora::presence::PresenceKey;
use agora::reputation::ReputationEngine;
use agora::storage::contracts::Issuer;
use agora::storage::{ContractStatus, MessageType, Store};
use agora::time_provider::production_time_provider;
use common::{TestAgent, mock_runtime, register_agent};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Answers every inbox request with a canned response message
fn spawn_responder(
    runtime_store: Store,
    router: agora::messaging::MessageRouter,
    agent_id: AgentId,
    answer: serde_json::Value,
    stop: CancellationToken,
) {
    tokio::spawn(async move {
        let principal = Principal::User {
            user_id: UserId::generate(),
        };
        let mut seen = HashSet::new();
        while !stop.is_cancelled() {
            let inbox = runtime_store
                .messages()
                .inbox(agent_id, 10, chrono::Utc::now())
                .await
                .unwrap_or_default();
            for (message, _receipt) in inbox {
                if !seen.insert(message.id) {
                    continue;
                }
                let _ = router
                    .send(
                        &principal,
                        SendRequest {
                            from_agent_id: agent_id,
                            target: SendTarget::Local(message.from_agent_id),
                            conversation_id: Some(message.conversation_id),
                            message_type: MessageType::Response,
                            content: answer.clone(),
                            requires_response: false,
                            idempotency_key: None,
                        },
                    )
                    .await;
                let _ = runtime_store
                    .messages()
                    .ack(message.id, agent_id, chrono::Utc::now())
                    .await;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });
}

#[tokio::test]
async fn routed_plan_completes_with_live_responder() {
    let (runtime, _clock) = mock_runtime().await;
    let store = runtime.store().clone();
    let user = UserId::generate();

    let summarizer = register_agent(
        &store,
        TestAgent::named("summarizer")
            .public()
            .with_capabilities(vec!["summarize", "general"]),
    )
    .await;

    let stop = CancellationToken::new();
    spawn_responder(
        store.clone(),
        runtime.router().clone(),
        summarizer,
        json!({"result": "three paragraphs, trimmed", "confidence": 0.92}),
        stop.clone(),
    );

    // Collect events on the user's channel while the plan runs.
    let (_stream, mut events) = runtime.presence().connect(&PresenceKey::User(user));

    let orchestrator = runtime.orchestrator(Duration::from_secs(10)).await.unwrap();
    let outcome = orchestrator
        .orchestrate(user, "summarize the quarterly report")
        .await
        .unwrap();
    stop.cancel();

    assert_eq!(outcome.final_result["result"], "three paragraphs, trimmed");
    assert!((outcome.final_result["confidence"].as_f64().unwrap() - 0.92).abs() < 1e-9);

    let plan = store.plans().get(outcome.plan_id).await.unwrap().unwrap();
    assert_eq!(plan.status, agora::storage::PlanStatus::Completed);
    let collaborations = store
        .plans()
        .collaborations_for(outcome.plan_id)
        .await
        .unwrap();
    assert_eq!(collaborations.len(), 1);

    let mut types = Vec::new();
    while let Ok(event) = events.try_recv() {
        types.push(event["type"].as_str().unwrap_or_default().to_string());
    }
    for expected in [
        "task_started",
        "intent_parsed",
        "agents_discovered",
        "step_started",
        "step_completed",
        "task_complete",
    ] {
        assert!(types.contains(&expected.to_string()), "missing {expected}");
    }
}

#[tokio::test]
async fn unanswered_dispatch_degrades_to_zero_confidence() {
    let (runtime, _clock) = mock_runtime().await;
    let store = runtime.store().clone();
    let user = UserId::generate();

    register_agent(
        &store,
        TestAgent::named("mute").public().with_capabilities(vec!["general"]),
    )
    .await;

    // Tight budget: nobody answers, the node degrades instead of hanging.
    let orchestrator = runtime
        .orchestrator(Duration::from_millis(200))
        .await
        .unwrap();
    let outcome = orchestrator.orchestrate(user, "do the thing").await.unwrap();
    assert_eq!(outcome.final_result["error"], "no response within budget");
}

#[tokio::test]
async fn market_dispatch_settles_through_the_contract_engine() {
    let database = agora::database::DatabaseConnection::in_memory()
        .await
        .unwrap();
    let store = Store::new(database);
    let time = production_time_provider();
    let reputation = ReputationEngine::new(store.clone(), time.clone());
    let config = MeshConfig {
        bidding_window: Duration::from_millis(100),
        award_sweep_interval: Duration::from_millis(50),
        ..MeshConfig::default()
    };
    let engine = ContractEngine::new(
        store.clone(),
        reputation,
        Arc::new(agora::presence::PresenceRegistry::new()),
        config.clone(),
        time.clone(),
    );

    let shutdown = CancellationToken::new();
    let sweeper = AwardSweeper::new(engine.clone(), config.award_sweep_interval, time.clone());
    tokio::spawn(sweeper.run(shutdown.clone()));

    let bidder = register_agent(&store, TestAgent::named("market-worker")).await;

    // A live bidder: bids on anything, delivers once awarded.
    let bidder_engine = engine.clone();
    let bidder_store = store.clone();
    let bidder_stop = shutdown.clone();
    tokio::spawn(async move {
        let mut bid_on = HashSet::new();
        while !bidder_stop.is_cancelled() {
            if let Ok(open) = bidder_store
                .contracts()
                .list_by_status(ContractStatus::Bidding)
                .await
            {
                for contract in open {
                    if bid_on.insert(contract.id) {
                        let _ = bidder_engine
                            .submit_bid(
                                contract.id,
                                bidder,
                                Decimal::new(1, 0),
                                5.0,
                                ConfidenceValue::try_new(0.9).unwrap(),
                            )
                            .await;
                    }
                }
            }
            if let Ok(awarded) = bidder_store
                .contracts()
                .list_by_status(ContractStatus::Awarded)
                .await
            {
                for contract in awarded {
                    if contract.awarded_to == Some(bidder) {
                        let _ = bidder_engine
                            .deliver(
                                contract.id,
                                bidder,
                                json!({"result": "market output", "confidence": 0.9}),
                            )
                            .await;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    let issuer = Issuer::User(UserId::generate());
    let executor = MarketNodeExecutor::new(
        engine.clone(),
        time,
        issuer,
        Decimal::new(5, 0),
        Duration::from_secs(5),
    );

    let agent_record = store.agents().get(bidder).await.unwrap().unwrap();
    let result = executor
        .execute(&agent_record, "produce the market output", &json!({}))
        .await;
    shutdown.cancel();

    assert_eq!(result.output["result"], "market output");
    assert!((result.confidence - 0.9).abs() < 1e-9);

    // The executor validated and the engine settled the contract.
    let settled = store
        .contracts()
        .list_by_status(ContractStatus::Settled)
        .await
        .unwrap();
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].awarded_to, Some(bidder));
}
