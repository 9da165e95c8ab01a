//! End-to-end A2A messaging scenarios: idempotent send, inbox, ack, ACL
//! enforcement, and rate limiting

mod common;

use agora::domain_types::{ApiKeyId, IdempotencyKey, OrgId, UserId};
use agora::messaging::{Principal, RouterError, SendRequest, SendStatus, SendTarget};
use agora::storage::MessageType;
use chrono::Utc;
use common::{TestAgent, mock_runtime, register_agent};
use serde_json::json;

fn send_request(
    from: agora::domain_types::AgentId,
    to: agora::domain_types::AgentId,
    key: Option<&str>,
) -> SendRequest {
    SendRequest {
        from_agent_id: from,
        target: SendTarget::Local(to),
        conversation_id: None,
        message_type: MessageType::Request,
        content: json!({"x": 1}),
        requires_response: false,
        idempotency_key: key.map(|k| IdempotencyKey::try_new(k.to_string()).unwrap()),
    }
}

fn api_principal(user: UserId, limit: u64) -> Principal {
    Principal::ApiKey {
        api_key_id: ApiKeyId::generate(),
        user_id: user,
        rate_limit_per_min: Some(limit),
    }
}

#[tokio::test]
async fn local_send_inbox_and_ack_round_trip() {
    let (runtime, _clock) = mock_runtime().await;
    let store = runtime.store();
    let owner = UserId::generate();
    let org = OrgId::generate();
    store
        .orgs()
        .upsert_member(org, owner, agora::storage::OrgMemberRole::Member, Utc::now())
        .await
        .unwrap();

    let a = register_agent(store, TestAgent::named("a").created_by(owner).in_org(org)).await;
    let b = register_agent(store, TestAgent::named("b").created_by(owner).in_org(org)).await;
    let principal = api_principal(owner, 1000);

    // First send persists exactly one message.
    let first = runtime
        .router()
        .send(&principal, send_request(a, b, Some("k1")))
        .await
        .unwrap();
    assert_eq!(first.status, SendStatus::Queued);

    // Replaying the same (sender, key) returns the prior id, no new row.
    let replay = runtime
        .router()
        .send(&principal, send_request(a, b, Some("k1")))
        .await
        .unwrap();
    assert_eq!(replay.status, SendStatus::Duplicate);
    assert_eq!(replay.id, first.id);
    assert_eq!(replay.conversation_id, first.conversation_id);

    let inbox = runtime.router().inbox(&principal, b, 50).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].0.id, first.id);
    assert_eq!(inbox[0].0.content, json!({"x": 1}));
    assert!(inbox[0].1.delivered_at.is_some());

    runtime.router().ack(&principal, first.id, b).await.unwrap();
    assert!(runtime.router().inbox(&principal, b, 50).await.unwrap().is_empty());
}

#[tokio::test]
async fn repeated_acks_keep_first_timestamp() {
    let (runtime, _clock) = mock_runtime().await;
    let store = runtime.store();
    let owner = UserId::generate();
    let org = OrgId::generate();

    let a = register_agent(store, TestAgent::named("a").created_by(owner).in_org(org)).await;
    let b = register_agent(store, TestAgent::named("b").created_by(owner).in_org(org)).await;
    let principal = Principal::User { user_id: owner };

    let sent = runtime
        .router()
        .send(&principal, send_request(a, b, None))
        .await
        .unwrap();

    runtime.router().ack(&principal, sent.id, b).await.unwrap();
    let first = store.messages().get_receipt(sent.id, b).await.unwrap().unwrap();

    for _ in 0..3 {
        runtime.router().ack(&principal, sent.id, b).await.unwrap();
    }
    let last = store.messages().get_receipt(sent.id, b).await.unwrap().unwrap();
    assert_eq!(first.acked_at, last.acked_at);
}

#[tokio::test]
async fn cross_org_send_denied_until_rule_added() {
    let (runtime, _clock) = mock_runtime().await;
    let store = runtime.store();
    let owner = UserId::generate();

    let a = register_agent(
        store,
        TestAgent::named("a")
            .created_by(owner)
            .in_org(OrgId::generate()),
    )
    .await;
    let b = register_agent(store, TestAgent::named("b").in_org(OrgId::generate())).await;
    let principal = Principal::User { user_id: owner };

    let denied = runtime
        .router()
        .send(&principal, send_request(a, b, None))
        .await
        .unwrap_err();
    match denied {
        RouterError::Forbidden { reason } => {
            assert_eq!(reason, "No permission rules allow this access");
        }
        other => panic!("expected Forbidden, got {other:?}"),
    }

    store
        .acl()
        .set_agent_allow(a, b, true, Utc::now())
        .await
        .unwrap();
    let allowed = runtime
        .router()
        .send(&principal, send_request(a, b, None))
        .await
        .unwrap();
    assert_eq!(allowed.status, SendStatus::Queued);
}

#[tokio::test]
async fn api_key_rate_limit_rejects_excess_sends() {
    let (runtime, _clock) = mock_runtime().await;
    let store = runtime.store();
    let owner = UserId::generate();
    let org = OrgId::generate();

    let a = register_agent(store, TestAgent::named("a").created_by(owner).in_org(org)).await;
    let b = register_agent(store, TestAgent::named("b").created_by(owner).in_org(org)).await;
    let principal = api_principal(owner, 2);

    for _ in 0..2 {
        runtime
            .router()
            .send(&principal, send_request(a, b, None))
            .await
            .unwrap();
    }
    let limited = runtime
        .router()
        .send(&principal, send_request(a, b, None))
        .await
        .unwrap_err();
    assert!(matches!(limited, RouterError::RateLimited { .. }));
}

#[tokio::test]
async fn api_key_principal_must_own_or_share_org_with_sender() {
    let (runtime, _clock) = mock_runtime().await;
    let store = runtime.store();
    let owner = UserId::generate();
    let stranger = UserId::generate();

    let a = register_agent(store, TestAgent::named("a").created_by(owner)).await;
    let b = register_agent(store, TestAgent::named("b").created_by(owner).public()).await;

    let denied = runtime
        .router()
        .send(&api_principal(stranger, 100), send_request(a, b, None))
        .await
        .unwrap_err();
    assert!(matches!(denied, RouterError::Forbidden { .. }));

    runtime
        .router()
        .send(&api_principal(owner, 100), send_request(a, b, None))
        .await
        .unwrap();
}

#[tokio::test]
async fn live_recipient_receives_push_and_delivery_stamp() {
    let (runtime, _clock) = mock_runtime().await;
    let store = runtime.store();
    let owner = UserId::generate();
    let org = OrgId::generate();

    let a = register_agent(store, TestAgent::named("a").created_by(owner).in_org(org)).await;
    let b = register_agent(store, TestAgent::named("b").created_by(owner).in_org(org)).await;
    let principal = Principal::User { user_id: owner };

    let key = agora::presence::PresenceKey::Agent(b);
    let (_stream, mut rx) = runtime.presence().connect(&key);

    let sent = runtime
        .router()
        .send(&principal, send_request(a, b, None))
        .await
        .unwrap();

    let event = rx.recv().await.unwrap();
    assert_eq!(event["type"], "a2a_message");
    assert_eq!(event["content"], json!({"x": 1}));

    let receipt = store.messages().get_receipt(sent.id, b).await.unwrap().unwrap();
    assert_eq!(receipt.delivery_attempts, 1);
    assert!(receipt.delivered_at.is_some());
}
