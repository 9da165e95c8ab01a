//! Inter-hub federation scenarios: signed inbox round-trip, dedupe,
//! signature tampering, remote stub mirroring, and ACK propagation

mod common;

use agora::config::AppConfig;
use agora::database::DatabaseConnection;
use agora::domain_types::{HubDomain, UserId};
use agora::federation::{FederationEnvelope, SIGNATURE_HEADER, sign};
use agora::messaging::{Principal, SendRequest, SendStatus, SendTarget};
use agora::server::{MeshRuntime, bind, serve_with_graceful_shutdown};
use agora::storage::{AgentStatus, MessageType};
use common::{TestAgent, register_agent};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SECRET: &str = "integration-shared-secret";

struct Hub {
    runtime: MeshRuntime,
    domain: String,
    base_url: String,
    _token: CancellationToken,
}

/// Boots a hub whose federation domain is its own bound address
async fn spawn_hub(secret: Option<&str>, hmac_required: bool) -> Hub {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (listener, actual) = bind(addr).await.unwrap();
    let domain = actual.to_string();

    let mut config = AppConfig::default();
    config.federation.domain = HubDomain::try_new(domain.clone()).unwrap();
    config.federation.shared_secret = secret.map(ToString::to_string);
    config.federation.hmac_required = hmac_required;
    config.federation.timeout = Duration::from_secs(2);

    let database = DatabaseConnection::in_memory().await.unwrap();
    let runtime = MeshRuntime::start(config, database).await.unwrap();

    let token = CancellationToken::new();
    let app = runtime.app();
    let serve_token = token.clone();
    tokio::spawn(async move {
        let _ = serve_with_graceful_shutdown(listener, app, serve_token).await;
    });

    Hub {
        runtime,
        base_url: format!("http://{domain}"),
        domain,
        _token: token,
    }
}

fn envelope(id: &str, from: &str, to: &str) -> FederationEnvelope {
    FederationEnvelope {
        id: id.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        message_type: "request".to_string(),
        payload: json!({"greeting": "hello"}),
        timestamp: None,
        requires_response: false,
        signature: None,
    }
}

async fn post_envelope(
    hub: &Hub,
    raw: Vec<u8>,
    signature: Option<String>,
) -> reqwest::Response {
    let client = reqwest::Client::new();
    let mut request = client
        .post(format!("{}/api/v1/a2a/federation/inbox", hub.base_url))
        .header("Content-Type", "application/json")
        .body(raw);
    if let Some(signature) = signature {
        request = request.header(SIGNATURE_HEADER, signature);
    }
    request.send().await.unwrap()
}

#[tokio::test]
async fn signed_envelope_accepted_then_deduped_then_tamper_rejected() {
    let hub = spawn_hub(Some(SECRET), true).await;
    register_agent(hub.runtime.store(), TestAgent::named("bob")).await;

    let env = envelope(
        "3f0c0e0a-5df1-4af5-b2a1-3a3a53a1c001",
        "alice@remote.test",
        &format!("bob@{}", hub.domain),
    );
    let raw = env.to_signing_bytes().unwrap();
    let signature = sign(SECRET, &raw);

    let accepted = post_envelope(&hub, raw.clone(), Some(signature.clone())).await;
    assert_eq!(accepted.status(), 200);
    let body: serde_json::Value = accepted.json().await.unwrap();
    assert_eq!(body["status"], "accepted");

    // Same envelope id replays as a duplicate, not a second message.
    let duplicate = post_envelope(&hub, raw.clone(), Some(signature.clone())).await;
    assert_eq!(duplicate.status(), 200);
    let body: serde_json::Value = duplicate.json().await.unwrap();
    assert_eq!(body["status"], "duplicate");

    // Any flipped signature byte is rejected outright.
    let mut tampered = signature.clone();
    let last = tampered.pop().unwrap();
    tampered.push(if last == '0' { '1' } else { '0' });
    let rejected = post_envelope(&hub, raw.clone(), Some(tampered)).await;
    assert_eq!(rejected.status(), 401);

    // As is any mutated body byte under the original signature.
    let mut mutated = raw;
    mutated[10] ^= 0x01;
    let rejected = post_envelope(&hub, mutated, Some(signature)).await;
    assert_eq!(rejected.status(), 401);
}

#[tokio::test]
async fn inbound_mirrors_remote_identity_as_stub() {
    let hub = spawn_hub(Some(SECRET), true).await;
    register_agent(hub.runtime.store(), TestAgent::named("bob")).await;

    let env = envelope(
        "8c3b87d8-6a3c-45f0-9b3f-d58f0d3f7a02",
        "alice@remote.test",
        &format!("bob@{}", hub.domain),
    );
    let raw = env.to_signing_bytes().unwrap();
    post_envelope(&hub, raw.clone(), Some(sign(SECRET, &raw))).await;

    let store = hub.runtime.store();
    let stub = store
        .agents()
        .find_by_name("alice@remote.test")
        .await
        .unwrap()
        .expect("stub agent created");
    assert_eq!(stub.status, AgentStatus::Inactive);
    assert_eq!(stub.category, "federated");
    assert!(stub.org_id.is_some());

    let org = store.orgs().get(stub.org_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(org.domain.as_deref(), Some("remote.test"));

    let contact = store
        .federation()
        .get_contact("alice@remote.test")
        .await
        .unwrap()
        .expect("contact row upserted");
    assert_eq!(contact.remote_domain, "remote.test");

    // The ACL decision was cached for observability.
    assert!(store.federation().policy_decision_count().await.unwrap() >= 1);
}

#[tokio::test]
async fn unsigned_envelope_accepted_only_when_hmac_optional() {
    let strict = spawn_hub(Some(SECRET), true).await;
    register_agent(strict.runtime.store(), TestAgent::named("bob")).await;
    let env = envelope(
        "f1a44bd0-13a8-4c1d-bd44-0cbb6c070003",
        "alice@remote.test",
        &format!("bob@{}", strict.domain),
    );
    let raw = env.to_signing_bytes().unwrap();
    assert_eq!(post_envelope(&strict, raw, None).await.status(), 401);

    let relaxed = spawn_hub(None, false).await;
    register_agent(relaxed.runtime.store(), TestAgent::named("bob")).await;
    let env = envelope(
        "f1a44bd0-13a8-4c1d-bd44-0cbb6c070004",
        "alice@remote.test",
        &format!("bob@{}", relaxed.domain),
    );
    let raw = env.to_signing_bytes().unwrap();
    assert_eq!(post_envelope(&relaxed, raw, None).await.status(), 200);
}

#[tokio::test]
async fn wrong_domain_and_unknown_recipient_are_not_found() {
    let hub = spawn_hub(Some(SECRET), true).await;
    register_agent(hub.runtime.store(), TestAgent::named("bob")).await;

    let env = envelope(
        "aa0dfc0e-1111-4aaa-9b9b-000000000005",
        "alice@remote.test",
        "bob@some-other-hub.test",
    );
    let raw = env.to_signing_bytes().unwrap();
    assert_eq!(
        post_envelope(&hub, raw.clone(), Some(sign(SECRET, &raw)))
            .await
            .status(),
        404
    );

    let env = envelope(
        "aa0dfc0e-2222-4aaa-9b9b-000000000006",
        "alice@remote.test",
        &format!("nobody@{}", hub.domain),
    );
    let raw = env.to_signing_bytes().unwrap();
    assert_eq!(
        post_envelope(&hub, raw.clone(), Some(sign(SECRET, &raw)))
            .await
            .status(),
        404
    );
}

#[tokio::test]
async fn malformed_envelope_is_bad_request() {
    let hub = spawn_hub(Some(SECRET), true).await;
    let raw = b"{not json".to_vec();
    let response = post_envelope(&hub, raw.clone(), Some(sign(SECRET, &raw))).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn federation_health_reports_signing_posture() {
    let hub = spawn_hub(Some(SECRET), true).await;
    let body: serde_json::Value = reqwest::Client::new()
        .get(format!("{}/api/v1/a2a/federation/health", hub.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["domain"], hub.domain);
    assert_eq!(body["signing"]["enabled"], true);
    assert_eq!(body["signing"]["hmac_required"], true);
}

#[tokio::test]
async fn outbound_send_reaches_remote_hub_and_ack_returns() {
    let hub_x = spawn_hub(Some(SECRET), true).await;
    let hub_y = spawn_hub(Some(SECRET), true).await;

    let owner = UserId::generate();
    let alice = register_agent(
        hub_x.runtime.store(),
        TestAgent::named("alice").created_by(owner),
    )
    .await;
    let bob = register_agent(hub_y.runtime.store(), TestAgent::named("bob")).await;

    let principal = Principal::User { user_id: owner };
    let outcome = hub_x
        .runtime
        .router()
        .send(
            &principal,
            SendRequest {
                from_agent_id: alice,
                target: SendTarget::Federated(
                    format!("bob@{}", hub_y.domain).parse().unwrap(),
                ),
                conversation_id: None,
                message_type: MessageType::Request,
                content: json!({"ask": "weather"}),
                requires_response: true,
                idempotency_key: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, SendStatus::Sent);

    // The message landed in bob's store on hub Y.
    let inbox = hub_y
        .runtime
        .store()
        .messages()
        .inbox(bob, 10, chrono::Utc::now())
        .await
        .unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].0.content, json!({"ask": "weather"}));
    assert_eq!(inbox[0].1.delivery_attempts, 1);

    // Hub Y acks back asynchronously; hub X's receipt terminates.
    let stub = hub_x
        .runtime
        .store()
        .agents()
        .find_by_name(&format!("bob@{}", hub_y.domain))
        .await
        .unwrap()
        .expect("outbound stub created");
    let mut acked = false;
    for _ in 0..50 {
        let receipt = hub_x
            .runtime
            .store()
            .messages()
            .get_receipt(outcome.id, stub.id)
            .await
            .unwrap()
            .unwrap();
        if receipt.acked_at.is_some() {
            acked = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(acked, "remote ACK never marked the local receipt");
}

#[tokio::test]
async fn outbound_to_unreachable_hub_surfaces_error_status() {
    let hub = spawn_hub(Some(SECRET), true).await;
    let owner = UserId::generate();
    let alice = register_agent(
        hub.runtime.store(),
        TestAgent::named("alice").created_by(owner),
    )
    .await;

    let outcome = hub
        .runtime
        .router()
        .send(
            &Principal::User { user_id: owner },
            SendRequest {
                from_agent_id: alice,
                // Reserved port on localhost: connection refused.
                target: SendTarget::Federated("bob@127.0.0.1:9".parse().unwrap()),
                conversation_id: None,
                message_type: MessageType::Notification,
                content: json!({}),
                requires_response: false,
                idempotency_key: None,
            },
        )
        .await
        .unwrap();
    assert!(matches!(outcome.status, SendStatus::Error(detail) if detail.starts_with("error:")));

    // The receipt stays un-delivered for the caller to retry.
    let stub = hub
        .runtime
        .store()
        .agents()
        .find_by_name("bob@127.0.0.1:9")
        .await
        .unwrap()
        .unwrap();
    let receipt = hub
        .runtime
        .store()
        .messages()
        .get_receipt(outcome.id, stub.id)
        .await
        .unwrap()
        .unwrap();
    assert!(receipt.delivered_at.is_none());
}
