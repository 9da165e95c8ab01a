//! Federation HTTP surface
//!
//! The mesh core exposes only the inter-hub endpoints: health, inbox, and
//! ack. Everything else (user CRUD, marketplace, streaming transport) is an
//! outer-layer concern consuming the library APIs directly.

use crate::config::FederationConfig;
use crate::federation::{FederationError, InboundOutcome, InboundProcessor, SIGNATURE_HEADER};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Shared state behind the federation routes
#[derive(Clone)]
pub struct AppState {
    /// Inbound envelope pipeline
    pub inbound: InboundProcessor,
    /// Federation settings echoed by the health document
    pub federation: FederationConfig,
}

/// Builds the router with all federation endpoints
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/a2a/federation/health", get(federation_health))
        .route("/api/v1/a2a/federation/inbox", post(federation_inbox))
        .route("/api/v1/a2a/federation/ack", post(federation_ack))
        .with_state(Arc::new(state))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy"}))
}

async fn federation_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "domain": state.federation.domain.to_string(),
        "signing": {
            "enabled": state.federation.shared_secret.is_some(),
            "key_id": serde_json::Value::Null,
            "hmac_required": state.federation.hmac_required,
        },
        "inbox": "POST /api/v1/a2a/federation/inbox",
    }))
}

async fn federation_inbox(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = signature_header(&headers);
    match state.inbound.process(&body, signature.as_deref()).await {
        Ok(InboundOutcome::Accepted {
            message_id,
            conversation_id,
            delivered,
        }) => (
            StatusCode::OK,
            Json(json!({
                "status": "accepted",
                "domain": state.federation.domain.to_string(),
                "message_id": message_id.to_string(),
                "conversation_id": conversation_id.to_string(),
                "delivered": delivered,
            })),
        )
            .into_response(),
        Ok(InboundOutcome::Duplicate { conversation_id }) => (
            StatusCode::OK,
            Json(json!({
                "status": "duplicate",
                "conversation_id": conversation_id.to_string(),
            })),
        )
            .into_response(),
        Err(error) => federation_error_response(&error),
    }
}

/// Ack request body: the envelope id being acknowledged
#[derive(Debug, Deserialize)]
struct AckRequest {
    message_id: String,
}

async fn federation_ack(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = signature_header(&headers);
    if !crate::federation::verify_signature(&state.federation, &body, signature.as_deref()) {
        return federation_error_response(&FederationError::InvalidSignature);
    }
    let request: AckRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(error) => {
            return federation_error_response(&FederationError::Malformed {
                reason: error.to_string(),
            });
        }
    };
    match state.inbound.process_ack(&request.message_id).await {
        Ok(acked) => (StatusCode::OK, Json(json!({"ok": acked}))).into_response(),
        Err(error) => federation_error_response(&error),
    }
}

fn signature_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SIGNATURE_HEADER)
        .or_else(|| headers.get("X-Signature"))
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

/// Maps federation errors onto the documented status codes
fn federation_error_response(error: &FederationError) -> Response {
    let status = match error {
        FederationError::InvalidSignature => StatusCode::UNAUTHORIZED,
        FederationError::Malformed { .. } => StatusCode::BAD_REQUEST,
        FederationError::WrongDomain { .. } | FederationError::UnknownRecipient { .. } => {
            StatusCode::NOT_FOUND
        }
        FederationError::AclDenied { .. } => StatusCode::FORBIDDEN,
        FederationError::Transport { .. } | FederationError::Storage { .. } => {
            warn!(%error, "federation endpoint internal failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({"detail": error.to_string()}))).into_response()
}
