//! Router implementation: send, ack, inbox

use super::{Principal, RouterError};
use crate::acl::AclEvaluator;
use crate::config::AppConfig;
use crate::domain_types::{
    AgentId, AgentName, ConversationId, FederatedAddress, IdempotencyKey, MessageId,
};
use crate::federation::{FederationClient, FederationEnvelope};
use crate::presence::PresenceRegistry;
use crate::rate_limit::{self, RateLimiter};
use crate::storage::{
    AgentRecord, AgentStatus, MessageRecord, MessageType, NewAgent, NewMessage, ReceiptRecord,
    Store,
};
use crate::time_provider::SharedTimeProvider;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Delivery target of a send
#[derive(Debug, Clone)]
pub enum SendTarget {
    /// An agent on this hub
    Local(AgentId),
    /// An agent on a remote hub, addressed `name@domain`
    Federated(FederatedAddress),
}

/// A send request, addressing plus payload
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Sending agent
    pub from_agent_id: AgentId,
    /// Where the message goes
    pub target: SendTarget,
    /// Existing conversation to append to; one is created when absent
    pub conversation_id: Option<ConversationId>,
    /// Type tag
    pub message_type: MessageType,
    /// Structured payload
    pub content: serde_json::Value,
    /// Whether the sender expects a response
    pub requires_response: bool,
    /// Sender-scoped deduplication key
    pub idempotency_key: Option<IdempotencyKey>,
}

/// Terminal status of a send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStatus {
    /// Persisted for a local recipient
    Queued,
    /// Accepted by the remote hub
    Sent,
    /// Idempotency-key replay; no new message was created
    Duplicate,
    /// Federated delivery failed; receipt left un-delivered for retry
    Error(String),
}

/// Result of a send
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// The message id (prior id on replays)
    pub id: MessageId,
    /// Terminal status
    pub status: SendStatus,
    /// Conversation the message belongs to
    pub conversation_id: ConversationId,
}

/// The A2A message router
#[derive(Clone)]
pub struct MessageRouter {
    store: Store,
    acl: AclEvaluator,
    limiter: RateLimiter,
    presence: Arc<PresenceRegistry>,
    federation: Arc<FederationClient>,
    config: AppConfig,
    time: SharedTimeProvider,
}

impl MessageRouter {
    /// Builds the router over the shared runtime services
    pub fn new(
        store: Store,
        acl: AclEvaluator,
        limiter: RateLimiter,
        presence: Arc<PresenceRegistry>,
        federation: Arc<FederationClient>,
        config: AppConfig,
        time: SharedTimeProvider,
    ) -> Self {
        Self {
            store,
            acl,
            limiter,
            presence,
            federation,
            config,
            time,
        }
    }

    /// Sends a message from an agent to a local or federated target
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` on authorization or ACL failure, `RateLimited`
    /// when a window is exhausted, `NotFound` for unknown agents or
    /// conversations; idempotency replays are returned as `Duplicate`
    /// outcomes, never errors
    pub async fn send(
        &self,
        principal: &Principal,
        request: SendRequest,
    ) -> Result<SendOutcome, RouterError> {
        let from = self.require_agent(request.from_agent_id).await?;
        self.authorize_sender(principal, &from).await?;
        self.enforce_rate_limits(principal, &from).await?;

        if let Some(key) = &request.idempotency_key {
            if let Some(prior) = self.store.messages().find_replay(from.id, key).await? {
                return Ok(SendOutcome {
                    id: prior.id,
                    status: SendStatus::Duplicate,
                    conversation_id: prior.conversation_id,
                });
            }
        }

        match request.target.clone() {
            SendTarget::Local(to_id) => {
                let to = self.require_agent(to_id).await?;
                self.send_local(&from, &to, request).await
            }
            SendTarget::Federated(address) => {
                self.send_federated(&from, &address, request).await
            }
        }
    }

    /// Acknowledges a message on behalf of its recipient; idempotent
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` when the principal may not act for the agent and
    /// `NotFound` when no receipt exists
    pub async fn ack(
        &self,
        principal: &Principal,
        message_id: MessageId,
        agent_id: AgentId,
    ) -> Result<(), RouterError> {
        let agent = self.require_agent(agent_id).await?;
        self.authorize_for_agent(principal, &agent).await?;

        if self
            .store
            .messages()
            .get_receipt(message_id, agent_id)
            .await?
            .is_none()
        {
            return Err(RouterError::NotFound {
                what: format!("receipt for message {message_id}"),
            });
        }
        self.store
            .messages()
            .ack(message_id, agent_id, self.time.now())
            .await?;
        Ok(())
    }

    /// Unacked messages for a recipient, newest first
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` when the principal may not act for the agent
    pub async fn inbox(
        &self,
        principal: &Principal,
        agent_id: AgentId,
        limit: i64,
    ) -> Result<Vec<(MessageRecord, ReceiptRecord)>, RouterError> {
        let agent = self.require_agent(agent_id).await?;
        self.authorize_for_agent(principal, &agent).await?;
        Ok(self
            .store
            .messages()
            .inbox(agent_id, limit, self.time.now())
            .await?)
    }

    /// Recent receipts for a recipient regardless of ack state
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` when the principal may not act for the agent
    pub async fn receipts(
        &self,
        principal: &Principal,
        agent_id: AgentId,
        limit: i64,
    ) -> Result<Vec<(MessageRecord, ReceiptRecord)>, RouterError> {
        let agent = self.require_agent(agent_id).await?;
        self.authorize_for_agent(principal, &agent).await?;
        Ok(self.store.messages().receipts_for_agent(agent_id, limit).await?)
    }

    async fn send_local(
        &self,
        from: &AgentRecord,
        to: &AgentRecord,
        request: SendRequest,
    ) -> Result<SendOutcome, RouterError> {
        let decision = self.acl.check(from, to).await?;
        if !decision.allowed {
            return Err(RouterError::Forbidden {
                reason: decision.reason,
            });
        }

        let now = self.time.now();
        let conversation_id = self
            .resolve_conversation(request.conversation_id, from.id, to.id, now)
            .await?;

        let (message, _receipt) = self
            .store
            .messages()
            .insert_with_receipt(
                NewMessage {
                    conversation_id,
                    from_agent_id: from.id,
                    to_agent_id: to.id,
                    message_type: request.message_type,
                    content: request.content.clone(),
                    requires_response: request.requires_response,
                    idempotency_key: request.idempotency_key,
                },
                0,
                None,
                now,
            )
            .await?;

        let push = json!({
            "type": "a2a_message",
            "conversation_id": conversation_id.to_string(),
            "from_agent_id": from.id.to_string(),
            "message_type": request.message_type.as_str(),
            "content": request.content,
            "requires_response": request.requires_response,
            "timestamp": now.to_rfc3339(),
        });
        if self.presence.send_to_agent(to.id, &push) > 0 {
            self.store
                .messages()
                .mark_delivery_attempt(message.id, to.id, true, self.time.now())
                .await?;
        }

        info!(message = %message.id, from = %from.id, to = %to.id, "a2a message queued");
        Ok(SendOutcome {
            id: message.id,
            status: SendStatus::Queued,
            conversation_id,
        })
    }

    async fn send_federated(
        &self,
        from: &AgentRecord,
        address: &FederatedAddress,
        request: SendRequest,
    ) -> Result<SendOutcome, RouterError> {
        // Inbound ACL is the receiving hub's responsibility.
        let stub = self.upsert_outbound_stub(address).await?;
        let now = self.time.now();
        let conversation_id = self
            .resolve_conversation(request.conversation_id, from.id, stub.id, now)
            .await?;

        let (message, _receipt) = self
            .store
            .messages()
            .insert_with_receipt(
                NewMessage {
                    conversation_id,
                    from_agent_id: from.id,
                    to_agent_id: stub.id,
                    message_type: request.message_type,
                    content: request.content.clone(),
                    requires_response: request.requires_response,
                    idempotency_key: request.idempotency_key,
                },
                0,
                None,
                now,
            )
            .await?;

        // The local message id doubles as the envelope id for remote ACK.
        let envelope = FederationEnvelope {
            id: message.id.to_string(),
            from: format!("{}@{}", from.name, self.config.federation.domain),
            to: address.to_string(),
            message_type: request.message_type.as_str().to_string(),
            payload: request.content,
            timestamp: Some(now.to_rfc3339()),
            requires_response: request.requires_response,
            signature: None,
        };

        let status = match self
            .federation
            .send(&address.domain().to_string(), &envelope)
            .await
        {
            Ok(code) if code.is_success() => {
                self.store
                    .messages()
                    .mark_delivery_attempt(message.id, stub.id, true, self.time.now())
                    .await?;
                SendStatus::Sent
            }
            Ok(code) => {
                warn!(message = %message.id, %code, "remote hub rejected envelope");
                SendStatus::Error(format!("error:{}", code.as_u16()))
            }
            Err(error) => {
                warn!(message = %message.id, %error, "federation send failed");
                SendStatus::Error(format!("error:{error}"))
            }
        };

        Ok(SendOutcome {
            id: message.id,
            status,
            conversation_id,
        })
    }

    async fn resolve_conversation(
        &self,
        supplied: Option<ConversationId>,
        from: AgentId,
        to: AgentId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<ConversationId, RouterError> {
        match supplied {
            Some(id) => {
                self.store
                    .conversations()
                    .get(id)
                    .await?
                    .ok_or_else(|| RouterError::NotFound {
                        what: format!("conversation {id}"),
                    })?;
                Ok(id)
            }
            None => Ok(self
                .store
                .conversations()
                .get_or_create(from, to, "a2a", now)
                .await?
                .id),
        }
    }

    async fn require_agent(&self, id: AgentId) -> Result<AgentRecord, RouterError> {
        self.store
            .agents()
            .get(id)
            .await?
            .ok_or_else(|| RouterError::NotFound {
                what: format!("agent {id}"),
            })
    }

    /// Send authorization: API-key principals must own the sending agent's
    /// creator or belong to its organization; user principals act freely
    async fn authorize_sender(
        &self,
        principal: &Principal,
        from: &AgentRecord,
    ) -> Result<(), RouterError> {
        if let Principal::ApiKey { user_id, .. } = principal {
            if let Some(creator) = from.creator_id {
                if creator != *user_id && !self.user_in_agent_org(*user_id, from).await? {
                    return Err(RouterError::Forbidden {
                        reason: "not authorized to send from this agent".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Recipient authorization for ack/inbox: the principal must own the
    /// agent's creator or belong to its organization
    async fn authorize_for_agent(
        &self,
        principal: &Principal,
        agent: &AgentRecord,
    ) -> Result<(), RouterError> {
        let user_id = principal.user_id();
        if agent.creator_id == Some(user_id) {
            return Ok(());
        }
        if self.user_in_agent_org(user_id, agent).await? {
            return Ok(());
        }
        Err(RouterError::Forbidden {
            reason: "not authorized for this agent".to_string(),
        })
    }

    async fn user_in_agent_org(
        &self,
        user_id: crate::domain_types::UserId,
        agent: &AgentRecord,
    ) -> Result<bool, RouterError> {
        match agent.org_id {
            Some(org_id) => Ok(self.store.orgs().is_member(org_id, user_id).await?),
            None => Ok(false),
        }
    }

    async fn enforce_rate_limits(
        &self,
        principal: &Principal,
        from: &AgentRecord,
    ) -> Result<(), RouterError> {
        let Principal::ApiKey {
            api_key_id,
            rate_limit_per_min,
            ..
        } = principal
        else {
            return Ok(());
        };
        let window = Duration::from_secs(60);

        let key_limit = rate_limit_per_min.unwrap_or(self.config.mesh.api_key_rate_limit_per_min);
        let key = rate_limit::key_for_api_key(&api_key_id.to_string());
        if !self.limiter.check_and_increment(&key, key_limit, window).await {
            return Err(RouterError::RateLimited {
                scope: "api_key".to_string(),
                retry_after_secs: 60,
            });
        }

        if let Some(org_id) = from.org_id {
            let org_key = rate_limit::key_for_org(&org_id.to_string());
            let org_limit = self.config.mesh.org_rate_limit_per_min;
            if !self
                .limiter
                .check_and_increment(&org_key, org_limit, window)
                .await
            {
                return Err(RouterError::RateLimited {
                    scope: "org".to_string(),
                    retry_after_secs: 60,
                });
            }
        }
        Ok(())
    }

    /// Finds or creates the local stub row tracking an outbound federated
    /// recipient
    async fn upsert_outbound_stub(
        &self,
        address: &FederatedAddress,
    ) -> Result<AgentRecord, RouterError> {
        let name = address.to_string();
        if let Some(existing) = self.store.agents().find_by_name(&name).await? {
            return Ok(existing);
        }
        let stub_name = AgentName::try_new(name.clone()).map_err(|e| RouterError::BadRequest {
            reason: format!("invalid federated address: {e}"),
        })?;
        Ok(self
            .store
            .agents()
            .insert(
                NewAgent {
                    name: stub_name,
                    description: format!("Federated agent {name}"),
                    endpoint: String::new(),
                    capabilities: vec![],
                    category: "federated".to_string(),
                    status: AgentStatus::Inactive,
                    creator_id: None,
                    org_id: None,
                    is_public: false,
                    cost_per_request: 0.0,
                },
                self.time.now(),
            )
            .await?)
    }
}
