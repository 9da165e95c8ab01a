//! Inbound federation pipeline
//!
//! Verifies the body signature, validates addressing, mirrors the remote
//! identity (stub agent, domain organization, contact row), evaluates the
//! federation ACL, dedupes on the envelope id, persists message + receipt,
//! pushes to the local target if online, and ACKs back to the origin hub
//! best-effort.

use super::client::FederationClient;
use super::envelope::{FederationEnvelope, verify_signature};
use super::FederationError;
use crate::acl::AclEvaluator;
use crate::config::FederationConfig;
use crate::domain_types::{
    AgentName, ConversationId, FederatedAddress, IdempotencyKey, MessageId,
};
use crate::presence::PresenceRegistry;
use crate::storage::federation::FederationContact;
use crate::storage::{AgentRecord, AgentStatus, MessageType, NewAgent, NewMessage, Store};
use crate::time_provider::SharedTimeProvider;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of accepting an inbound envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Envelope persisted as a new message
    Accepted {
        /// Local message id
        message_id: MessageId,
        /// Conversation the message landed in
        conversation_id: ConversationId,
        /// Whether the local target received a live push
        delivered: bool,
    },
    /// Envelope id already seen for this sender and conversation
    Duplicate {
        /// Conversation of the original message
        conversation_id: ConversationId,
    },
}

/// Processes inbound envelopes and ACKs
#[derive(Clone)]
pub struct InboundProcessor {
    store: Store,
    acl: AclEvaluator,
    presence: Arc<PresenceRegistry>,
    client: Arc<FederationClient>,
    config: FederationConfig,
    time: SharedTimeProvider,
}

impl InboundProcessor {
    /// Builds the processor over the shared runtime services
    pub fn new(
        store: Store,
        acl: AclEvaluator,
        presence: Arc<PresenceRegistry>,
        client: Arc<FederationClient>,
        config: FederationConfig,
        time: SharedTimeProvider,
    ) -> Self {
        Self {
            store,
            acl,
            presence,
            client,
            config,
            time,
        }
    }

    /// Runs the full inbound pipeline over a raw request body
    ///
    /// # Errors
    ///
    /// Returns the §7 error kind matching each rejection step: bad
    /// signature, malformed envelope, wrong domain, unknown recipient, or
    /// ACL deny
    pub async fn process(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<InboundOutcome, FederationError> {
        if !verify_signature(&self.config, raw_body, signature_header) {
            return Err(FederationError::InvalidSignature);
        }

        let envelope: FederationEnvelope =
            serde_json::from_slice(raw_body).map_err(|e| FederationError::Malformed {
                reason: e.to_string(),
            })?;

        let to: FederatedAddress =
            envelope
                .to
                .parse()
                .map_err(|e: crate::domain_types::AddressParseError| FederationError::Malformed {
                    reason: e.to_string(),
                })?;
        if *to.domain() != self.config.domain {
            return Err(FederationError::WrongDomain {
                domain: to.domain().to_string(),
            });
        }

        let local_target = self
            .store
            .agents()
            .find_by_name(&to.name().to_string())
            .await?
            .ok_or_else(|| FederationError::UnknownRecipient {
                name: to.name().to_string(),
            })?;

        let from: FederatedAddress =
            envelope
                .from
                .parse()
                .map_err(|e: crate::domain_types::AddressParseError| FederationError::Malformed {
                    reason: e.to_string(),
                })?;
        let stub = self.upsert_remote_stub(&from).await?;
        self.upsert_contact(&from, &stub, &local_target).await;

        let now = self.time.now();
        let decision = self
            .acl
            .check_federation_inbound(&stub, &local_target, self.config.default_allow, now)
            .await?;
        if !decision.allowed {
            return Err(FederationError::AclDenied {
                reason: decision.reason,
            });
        }

        let conversation = self
            .store
            .conversations()
            .get_or_create(stub.id, local_target.id, "federated", now)
            .await?;

        let envelope_key = IdempotencyKey::try_new(envelope.id.clone()).map_err(|e| {
            FederationError::Malformed {
                reason: format!("invalid envelope id: {e}"),
            }
        })?;
        if self
            .store
            .messages()
            .find_replay_in_conversation(conversation.id, &envelope_key, stub.id)
            .await?
            .is_some()
        {
            return Ok(InboundOutcome::Duplicate {
                conversation_id: conversation.id,
            });
        }

        let insert = self
            .store
            .messages()
            .insert_with_receipt(
                NewMessage {
                    conversation_id: conversation.id,
                    from_agent_id: stub.id,
                    to_agent_id: local_target.id,
                    message_type: MessageType::parse_lossy(&envelope.message_type),
                    content: envelope.payload.clone(),
                    requires_response: envelope.requires_response,
                    idempotency_key: Some(envelope_key),
                },
                1,
                Some(now),
                now,
            )
            .await;
        let (message, receipt) = match insert {
            Ok(pair) => pair,
            // Two replays racing: the index won, report duplicate.
            Err(error) if error.is_unique_violation() => {
                return Ok(InboundOutcome::Duplicate {
                    conversation_id: conversation.id,
                });
            }
            Err(error) => return Err(error.into()),
        };

        let push = json!({
            "type": "a2a_federated_message",
            "id": envelope.id.clone(),
            "from": envelope.from.clone(),
            "conversation_id": conversation.id.to_string(),
            "payload": envelope.payload.clone(),
            "timestamp": envelope.timestamp.clone(),
        });
        let delivered = self.presence.send_to_agent(local_target.id, &push) > 0;
        if delivered {
            self.store
                .messages()
                .stamp_delivered(receipt.id, self.time.now())
                .await?;
        }

        self.ack_origin(&from, envelope.id.clone());

        info!(
            envelope = %envelope.id,
            from = %envelope.from,
            to = %envelope.to,
            delivered,
            "federation envelope accepted"
        );
        Ok(InboundOutcome::Accepted {
            message_id: message.id,
            conversation_id: conversation.id,
            delivered,
        })
    }

    /// Marks the receipt for a previously sent envelope as acknowledged
    ///
    /// The envelope id of an outbound message is its local message id, so
    /// the ACK resolves directly to receipts.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` for unparseable ids
    pub async fn process_ack(&self, envelope_id: &str) -> Result<bool, FederationError> {
        let message_id =
            MessageId::parse(envelope_id).map_err(|e| FederationError::Malformed {
                reason: format!("invalid envelope id: {e}"),
            })?;
        let acked = self
            .store
            .messages()
            .ack_all_for_message(message_id, self.time.now())
            .await?;
        if acked {
            info!(envelope = envelope_id, "federation ack applied");
        }
        Ok(acked)
    }

    /// Finds or creates the inactive stub row for a remote identity, linked
    /// to its domain organization
    async fn upsert_remote_stub(
        &self,
        from: &FederatedAddress,
    ) -> Result<AgentRecord, FederationError> {
        let address = from.to_string();
        let now = self.time.now();
        let org = self
            .store
            .orgs()
            .upsert_by_domain(&from.domain().to_string(), now)
            .await?;

        if let Some(existing) = self.store.agents().find_by_name(&address).await? {
            if existing.org_id != Some(org.id) {
                self.store
                    .agents()
                    .set_org(existing.id, Some(org.id), now)
                    .await?;
            }
            return Ok(AgentRecord {
                org_id: Some(org.id),
                ..existing
            });
        }

        let name = AgentName::try_new(address.clone()).map_err(|e| FederationError::Malformed {
            reason: format!("invalid remote address: {e}"),
        })?;
        let stub = self
            .store
            .agents()
            .insert(
                NewAgent {
                    name,
                    description: format!("Federated agent stub for {address}"),
                    endpoint: String::new(),
                    capabilities: vec![],
                    category: "federated".to_string(),
                    status: AgentStatus::Inactive,
                    creator_id: None,
                    org_id: Some(org.id),
                    is_public: false,
                    cost_per_request: 0.0,
                },
                now,
            )
            .await?;
        Ok(stub)
    }

    /// Upserts the contact row; failures are logged, never fatal
    async fn upsert_contact(
        &self,
        from: &FederatedAddress,
        stub: &AgentRecord,
        local_target: &AgentRecord,
    ) {
        let contact = FederationContact {
            remote_address: from.to_string(),
            remote_name: from.name().to_string(),
            remote_domain: from.domain().to_string(),
            remote_org_id: stub.org_id,
            local_agent_id: Some(local_target.id),
            local_org_id: local_target.org_id,
            last_seen_at: self.time.now(),
        };
        if let Err(error) = self.store.federation().upsert_contact(&contact).await {
            warn!(address = %contact.remote_address, %error, "contact upsert failed");
        }
    }

    /// Fire-and-forget ACK back to the origin hub
    fn ack_origin(&self, from: &FederatedAddress, envelope_id: String) {
        let client = self.client.clone();
        let domain = from.domain().to_string();
        tokio::spawn(async move {
            if let Err(error) = client.ack(&domain, &envelope_id).await {
                warn!(%domain, envelope = %envelope_id, %error, "federation ack failed");
            }
        });
    }
}
