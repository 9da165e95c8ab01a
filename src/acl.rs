//! Access-control evaluation
//!
//! Pure precedence over agents, organizations, and directed allow rules:
//!
//! 1. either party not `active` → deny
//! 2. agent-level rule exists → its `allowed` wins
//! 3. org-level rule exists (both parties in orgs) → its `allowed` wins
//! 4. same organization → allow
//! 5. target is public → allow
//! 6. deny
//!
//! Every decision carries a single human-readable reason. The federation
//! entry point evaluates rules against the remote stub identity and falls
//! back to the configured default instead of steps 4-6; its decisions are
//! recorded into the policy cache best-effort.

use crate::database::DatabaseResult;
use crate::domain_types::AgentId;
use crate::storage::federation::PolicyDecision;
use crate::storage::{AgentRecord, AgentStatus, Store};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::warn;

/// Outcome of an ACL check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclDecision {
    /// Whether the interaction is permitted
    pub allowed: bool,
    /// Single human-readable reason for the outcome
    pub reason: String,
}

impl AclDecision {
    fn allow(reason: &str) -> Self {
        Self {
            allowed: true,
            reason: reason.to_string(),
        }
    }

    fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: reason.to_string(),
        }
    }
}

/// Evaluator over the rule and agent stores
#[derive(Clone, Debug)]
pub struct AclEvaluator {
    store: Store,
}

impl AclEvaluator {
    /// Builds the evaluator over the shared store
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Checks whether `source` may interact with `target`
    ///
    /// Deterministic: equal inputs and rule rows always reproduce the same
    /// decision and reason.
    ///
    /// # Errors
    ///
    /// Returns an error only on storage failure
    pub async fn check(
        &self,
        source: &AgentRecord,
        target: &AgentRecord,
    ) -> DatabaseResult<AclDecision> {
        if target.status != AgentStatus::Active {
            return Ok(AclDecision::deny(&format!(
                "Target agent is {}",
                target.status.as_str()
            )));
        }
        if source.status != AgentStatus::Active {
            return Ok(AclDecision::deny(&format!(
                "Source agent is {}",
                source.status.as_str()
            )));
        }

        if let Some(allowed) = self
            .store
            .acl()
            .find_agent_allow(source.id, target.id)
            .await?
        {
            return Ok(if allowed {
                AclDecision::allow("Agent-level explicit allow")
            } else {
                AclDecision::deny("Agent-level explicit deny")
            });
        }

        if let (Some(source_org), Some(target_org)) = (source.org_id, target.org_id) {
            if let Some(allowed) = self.store.acl().find_org_allow(source_org, target_org).await? {
                return Ok(if allowed {
                    AclDecision::allow("Organization-level allow")
                } else {
                    AclDecision::deny("Organization-level deny")
                });
            }
            if source_org == target_org {
                return Ok(AclDecision::allow("Same organization"));
            }
        }

        if target.is_public {
            return Ok(AclDecision::allow("Target agent is public"));
        }

        Ok(AclDecision::deny("No permission rules allow this access"))
    }

    /// Checks one source against many targets
    ///
    /// Targets are pre-fetched in a single batched read; unknown IDs map to
    /// a deny with reason "Agent not found".
    ///
    /// # Errors
    ///
    /// Returns an error only on storage failure
    pub async fn check_bulk(
        &self,
        source: &AgentRecord,
        target_ids: &[AgentId],
    ) -> DatabaseResult<HashMap<AgentId, AclDecision>> {
        let targets = self.store.agents().get_many(target_ids).await?;
        let by_id: HashMap<AgentId, AgentRecord> =
            targets.into_iter().map(|a| (a.id, a)).collect();

        let mut decisions = HashMap::with_capacity(target_ids.len());
        for id in target_ids {
            let decision = match by_id.get(id) {
                Some(target) => self.check(source, target).await?,
                None => AclDecision::deny("Agent not found"),
            };
            decisions.insert(*id, decision);
        }
        Ok(decisions)
    }

    /// Federation inbound check against a remote stub identity
    ///
    /// Stubs are pinned `inactive`, so the liveness steps do not apply;
    /// explicit rules override the configured default in rule order
    /// (org-level first, then agent-level). The decision is appended to the
    /// policy cache; cache failures are logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns an error only on storage failure while reading rules
    pub async fn check_federation_inbound(
        &self,
        stub_source: &AgentRecord,
        target: &AgentRecord,
        default_allow: bool,
        now: DateTime<Utc>,
    ) -> DatabaseResult<AclDecision> {
        let mut decision = if default_allow {
            AclDecision::allow("Federation default allow")
        } else {
            AclDecision::deny("Federation default deny")
        };

        if let (Some(source_org), Some(target_org)) = (stub_source.org_id, target.org_id) {
            if let Some(allowed) = self.store.acl().find_org_allow(source_org, target_org).await? {
                decision = if allowed {
                    AclDecision::allow("Organization-level allow")
                } else {
                    AclDecision::deny("Organization-level deny")
                };
            }
        }

        if let Some(allowed) = self
            .store
            .acl()
            .find_agent_allow(stub_source.id, target.id)
            .await?
        {
            decision = if allowed {
                AclDecision::allow("Agent-level explicit allow")
            } else {
                AclDecision::deny("Agent-level explicit deny")
            };
        }

        let cache_entry = PolicyDecision {
            source_org_id: stub_source.org_id,
            target_org_id: target.org_id,
            source_agent_id: Some(stub_source.id),
            target_agent_id: Some(target.id),
            allowed: decision.allowed,
        };
        if let Err(error) = self
            .store
            .federation()
            .record_policy_decision(&cache_entry, now)
            .await
        {
            warn!(%error, "failed recording policy cache entry");
        }

        Ok(decision)
    }
}
