//! Agent selection for plan nodes
//!
//! Scores every active agent for a node and picks the top-k:
//! `0.4·capability_match + 0.3·trust + 0.2·success_rate +
//! 0.1·cost_efficiency`.

use crate::storage::AgentRecord;
use std::cmp::Ordering;

/// Suitability of one agent for one node's capability set
#[must_use]
pub fn score_agent(agent: &AgentRecord, required_capabilities: &[String]) -> f64 {
    let capability_match = if required_capabilities.is_empty() {
        1.0
    } else {
        let owned: Vec<String> = agent.capabilities.iter().map(ToString::to_string).collect();
        let matched = required_capabilities
            .iter()
            .filter(|cap| owned.contains(cap))
            .count();
        matched as f64 / required_capabilities.len() as f64
    };

    let cost_efficiency = (1.0 / (agent.cost_per_request + 0.01)).min(1.0);

    0.4 * capability_match
        + 0.3 * agent.trust_score.as_f64()
        + 0.2 * agent.success_rate()
        + 0.1 * cost_efficiency
}

/// Top-k agents for a node, best first
#[must_use]
pub fn select_top_k(
    candidates: &[AgentRecord],
    required_capabilities: &[String],
    k: usize,
) -> Vec<AgentRecord> {
    let mut scored: Vec<(f64, &AgentRecord)> = candidates
        .iter()
        .map(|agent| (score_agent(agent, required_capabilities), agent))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    scored
        .into_iter()
        .take(k)
        .map(|(_, agent)| agent.clone())
        .collect()
}
