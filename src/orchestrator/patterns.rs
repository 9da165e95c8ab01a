//! Collaboration patterns and result synthesis
//!
//! The synthesizer functions are pure: `(pattern, results) → synthesized
//! result`. The engine drives one step's agents through a pattern using a
//! pluggable [`NodeExecutor`], which is where real dispatch (messaging or
//! market) plugs in.

use crate::domain_types::AgentId;
use crate::storage::AgentRecord;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};
use std::collections::HashMap;

/// Collaboration pattern with per-variant configuration
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// Pipeline: each step feeds the next
    Sequential,
    /// Independent execution, outputs merged
    Parallel,
    /// Trust-weighted majority over outputs
    Vote,
    /// Fixed rounds where agents see peers' prior-round outputs
    Debate {
        /// Number of rounds
        rounds: u32,
    },
    /// Iterations sharing a growing high-confidence knowledge set
    Swarm {
        /// Number of iterations
        iterations: u32,
    },
    /// Iterate until one answer dominates, else weighted vote
    Consensus {
        /// Maximum rounds before falling back
        max_rounds: u32,
        /// Fraction of identical outputs that terminates early
        threshold: f64,
    },
}

impl Pattern {
    /// Debate with the default three rounds
    #[must_use]
    pub fn debate() -> Self {
        Self::Debate { rounds: 3 }
    }

    /// Swarm with the default three iterations
    #[must_use]
    pub fn swarm() -> Self {
        Self::Swarm { iterations: 3 }
    }

    /// Consensus with the default five rounds and 0.66 threshold
    #[must_use]
    pub fn consensus() -> Self {
        Self::Consensus {
            max_rounds: 5,
            threshold: 0.66,
        }
    }

    /// Display and persistence label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Vote => "vote",
            Self::Debate { .. } => "debate",
            Self::Swarm { .. } => "swarm",
            Self::Consensus { .. } => "consensus",
        }
    }

    /// How many agents a step under this pattern wants
    #[must_use]
    pub fn agents_per_step(&self) -> usize {
        match self {
            Self::Sequential => 1,
            _ => 3,
        }
    }
}

/// One agent's result for one task
#[derive(Debug, Clone)]
pub struct NodeResult {
    /// The executing agent
    pub agent_id: AgentId,
    /// Its display name
    pub agent_name: String,
    /// The produced output
    pub output: Value,
    /// Self-reported confidence
    pub confidence: f64,
    /// Result quality estimate (defaults to 1.0 when unreported)
    pub quality: f64,
    /// Wall-clock duration of the call
    pub duration_ms: i64,
}

/// Executes one agent against one task
///
/// Implementations dispatch over the messaging plane or the contract
/// market; tests may plug in closures.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Runs `task` on `agent` with `context` from prior steps
    async fn execute(&self, agent: &AgentRecord, task: &str, context: &Value) -> NodeResult;
}

/// Pure synthesis functions from results to a combined value
pub mod synthesize {
    use super::{HashMap, NodeResult, Value, json};

    /// Merges all outputs; confidence is the mean
    #[must_use]
    pub fn merge(results: &[NodeResult]) -> Value {
        let confidence = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.confidence).sum::<f64>() / results.len() as f64
        };
        json!({
            "type": "merged",
            "sources": results.iter().map(|r| r.agent_name.clone()).collect::<Vec<_>>(),
            "outputs": results.iter().map(|r| r.output.clone()).collect::<Vec<_>>(),
            "confidence": confidence,
        })
    }

    /// Weighted majority over serialized outputs
    ///
    /// Confidence is the winner's weight share of the total.
    #[must_use]
    pub fn vote(results: &[NodeResult], weights: &[f64]) -> Value {
        let mut tally: HashMap<String, f64> = HashMap::new();
        for (i, result) in results.iter().enumerate() {
            let weight = weights.get(i).copied().unwrap_or(1.0);
            *tally.entry(result.output.to_string()).or_insert(0.0) += weight;
        }
        let total: f64 = tally.values().sum();
        let winner = tally
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(value, score)| (value.clone(), *score));

        match winner {
            Some((value, score)) if total > 0.0 => {
                let parsed: Value = serde_json::from_str(&value).unwrap_or(Value::Null);
                json!({
                    "type": "vote",
                    "winner": parsed,
                    "confidence": score / total,
                    "distribution": tally,
                    "total_votes": total,
                })
            }
            _ => json!({"type": "vote", "winner": Value::Null, "confidence": 0.0}),
        }
    }

    /// Winner of a debate: highest `confidence · quality` in the last round
    #[must_use]
    pub fn debate_winner(final_round: &[NodeResult], rounds: usize) -> Value {
        let winner = final_round.iter().max_by(|a, b| {
            (a.confidence * a.quality)
                .partial_cmp(&(b.confidence * b.quality))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        match winner {
            Some(result) => json!({
                "type": "debate_winner",
                "winner": result.output,
                "agent": result.agent_name,
                "rounds": rounds,
                "confidence": result.confidence,
            }),
            None => json!({"type": "debate_winner", "winner": Value::Null, "rounds": rounds}),
        }
    }

    /// Consensus when one serialized output reaches `threshold` of the total
    #[must_use]
    pub fn consensus(results: &[NodeResult], threshold: f64) -> Option<Value> {
        if results.is_empty() {
            return None;
        }
        let mut groups: HashMap<String, Vec<&NodeResult>> = HashMap::new();
        for result in results {
            groups
                .entry(result.output.to_string())
                .or_default()
                .push(result);
        }
        let total = results.len() as f64;
        groups.into_iter().find_map(|(value, group)| {
            let agreement = group.len() as f64 / total;
            (agreement >= threshold).then(|| {
                let parsed: Value = serde_json::from_str(&value).unwrap_or(Value::Null);
                json!({
                    "type": "consensus",
                    "result": parsed,
                    "agreement": agreement,
                    "threshold": threshold,
                    "supporting_agents": group
                        .iter()
                        .map(|r| r.agent_name.clone())
                        .collect::<Vec<_>>(),
                })
            })
        })
    }
}

/// Outcome of running one step's collaboration
#[derive(Debug, Clone)]
pub struct PatternOutcome {
    /// Final-round per-agent results
    pub results: Vec<NodeResult>,
    /// Synthesized combined value
    pub synthesized: Value,
    /// Rounds or iterations executed
    pub rounds: usize,
}

/// Drives a set of agents through a pattern for a single task
pub struct PatternEngine<'a> {
    executor: &'a dyn NodeExecutor,
}

impl<'a> PatternEngine<'a> {
    /// Builds the engine over an executor
    pub fn new(executor: &'a dyn NodeExecutor) -> Self {
        Self { executor }
    }

    /// Executes `task` with `agents` under `pattern`
    pub async fn execute(
        &self,
        pattern: &Pattern,
        agents: &[AgentRecord],
        task: &str,
        context: &Value,
    ) -> PatternOutcome {
        match pattern {
            Pattern::Sequential => self.sequential(agents, task, context).await,
            Pattern::Parallel => self.parallel(agents, task, context).await,
            Pattern::Vote => self.vote(agents, task, context).await,
            Pattern::Debate { rounds } => self.debate(agents, task, context, *rounds).await,
            Pattern::Swarm { iterations } => self.swarm(agents, task, context, *iterations).await,
            Pattern::Consensus {
                max_rounds,
                threshold,
            } => {
                self.consensus(agents, task, context, *max_rounds, *threshold)
                    .await
            }
        }
    }

    async fn run_all(&self, agents: &[AgentRecord], task: &str, context: &Value) -> Vec<NodeResult> {
        join_all(
            agents
                .iter()
                .map(|agent| self.executor.execute(agent, task, context)),
        )
        .await
    }

    async fn sequential(
        &self,
        agents: &[AgentRecord],
        task: &str,
        context: &Value,
    ) -> PatternOutcome {
        let mut results: Vec<NodeResult> = Vec::with_capacity(agents.len());
        let mut context = context.clone();
        for (i, agent) in agents.iter().enumerate() {
            let step_task = if i == 0 {
                task.to_string()
            } else {
                format!("{task}\nPrevious result: {}", results[i - 1].output)
            };
            let result = self.executor.execute(agent, &step_task, &context).await;
            if let Value::Object(map) = &mut context {
                map.insert(format!("step_{i}"), result.output.clone());
            }
            results.push(result);
        }
        let synthesized = results
            .last()
            .map_or(Value::Null, |r| r.output.clone());
        PatternOutcome {
            results,
            synthesized,
            rounds: 1,
        }
    }

    async fn parallel(
        &self,
        agents: &[AgentRecord],
        task: &str,
        context: &Value,
    ) -> PatternOutcome {
        let results = self.run_all(agents, task, context).await;
        let synthesized = synthesize::merge(&results);
        PatternOutcome {
            results,
            synthesized,
            rounds: 1,
        }
    }

    async fn vote(&self, agents: &[AgentRecord], task: &str, context: &Value) -> PatternOutcome {
        let results = self.run_all(agents, task, context).await;
        let weights: Vec<f64> = agents.iter().map(|a| a.trust_score.as_f64()).collect();
        let synthesized = synthesize::vote(&results, &weights);
        PatternOutcome {
            results,
            synthesized,
            rounds: 1,
        }
    }

    async fn debate(
        &self,
        agents: &[AgentRecord],
        task: &str,
        context: &Value,
        rounds: u32,
    ) -> PatternOutcome {
        let mut last_round: Vec<NodeResult> = Vec::new();
        for round in 0..rounds.max(1) {
            let round_task = if round == 0 {
                task.to_string()
            } else {
                let mut prompt = format!("{task}\n\nPrevious responses:\n");
                for result in &last_round {
                    prompt.push_str(&format!("- {}: {}\n", result.agent_name, result.output));
                }
                prompt
            };
            last_round = self.run_all(agents, &round_task, context).await;
        }
        let synthesized = synthesize::debate_winner(&last_round, rounds.max(1) as usize);
        PatternOutcome {
            results: last_round,
            synthesized,
            rounds: rounds.max(1) as usize,
        }
    }

    async fn swarm(
        &self,
        agents: &[AgentRecord],
        task: &str,
        context: &Value,
        iterations: u32,
    ) -> PatternOutcome {
        let mut knowledge: Vec<Value> = Vec::new();
        let mut last_iteration: Vec<NodeResult> = Vec::new();
        for _ in 0..iterations.max(1) {
            let iteration_context = json!({
                "base": context,
                "shared_knowledge": knowledge.clone(),
            });
            last_iteration = self.run_all(agents, task, &iteration_context).await;
            knowledge.extend(
                last_iteration
                    .iter()
                    .filter(|r| r.confidence > 0.7)
                    .map(|r| r.output.clone()),
            );
        }
        let synthesized = synthesize::merge(&last_iteration);
        PatternOutcome {
            results: last_iteration,
            synthesized,
            rounds: iterations.max(1) as usize,
        }
    }

    async fn consensus(
        &self,
        agents: &[AgentRecord],
        task: &str,
        context: &Value,
        max_rounds: u32,
        threshold: f64,
    ) -> PatternOutcome {
        let mut last_round: Vec<NodeResult> = Vec::new();
        for round in 0..max_rounds.max(1) {
            let round_context = json!({"base": context, "round": round});
            last_round = self.run_all(agents, task, &round_context).await;
            if let Some(agreement) = synthesize::consensus(&last_round, threshold) {
                return PatternOutcome {
                    results: last_round,
                    synthesized: agreement,
                    rounds: round as usize + 1,
                };
            }
        }
        // No convergence: fall back to a trust-weighted vote of the last round.
        let weights: Vec<f64> = agents.iter().map(|a| a.trust_score.as_f64()).collect();
        let synthesized = synthesize::vote(&last_round, &weights);
        PatternOutcome {
            results: last_round,
            synthesized,
            rounds: max_rounds.max(1) as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, output: Value, confidence: f64) -> NodeResult {
        NodeResult {
            agent_id: AgentId::generate(),
            agent_name: name.to_string(),
            output,
            confidence,
            quality: 1.0,
            duration_ms: 10,
        }
    }

    #[test]
    fn merge_averages_confidence() {
        let results = vec![
            result("a", json!({"r": 1}), 0.8),
            result("b", json!({"r": 2}), 0.6),
        ];
        let merged = synthesize::merge(&results);
        assert_eq!(merged["type"], "merged");
        assert!((merged["confidence"].as_f64().unwrap() - 0.7).abs() < 1e-9);
        assert_eq!(merged["outputs"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn weighted_vote_matches_hand_computation() {
        // Trust weights 0.6 and 0.7 back X; 0.9 backs Y. X wins 1.3/2.2.
        let results = vec![
            result("a", json!({"r": "X"}), 0.9),
            result("b", json!({"r": "X"}), 0.9),
            result("c", json!({"r": "Y"}), 0.9),
        ];
        let verdict = synthesize::vote(&results, &[0.6, 0.7, 0.9]);
        assert_eq!(verdict["winner"], json!({"r": "X"}));
        let confidence = verdict["confidence"].as_f64().unwrap();
        assert!((confidence - 1.3 / 2.2).abs() < 1e-9);
    }

    #[test]
    fn debate_winner_maximizes_confidence_times_quality() {
        let mut strong = result("a", json!({"r": "deep"}), 0.9);
        strong.quality = 0.9;
        let mut weak = result("b", json!({"r": "shallow"}), 0.95);
        weak.quality = 0.5;
        let verdict = synthesize::debate_winner(&[strong, weak], 3);
        assert_eq!(verdict["winner"], json!({"r": "deep"}));
        assert_eq!(verdict["rounds"], 3);
    }

    #[test]
    fn consensus_requires_threshold() {
        let agree = vec![
            result("a", json!("yes"), 0.9),
            result("b", json!("yes"), 0.9),
            result("c", json!("no"), 0.9),
        ];
        let reached = synthesize::consensus(&agree, 0.66).unwrap();
        assert_eq!(reached["result"], json!("yes"));
        assert!(synthesize::consensus(&agree, 0.7).is_none());
    }

    struct EchoExecutor;

    #[async_trait]
    impl NodeExecutor for EchoExecutor {
        async fn execute(&self, agent: &AgentRecord, task: &str, _context: &Value) -> NodeResult {
            NodeResult {
                agent_id: agent.id,
                agent_name: agent.name.to_string(),
                output: json!({"echo": task.lines().next().unwrap_or_default()}),
                confidence: 0.9,
                quality: 1.0,
                duration_ms: 1,
            }
        }
    }

    async fn test_agents(n: usize) -> Vec<AgentRecord> {
        use crate::database::DatabaseConnection;
        use crate::domain_types::AgentName;
        use crate::storage::{AgentStatus, AgentStore, NewAgent};
        let db = DatabaseConnection::in_memory().await.unwrap();
        let store = AgentStore::new(db);
        let mut agents = Vec::new();
        for i in 0..n {
            agents.push(
                store
                    .insert(
                        NewAgent {
                            name: AgentName::try_new(format!("agent-{i}")).unwrap(),
                            description: String::new(),
                            endpoint: String::new(),
                            capabilities: vec![],
                            category: "general".to_string(),
                            status: AgentStatus::Active,
                            creator_id: None,
                            org_id: None,
                            is_public: true,
                            cost_per_request: 0.0,
                        },
                        chrono::Utc::now(),
                    )
                    .await
                    .unwrap(),
            );
        }
        agents
    }

    #[tokio::test]
    async fn consensus_converges_on_identical_outputs() {
        let agents = test_agents(3).await;
        let engine = PatternEngine::new(&EchoExecutor);
        let outcome = engine
            .execute(&Pattern::consensus(), &agents, "same task", &json!({}))
            .await;
        // Echo agents always agree, so round one terminates the loop.
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.synthesized["type"], "consensus");
    }

    #[tokio::test]
    async fn debate_runs_requested_rounds() {
        let agents = test_agents(2).await;
        let engine = PatternEngine::new(&EchoExecutor);
        let outcome = engine
            .execute(&Pattern::Debate { rounds: 3 }, &agents, "argue", &json!({}))
            .await;
        assert_eq!(outcome.rounds, 3);
        assert_eq!(outcome.synthesized["type"], "debate_winner");
    }
}
