//! Orchestrator core
//!
//! Intent → decomposition → DAG → per-node execution → synthesis. Each
//! topological level runs its nodes concurrently; each node runs its
//! selected agents through the chosen collaboration pattern. The plan,
//! every collaboration step, and every per-agent result are persisted, and
//! progress events stream to the task and user channels.

pub mod dag;
pub mod executor;
pub mod intent;
pub mod patterns;
pub mod selection;

pub use dag::{GraphError, TaskGraph, TaskNode};
pub use executor::{MarketNodeExecutor, RoutedNodeExecutor};
pub use intent::{IntentAnalysis, IntentAnalyzer, KeywordIntentAnalyzer, SubIntent};
pub use patterns::{NodeExecutor, NodeResult, Pattern, PatternEngine, PatternOutcome, synthesize};
pub use selection::{score_agent, select_top_k};

use crate::database::DatabaseError;
use crate::domain_types::{PlanId, UserId};
use crate::presence::PresenceRegistry;
use crate::storage::{AgentRecord, PlanStatus, Store};
use crate::time_provider::SharedTimeProvider;
use futures::future::join_all;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Orchestrator errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The query decomposed into nothing executable
    #[error("Bad request: {reason}")]
    BadRequest {
        /// Why the query was rejected
        reason: String,
    },

    /// The dependency graph was invalid
    #[error("Graph error: {source}")]
    Graph {
        /// Underlying graph failure
        #[from]
        source: GraphError,
    },

    /// No active agent qualified for a step
    #[error("No agents available for step {step}")]
    NoAgents {
        /// The unassignable step
        step: String,
    },

    /// Storage failure
    #[error("Storage error: {source}")]
    Storage {
        /// Underlying database error
        #[from]
        source: DatabaseError,
    },
}

/// Result of one orchestration run
#[derive(Debug, Clone)]
pub struct OrchestrationOutcome {
    /// The persisted plan
    pub plan_id: PlanId,
    /// Pattern the plan executed under
    pub pattern: Pattern,
    /// Synthesized final result
    pub final_result: Value,
    /// Number of executed steps
    pub steps: usize,
    /// Total wall-clock duration
    pub duration_ms: i64,
}

/// The orchestrator core
pub struct Orchestrator {
    store: Store,
    presence: Arc<PresenceRegistry>,
    analyzer: Arc<dyn IntentAnalyzer>,
    executor: Arc<dyn NodeExecutor>,
    time: SharedTimeProvider,
}

impl Orchestrator {
    /// Builds the orchestrator over the shared runtime services
    pub fn new(
        store: Store,
        presence: Arc<PresenceRegistry>,
        analyzer: Arc<dyn IntentAnalyzer>,
        executor: Arc<dyn NodeExecutor>,
        time: SharedTimeProvider,
    ) -> Self {
        Self {
            store,
            presence,
            analyzer,
            executor,
            time,
        }
    }

    /// Runs the full orchestration pipeline for a user query
    ///
    /// # Errors
    ///
    /// Returns an error for empty queries, cyclic graphs, unassignable
    /// steps, or storage failure; the persisted plan is marked failed in
    /// every error path after plan creation
    pub async fn orchestrate(
        &self,
        user_id: UserId,
        query: &str,
    ) -> Result<OrchestrationOutcome, OrchestratorError> {
        if query.trim().is_empty() {
            return Err(OrchestratorError::BadRequest {
                reason: "query is empty".to_string(),
            });
        }
        let started = self.time.now();

        let analysis = self.analyzer.analyze(query).await;
        let graph = TaskGraph::build(&analysis.sub_intents, &analysis.pattern);
        let levels = graph.levels()?;

        let plan_id = self
            .store
            .plans()
            .insert_plan(
                user_id,
                query,
                analysis.pattern.as_str(),
                analysis.complexity,
                &graph.to_json(),
                started,
            )
            .await?;

        self.emit(
            plan_id,
            user_id,
            json!({"type": "task_started", "task_id": plan_id.to_string(), "query": query}),
        );
        self.emit(
            plan_id,
            user_id,
            json!({
                "type": "intent_parsed",
                "task_id": plan_id.to_string(),
                "pattern": analysis.pattern.as_str(),
                "sub_intents": analysis.sub_intents.len(),
                "complexity": analysis.complexity,
            }),
        );

        match self
            .execute_plan(plan_id, user_id, &analysis, &graph, &levels)
            .await
        {
            Ok(final_result) => {
                let duration_ms = (self.time.now() - started).num_milliseconds();
                self.store
                    .plans()
                    .finish_plan(
                        plan_id,
                        PlanStatus::Completed,
                        Some(&final_result),
                        duration_ms,
                        self.time.now(),
                    )
                    .await?;
                self.emit(
                    plan_id,
                    user_id,
                    json!({
                        "type": "task_complete",
                        "task_id": plan_id.to_string(),
                        "result": final_result.clone(),
                        "duration_ms": duration_ms,
                    }),
                );
                info!(plan = %plan_id, duration_ms, "orchestration complete");
                Ok(OrchestrationOutcome {
                    plan_id,
                    pattern: analysis.pattern.clone(),
                    final_result,
                    steps: graph.nodes.len(),
                    duration_ms,
                })
            }
            Err(error) => {
                let duration_ms = (self.time.now() - started).num_milliseconds();
                if let Err(finish_error) = self
                    .store
                    .plans()
                    .finish_plan(plan_id, PlanStatus::Failed, None, duration_ms, self.time.now())
                    .await
                {
                    warn!(plan = %plan_id, %finish_error, "failed marking plan failed");
                }
                self.emit(
                    plan_id,
                    user_id,
                    json!({
                        "type": "error",
                        "task_id": plan_id.to_string(),
                        "detail": error.to_string(),
                    }),
                );
                Err(error)
            }
        }
    }

    async fn execute_plan(
        &self,
        plan_id: PlanId,
        user_id: UserId,
        analysis: &IntentAnalysis,
        graph: &TaskGraph,
        levels: &[Vec<String>],
    ) -> Result<Value, OrchestratorError> {
        let candidates = self.store.agents().list_active().await?;
        let per_step = analysis.pattern.agents_per_step();

        let mut assignments: HashMap<String, Vec<AgentRecord>> = HashMap::new();
        for node in &graph.nodes {
            let selected = select_top_k(&candidates, &node.capabilities, per_step);
            if selected.is_empty() {
                return Err(OrchestratorError::NoAgents {
                    step: node.id.clone(),
                });
            }
            assignments.insert(node.id.clone(), selected);
        }

        let assignments_json = json!(
            assignments
                .iter()
                .map(|(step, agents)| {
                    (
                        step.clone(),
                        agents.iter().map(|a| a.id.to_string()).collect::<Vec<_>>(),
                    )
                })
                .collect::<HashMap<_, _>>()
        );
        self.store
            .plans()
            .set_assignments(plan_id, &assignments_json)
            .await?;
        self.emit(
            plan_id,
            user_id,
            json!({
                "type": "agents_discovered",
                "task_id": plan_id.to_string(),
                "assignments": assignments_json,
            }),
        );

        let engine = PatternEngine::new(self.executor.as_ref());
        let mut context = json!({});
        let mut step_results: HashMap<String, Value> = HashMap::new();
        let mut ordered_syntheses: Vec<(usize, Value, f64)> = Vec::new();

        for level in levels {
            let executions = level.iter().filter_map(|step_id| {
                let node = graph.node(step_id)?;
                let agents = assignments.get(step_id)?;
                Some(self.execute_node(plan_id, user_id, &analysis.pattern, node, agents, &context, &engine))
            });
            let outcomes = join_all(executions).await;

            for outcome in outcomes {
                let (node_index, step_id, pattern_outcome) = outcome?;
                let confidence = mean_confidence(&pattern_outcome.results);
                step_results.insert(step_id.clone(), pattern_outcome.synthesized.clone());
                ordered_syntheses.push((node_index, pattern_outcome.synthesized, confidence));
            }
            context = json!(step_results);
        }

        ordered_syntheses.sort_by_key(|(index, _, _)| *index);
        Ok(final_synthesis(&analysis.pattern, &ordered_syntheses))
    }

    /// Executes one node: records the collaboration, runs the pattern,
    /// records per-agent results, and emits step events
    #[allow(clippy::too_many_arguments)]
    async fn execute_node(
        &self,
        plan_id: PlanId,
        user_id: UserId,
        pattern: &Pattern,
        node: &TaskNode,
        agents: &[AgentRecord],
        context: &Value,
        engine: &PatternEngine<'_>,
    ) -> Result<(usize, String, PatternOutcome), OrchestratorError> {
        let step_started = self.time.now();
        self.emit(
            plan_id,
            user_id,
            json!({
                "type": "step_started",
                "task_id": plan_id.to_string(),
                "step": node.id.clone(),
                "description": node.description.clone(),
            }),
        );

        let collaboration_id = self
            .store
            .plans()
            .insert_collaboration(
                plan_id,
                &node.id,
                pattern.as_str(),
                &node.description,
                &agents.iter().map(|a| a.id).collect::<Vec<_>>(),
                &json!({}),
                step_started,
            )
            .await?;

        let outcome = engine
            .execute(pattern, agents, &node.description, context)
            .await;

        for result in &outcome.results {
            if let Err(error) = self
                .store
                .plans()
                .insert_result(
                    collaboration_id,
                    result.agent_id,
                    &result.output,
                    result.confidence,
                    result.duration_ms,
                )
                .await
            {
                warn!(plan = %plan_id, step = %node.id, %error, "result record failed");
            }
        }

        let duration_ms = (self.time.now() - step_started).num_milliseconds();
        self.store
            .plans()
            .complete_collaboration(
                collaboration_id,
                &outcome.synthesized,
                duration_ms,
                self.time.now(),
            )
            .await?;

        self.emit(
            plan_id,
            user_id,
            json!({
                "type": "step_completed",
                "task_id": plan_id.to_string(),
                "step": node.id.clone(),
                "result": outcome.synthesized.clone(),
                "duration_ms": duration_ms,
            }),
        );
        Ok((node.index, node.id.clone(), outcome))
    }

    /// Fans an event out to the task channel and the owning user's channel
    fn emit(&self, plan_id: PlanId, user_id: UserId, event: Value) {
        self.presence.send_to_task(plan_id, &event);
        self.presence.send_to_user(user_id, &event);
    }
}

fn mean_confidence(results: &[patterns::NodeResult]) -> f64 {
    if results.is_empty() {
        0.0
    } else {
        results.iter().map(|r| r.confidence).sum::<f64>() / results.len() as f64
    }
}

/// Plan-level synthesis over per-step syntheses
///
/// Sequential plans resolve to the final step's output; everything else
/// resolves to the single step's synthesis, or a merged document when the
/// decomposition produced several peer steps.
fn final_synthesis(pattern: &Pattern, ordered: &[(usize, Value, f64)]) -> Value {
    match ordered {
        [] => Value::Null,
        [(_, only, _)] => only.clone(),
        _ if matches!(pattern, Pattern::Sequential) => {
            ordered.last().map_or(Value::Null, |(_, v, _)| v.clone())
        }
        _ => {
            let confidence =
                ordered.iter().map(|(_, _, c)| c).sum::<f64>() / ordered.len() as f64;
            json!({
                "type": "merged",
                "outputs": ordered.iter().map(|(_, v, _)| v.clone()).collect::<Vec<_>>(),
                "confidence": confidence,
            })
        }
    }
}
