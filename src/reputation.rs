//! Reputation engine
//!
//! Multi-dimensional scoring per agent: quality (0.40), reliability (0.25),
//! speed (0.15), honesty (0.10), collaboration (0.10). Every recomputation
//! writes the current snapshot, appends a history row for trend queries,
//! and refreshes the denormalized trust score on the agent row consumed by
//! award strategies. A periodic sweep recomputes all active agents;
//! individual recomputes fire on settlement.

use crate::database::DatabaseResult;
use crate::domain_types::{AgentId, TrustScoreValue};
use crate::storage::reputation::NewMetric;
use crate::storage::{Store, TrustGrade, TrustSnapshot};
use crate::time_provider::SharedTimeProvider;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Dimension weights for the composite score
mod weights {
    pub(super) const QUALITY: f64 = 0.40;
    pub(super) const RELIABILITY: f64 = 0.25;
    pub(super) const SPEED: f64 = 0.15;
    pub(super) const HONESTY: f64 = 0.10;
    pub(super) const COLLABORATION: f64 = 0.10;
}

/// Neutral score used for every dimension with no data
const DEFAULT_SCORE: f64 = 0.5;

/// Pure dimension scoring functions
mod scoring {
    use super::DEFAULT_SCORE;

    /// Mean validation score over validated deliveries
    pub(super) fn quality(validation_scores: &[f64]) -> f64 {
        mean(validation_scores).unwrap_or(DEFAULT_SCORE)
    }

    /// Success rate with a mild volume boost, capped at 1.0
    pub(super) fn reliability(successful: i64, total: i64) -> f64 {
        if total == 0 {
            return DEFAULT_SCORE;
        }
        let rate = successful as f64 / total as f64;
        let boosted = if total >= 100 {
            rate * 1.05
        } else if total >= 50 {
            rate * 1.02
        } else {
            rate
        };
        boosted.min(1.0)
    }

    /// Per-contract timing score: 1.0 on time, `1/ratio` when late
    pub(super) fn speed(timings: &[(f64, f64)]) -> f64 {
        let scores: Vec<f64> = timings
            .iter()
            .filter(|(_, promised)| *promised > 0.0)
            .map(|(actual, promised)| {
                let ratio = actual / promised;
                if ratio <= 1.0 { 1.0 } else { 1.0 / ratio }
            })
            .collect();
        mean(&scores).unwrap_or(DEFAULT_SCORE)
    }

    /// Confidence accuracy: `1 - |confidence - validation|`, clamped at 0
    pub(super) fn honesty(rows: &[(f64, f64)]) -> f64 {
        let scores: Vec<f64> = rows
            .iter()
            .map(|(confidence, validation)| (1.0 - (confidence - validation).abs()).max(0.0))
            .collect();
        mean(&scores).unwrap_or(DEFAULT_SCORE)
    }

    /// Monotonic in the number of collaboration records, capped at 1.0
    pub(super) fn collaboration(count: i64) -> f64 {
        if count == 0 {
            DEFAULT_SCORE
        } else {
            (0.5 + count as f64 / 100.0).min(1.0)
        }
    }

    pub(super) fn mean(values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }
}

/// Computes and persists trust snapshots
#[derive(Clone, Debug)]
pub struct ReputationEngine {
    store: Store,
    time: SharedTimeProvider,
}

impl ReputationEngine {
    /// Builds the engine over the shared store
    pub fn new(store: Store, time: SharedTimeProvider) -> Self {
        Self { store, time }
    }

    /// Recomputes the full snapshot for one agent and persists it
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or unknown agent
    pub async fn calculate(&self, agent_id: AgentId) -> DatabaseResult<TrustSnapshot> {
        let agent = self.store.agents().get(agent_id).await?.ok_or_else(|| {
            crate::database::StorageError::Database {
                message: format!("agent not found: {agent_id}"),
            }
        })?;

        let validation_scores: Vec<f64> = self
            .store
            .contracts()
            .validated_deliveries_for(agent_id)
            .await?
            .iter()
            .filter_map(|d| d.validation_score.map(|s| s.as_f64()))
            .collect();

        let timings: Vec<(f64, f64)> = self
            .store
            .reputation()
            .metrics_for(agent_id)
            .await?
            .iter()
            .map(|m| (m.execution_time, m.promised_time))
            .collect();

        let honesty_rows = self.store.contracts().honesty_rows(agent_id).await?;
        let collaboration_count = self.store.reputation().collaboration_count(agent_id).await?;
        let (total, settled, failed) = self.store.reputation().contract_stats(agent_id).await?;

        let quality = scoring::quality(&validation_scores);
        let reliability = scoring::reliability(agent.successful_calls, agent.total_calls);
        let speed = scoring::speed(&timings);
        let honesty = scoring::honesty(&honesty_rows);
        let collaboration = scoring::collaboration(collaboration_count);

        let composite = quality * weights::QUALITY
            + reliability * weights::RELIABILITY
            + speed * weights::SPEED
            + honesty * weights::HONESTY
            + collaboration * weights::COLLABORATION;
        let trust_score = TrustScoreValue::clamped(composite);

        let snapshot = TrustSnapshot {
            agent_id,
            quality,
            reliability,
            speed,
            honesty,
            collaboration,
            trust_score,
            trust_grade: TrustGrade::from_score(trust_score.as_f64()),
            total_contracts: total,
            successful_contracts: settled,
            failed_contracts: failed,
            last_calculated: self.time.now(),
        };

        self.store.reputation().save_snapshot(&snapshot).await?;
        self.store
            .agents()
            .set_trust_score(agent_id, trust_score, self.time.now())
            .await?;

        info!(
            agent = %agent_id,
            trust = trust_score.as_f64(),
            grade = snapshot.trust_grade.as_str(),
            "trust score recalculated"
        );
        Ok(snapshot)
    }

    /// Appends a settlement metric and recomputes the agent's snapshot
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure
    pub async fn record_settlement(&self, metric: NewMetric) -> DatabaseResult<TrustSnapshot> {
        let agent_id = metric.agent_id;
        self.store
            .reputation()
            .append_metric(metric, self.time.now())
            .await?;
        self.calculate(agent_id).await
    }

    /// Current composite trust for an agent, computing it on first access
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure
    pub async fn trust_score(&self, agent_id: AgentId) -> DatabaseResult<TrustScoreValue> {
        match self.store.reputation().get_snapshot(agent_id).await? {
            Some(snapshot) => Ok(snapshot.trust_score),
            None => Ok(self.calculate(agent_id).await?.trust_score),
        }
    }

    /// Recomputes every active agent; failures are logged and skipped
    ///
    /// Returns the number of agents successfully recomputed.
    ///
    /// # Errors
    ///
    /// Returns an error only when the active-agent listing fails
    pub async fn recalculate_all(&self) -> DatabaseResult<usize> {
        let agents = self.store.agents().list_active().await?;
        let mut count = 0;
        for agent in agents {
            match self.calculate(agent.id).await {
                Ok(_) => count += 1,
                Err(error) => error!(agent = %agent.id, %error, "trust recalculation failed"),
            }
        }
        info!(count, "trust sweep complete");
        Ok(count)
    }

    /// Periodic sweep over all active agents until cancelled
    ///
    /// Recoverable errors never terminate the loop.
    pub async fn run_sweep(&self, interval: Duration, shutdown: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "reputation sweep started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = self.time.sleep(interval) => {}
            }
            if shutdown.is_cancelled() {
                break;
            }
            if let Err(error) = self.recalculate_all().await {
                error!(%error, "trust sweep tick failed");
            }
        }
        info!("reputation sweep stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseConnection;
    use crate::domain_types::{AgentName, ContractId};
    use crate::storage::{AgentStatus, NewAgent};
    use crate::time_provider::MockTimeProvider;
    use chrono::Utc;
    use std::sync::Arc;

    async fn setup() -> (Store, ReputationEngine) {
        let db = DatabaseConnection::in_memory().await.unwrap();
        let store = Store::new(db);
        let engine = ReputationEngine::new(store.clone(), Arc::new(MockTimeProvider::new()));
        (store, engine)
    }

    async fn register(store: &Store, name: &str) -> AgentId {
        store
            .agents()
            .insert(
                NewAgent {
                    name: AgentName::try_new(name.to_string()).unwrap(),
                    description: String::new(),
                    endpoint: String::new(),
                    capabilities: vec![],
                    category: "general".to_string(),
                    status: AgentStatus::Active,
                    creator_id: None,
                    org_id: None,
                    is_public: false,
                    cost_per_request: 0.0,
                },
                Utc::now(),
            )
            .await
            .unwrap()
            .id
    }

    #[test]
    fn dimension_defaults_are_neutral() {
        assert_eq!(scoring::quality(&[]), 0.5);
        assert_eq!(scoring::reliability(0, 0), 0.5);
        assert_eq!(scoring::speed(&[]), 0.5);
        assert_eq!(scoring::honesty(&[]), 0.5);
        assert_eq!(scoring::collaboration(0), 0.5);
    }

    #[test]
    fn reliability_volume_boost() {
        assert!((scoring::reliability(40, 40) - 1.0).abs() < 1e-9);
        assert!((scoring::reliability(45, 50) - 0.9 * 1.02).abs() < 1e-9);
        assert!((scoring::reliability(90, 100) - 0.9 * 1.05).abs() < 1e-9);
        // Boost never pushes past 1.0.
        assert!((scoring::reliability(100, 100) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn speed_penalizes_lateness_proportionally() {
        assert!((scoring::speed(&[(2.0, 3.0)]) - 1.0).abs() < 1e-9);
        assert!((scoring::speed(&[(6.0, 3.0)]) - 0.5).abs() < 1e-9);
        assert!((scoring::speed(&[(9.0, 3.0)]) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn honesty_clamps_at_zero() {
        assert!((scoring::honesty(&[(0.9, 0.9)]) - 1.0).abs() < 1e-9);
        assert!((scoring::honesty(&[(1.0, 0.0)]) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn collaboration_is_monotonic_and_capped() {
        assert!(scoring::collaboration(1) > scoring::collaboration(0));
        assert!(scoring::collaboration(10) > scoring::collaboration(1));
        assert_eq!(scoring::collaboration(50), 1.0);
        assert_eq!(scoring::collaboration(500), 1.0);
    }

    #[tokio::test]
    async fn new_agent_defaults_to_neutral_composite() {
        let (store, engine) = setup().await;
        let agent = register(&store, "fresh").await;

        let snapshot = engine.calculate(agent).await.unwrap();
        assert!((snapshot.trust_score.as_f64() - 0.5).abs() < 1e-9);
        assert_eq!(snapshot.trust_grade, TrustGrade::D);
    }

    #[tokio::test]
    async fn successful_on_time_metrics_never_decrease_composite() {
        let (store, engine) = setup().await;
        let agent = register(&store, "steady").await;

        let mut previous = engine.calculate(agent).await.unwrap().trust_score.as_f64();
        for _ in 0..10 {
            store
                .agents()
                .record_call(agent, true, 100.0, Utc::now())
                .await
                .unwrap();
            let snapshot = engine
                .record_settlement(NewMetric {
                    agent_id: agent,
                    contract_id: ContractId::generate(),
                    execution_time: 2.0,
                    promised_time: 2.0,
                    success: true,
                    user_rating: Some(5),
                })
                .await
                .unwrap();
            let current = snapshot.trust_score.as_f64();
            assert!(current >= previous - 1e-9);
            previous = current;
        }
    }

    #[tokio::test]
    async fn snapshot_history_grows_per_recalculation() {
        let (store, engine) = setup().await;
        let agent = register(&store, "tracked").await;
        let since = Utc::now() - chrono::Duration::seconds(5);

        engine.calculate(agent).await.unwrap();
        engine.calculate(agent).await.unwrap();

        let history = store
            .reputation()
            .history_since(agent, since)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
    }
}
