//! Mesh runtime assembly and HTTP serving
//!
//! [`MeshRuntime`] is the single long-lived handle owning the shared
//! services and both background loops (award sweeper, reputation sweep).
//! It is created at startup and torn down at shutdown; nothing here is a
//! process-global.

use crate::acl::AclEvaluator;
use crate::config::AppConfig;
use crate::contracts::{AwardSweeper, ContractEngine};
use crate::database::{DatabaseConnection, DatabaseResult};
use crate::domain_types::{AgentId, AgentName, UserId};
use crate::federation::{FederationClient, InboundProcessor};
use crate::messaging::{MessageRouter, Principal};
use crate::orchestrator::{KeywordIntentAnalyzer, Orchestrator, RoutedNodeExecutor};
use crate::presence::PresenceRegistry;
use crate::rate_limit::{MemoryCounterStore, RateLimiter};
use crate::reputation::ReputationEngine;
use crate::rest_api::{AppState, create_app};
use crate::storage::{AgentStatus, NewAgent, Store};
use crate::time_provider::{SharedTimeProvider, production_time_provider};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Name of the runtime-owned agent that dispatches orchestration steps
const CONDUCTOR_NAME: &str = "conductor";

/// The long-lived mesh runtime handle
pub struct MeshRuntime {
    config: AppConfig,
    store: Store,
    presence: Arc<PresenceRegistry>,
    acl: AclEvaluator,
    reputation: ReputationEngine,
    contracts: ContractEngine,
    router: MessageRouter,
    inbound: InboundProcessor,
    time: SharedTimeProvider,
    shutdown: CancellationToken,
    background: Vec<JoinHandle<()>>,
}

impl MeshRuntime {
    /// Wires every service over the shared store and starts the background
    /// loops
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure during wiring
    pub async fn start(config: AppConfig, database: DatabaseConnection) -> DatabaseResult<Self> {
        Self::start_with_time(config, database, production_time_provider()).await
    }

    /// As [`MeshRuntime::start`] with an injected clock, for tests
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure during wiring
    pub async fn start_with_time(
        config: AppConfig,
        database: DatabaseConnection,
        time: SharedTimeProvider,
    ) -> DatabaseResult<Self> {
        let store = Store::new(database);
        let presence = Arc::new(PresenceRegistry::new());
        let acl = AclEvaluator::new(store.clone());
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), time.clone());
        let reputation = ReputationEngine::new(store.clone(), time.clone());
        let contracts = ContractEngine::new(
            store.clone(),
            reputation.clone(),
            presence.clone(),
            config.mesh.clone(),
            time.clone(),
        );
        let federation_client = Arc::new(FederationClient::new(config.federation.clone()));
        let router = MessageRouter::new(
            store.clone(),
            acl.clone(),
            limiter,
            presence.clone(),
            federation_client.clone(),
            config.clone(),
            time.clone(),
        );
        let inbound = InboundProcessor::new(
            store.clone(),
            acl.clone(),
            presence.clone(),
            federation_client,
            config.federation.clone(),
            time.clone(),
        );

        let shutdown = CancellationToken::new();
        let mut background = Vec::new();

        let sweeper = AwardSweeper::new(
            contracts.clone(),
            config.mesh.award_sweep_interval,
            time.clone(),
        );
        background.push(tokio::spawn(sweeper.run(shutdown.clone())));

        let sweep_engine = reputation.clone();
        let sweep_interval = config.mesh.trust_recalc_interval;
        let sweep_token = shutdown.clone();
        background.push(tokio::spawn(async move {
            sweep_engine.run_sweep(sweep_interval, sweep_token).await;
        }));

        info!(domain = %config.federation.domain, "mesh runtime started");
        Ok(Self {
            config,
            store,
            presence,
            acl,
            reputation,
            contracts,
            router,
            inbound,
            time,
            shutdown,
            background,
        })
    }

    /// The shared store
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The presence registry
    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    /// The ACL evaluator
    pub fn acl(&self) -> &AclEvaluator {
        &self.acl
    }

    /// The reputation engine
    pub fn reputation(&self) -> &ReputationEngine {
        &self.reputation
    }

    /// The contract lifecycle engine
    pub fn contracts(&self) -> &ContractEngine {
        &self.contracts
    }

    /// The A2A message router
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// The inbound federation pipeline
    pub fn inbound(&self) -> &InboundProcessor {
        &self.inbound
    }

    /// The runtime configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Builds the federation HTTP app over this runtime
    pub fn app(&self) -> Router {
        create_app(AppState {
            inbound: self.inbound.clone(),
            federation: self.config.federation.clone(),
        })
    }

    /// Builds an orchestrator dispatching over the messaging plane
    ///
    /// Ensures the conductor identity exists, then wires a
    /// [`RoutedNodeExecutor`] with the given per-node polling budget.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure while creating the conductor
    pub async fn orchestrator(&self, poll_budget: Duration) -> DatabaseResult<Orchestrator> {
        let conductor_id = self.ensure_conductor().await?;
        let executor = RoutedNodeExecutor::new(
            self.router.clone(),
            self.store.clone(),
            self.time.clone(),
            Principal::User {
                user_id: UserId::generate(),
            },
            conductor_id,
            poll_budget,
        );
        Ok(Orchestrator::new(
            self.store.clone(),
            self.presence.clone(),
            Arc::new(KeywordIntentAnalyzer::new()),
            Arc::new(executor),
            self.time.clone(),
        ))
    }

    async fn ensure_conductor(&self) -> DatabaseResult<AgentId> {
        if let Some(existing) = self.store.agents().find_by_name(CONDUCTOR_NAME).await? {
            return Ok(existing.id);
        }
        let conductor = self
            .store
            .agents()
            .insert(
                NewAgent {
                    name: AgentName::try_new(CONDUCTOR_NAME.to_string())
                        .unwrap_or_else(|_| unreachable!("static name is valid")),
                    description: "Runtime conductor for orchestrated dispatch".to_string(),
                    endpoint: String::new(),
                    capabilities: vec![],
                    category: "system".to_string(),
                    status: AgentStatus::Active,
                    creator_id: None,
                    org_id: None,
                    is_public: true,
                    cost_per_request: 0.0,
                },
                self.time.now(),
            )
            .await?;
        Ok(conductor.id)
    }

    /// Cancels the background loops and waits for them to stop
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        for handle in self.background.drain(..) {
            let _ = handle.await;
        }
        info!("mesh runtime stopped");
    }
}

/// Binds a listener, returning it with the resolved local address
///
/// # Errors
///
/// Returns an error if the address cannot be bound
pub async fn bind(addr: SocketAddr) -> std::io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let actual = listener.local_addr()?;
    Ok((listener, actual))
}

/// Serves the app until the token is cancelled
///
/// # Errors
///
/// Returns an error if the server fails while running
pub async fn serve_with_graceful_shutdown(
    listener: TcpListener,
    router: Router,
    shutdown_token: CancellationToken,
) -> Result<(), std::io::Error> {
    let shutdown_signal = async move {
        shutdown_token.cancelled().await;
    };
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(std::io::Error::other)?;
    Ok(())
}
