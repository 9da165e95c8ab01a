//! Shared fixtures for integration tests

use agora::config::AppConfig;
use agora::database::DatabaseConnection;
use agora::domain_types::{AgentId, AgentName, CapabilityName, OrgId, UserId};
use agora::server::MeshRuntime;
use agora::storage::{AgentStatus, NewAgent, Store};
use agora::time_provider::{MockTimeProvider, SharedTimeProvider};
use chrono::Utc;
use std::sync::Arc;

/// Runtime over an in-memory database and a mock clock
#[allow(dead_code)]
pub async fn mock_runtime() -> (MeshRuntime, Arc<MockTimeProvider>) {
    let clock = Arc::new(MockTimeProvider::new());
    let database = DatabaseConnection::in_memory().await.unwrap();
    let time: SharedTimeProvider = clock.clone();
    let runtime = MeshRuntime::start_with_time(AppConfig::default(), database, time)
        .await
        .unwrap();
    (runtime, clock)
}

/// Registration options for a test agent
#[allow(dead_code)]
pub struct TestAgent {
    pub name: &'static str,
    pub capabilities: Vec<&'static str>,
    pub creator: Option<UserId>,
    pub org: Option<OrgId>,
    pub public: bool,
    pub status: AgentStatus,
}

#[allow(dead_code)]
impl TestAgent {
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            capabilities: vec![],
            creator: None,
            org: None,
            public: false,
            status: AgentStatus::Active,
        }
    }

    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    pub fn in_org(mut self, org: OrgId) -> Self {
        self.org = Some(org);
        self
    }

    pub fn created_by(mut self, user: UserId) -> Self {
        self.creator = Some(user);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<&'static str>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Registers an agent and returns its id
#[allow(dead_code)]
pub async fn register_agent(store: &Store, options: TestAgent) -> AgentId {
    store
        .agents()
        .insert(
            NewAgent {
                name: AgentName::try_new(options.name.to_string()).unwrap(),
                description: format!("{} integration fixture", options.name),
                endpoint: String::new(),
                capabilities: options
                    .capabilities
                    .iter()
                    .map(|c| CapabilityName::try_new((*c).to_string()).unwrap())
                    .collect(),
                category: "general".to_string(),
                status: options.status,
                creator_id: options.creator,
                org_id: options.org,
                is_public: options.public,
                cost_per_request: 0.0,
            },
            Utc::now(),
        )
        .await
        .unwrap()
        .id
}
