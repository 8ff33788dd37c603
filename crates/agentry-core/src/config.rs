//! Agent configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{AgentIdentity, RetryPolicy};

pub const DEFAULT_AGENT_NAME: &str = "test_agent_1";
pub const DEFAULT_AGENT_TYPE: &str = "test_agent";
pub const DEFAULT_METRICS_PORT: u16 = 8001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent_name: String,
    pub agent_type: String,
    pub capabilities: Vec<String>,

    pub retry: RetryPolicy,

    /// Sleep between loop iterations.
    #[serde(with = "crate::domain::retry::secs_f64")]
    pub poll_interval: Duration,

    #[serde(with = "crate::domain::retry::secs_f64")]
    pub heartbeat_interval: Duration,

    /// Claimable tasks fetched per iteration.
    pub claim_batch: usize,

    /// Demo tasks created at startup. 0 disables seeding.
    pub seed_tasks: usize,

    pub metrics_port: u16,

    /// Reported in the `system_startup` event.
    pub environment: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            agent_type: DEFAULT_AGENT_TYPE.to_string(),
            capabilities: vec!["testing".to_string(), "simulation".to_string()],
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(60),
            claim_batch: 5,
            seed_tasks: 5,
            metrics_port: DEFAULT_METRICS_PORT,
            environment: "development".to_string(),
        }
    }
}

impl AgentConfig {
    pub fn identity(&self) -> AgentIdentity {
        self.capabilities.iter().fold(
            AgentIdentity::new(&self.agent_name, &self.agent_type)
                .with_meta("version", env!("CARGO_PKG_VERSION"))
                .with_meta("environment", self.environment.clone()),
            |identity, c| identity.with_capability(c),
        )
    }

    /// Copy of this config for the `n`th agent of a group (`name_n`).
    pub fn for_replica(&self, n: usize) -> Self {
        Self {
            agent_name: format!("{}_{n}", self.agent_name),
            ..self.clone()
        }
    }
}
