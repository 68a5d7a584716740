//! Agent configuration

use agent_lib::registry::{is_valid_metric_name, UP, WORKLOAD_RULE_RESULTS};
use agent_lib::rules::{RuleConfig, DEFAULT_RECENCY_THRESHOLD_HOURS};
use agent_lib::scheduler::SchedulerConfig;
use agent_lib::NamespaceScope;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Agent configuration, read from `AGENT_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Metrics server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Namespace to scan, empty for all namespaces
    #[serde(default)]
    pub namespace: String,

    /// Collection cycle interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Organization every image must belong to
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,

    /// Label key every pod must carry
    #[serde(default = "default_required_label_key")]
    pub required_label_key: String,

    /// Age in hours up to which a pod counts as recent
    #[serde(default = "default_recency_threshold")]
    pub recency_threshold_hours: i64,

    /// Name of the recency gauge
    #[serde(default = "default_recent_metric_name")]
    pub recent_metric_name: String,

    /// Time allowed for in-flight work on shutdown, in seconds
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Instance name attached to log records
    #[serde(default = "default_instance")]
    pub instance: String,
}

fn default_port() -> u16 {
    agent_lib::exposition::DEFAULT_PORT
}

fn default_poll_interval() -> u64 {
    agent_lib::scheduler::DEFAULT_POLL_INTERVAL.as_secs()
}

fn default_image_prefix() -> String {
    "org".to_string()
}

fn default_required_label_key() -> String {
    "team".to_string()
}

fn default_recency_threshold() -> i64 {
    DEFAULT_RECENCY_THRESHOLD_HOURS
}

fn default_recent_metric_name() -> String {
    agent_lib::registry::PODS_RECENT_COUNT.to_string()
}

fn default_shutdown_grace() -> u64 {
    agent_lib::scheduler::DEFAULT_SHUTDOWN_GRACE.as_secs()
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

impl AgentConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_environment(config::Environment::with_prefix("AGENT"))
    }

    /// Load configuration from an explicit variable map (`AGENT_PORT` etc.)
    #[allow(dead_code)]
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        Self::from_environment(config::Environment::with_prefix("AGENT").source(Some(vars)))
    }

    fn from_environment(env: config::Environment) -> Result<Self> {
        let config: AgentConfig = config::Config::builder()
            .add_source(env)
            .build()
            .context("Failed to read agent configuration")?
            .try_deserialize()
            .context("Invalid agent configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            bail!("AGENT_POLL_INTERVAL_SECS must be greater than zero");
        }
        if self.image_prefix.trim().is_empty() {
            bail!("AGENT_IMAGE_PREFIX must not be empty");
        }
        if self.required_label_key.trim().is_empty() {
            bail!("AGENT_REQUIRED_LABEL_KEY must not be empty");
        }
        if self.recency_threshold_hours < 0 {
            bail!("AGENT_RECENCY_THRESHOLD_HOURS must not be negative");
        }
        if !is_valid_metric_name(&self.recent_metric_name) {
            bail!(
                "AGENT_RECENT_METRIC_NAME '{}' is not a valid metric name",
                self.recent_metric_name
            );
        }
        if [UP, WORKLOAD_RULE_RESULTS].contains(&self.recent_metric_name.as_str()) {
            bail!(
                "AGENT_RECENT_METRIC_NAME '{}' is reserved for another gauge",
                self.recent_metric_name
            );
        }
        Ok(())
    }

    pub fn scope(&self) -> NamespaceScope {
        NamespaceScope::parse(&self.namespace)
    }

    pub fn rule_config(&self) -> RuleConfig {
        RuleConfig {
            image_prefix: self.image_prefix.clone(),
            required_label_key: self.required_label_key.clone(),
            recency_threshold: chrono::Duration::hours(self.recency_threshold_hours),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            shutdown_grace: self.shutdown_grace(),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
