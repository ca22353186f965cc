//! Orchestrator configuration
//!
//! Loaded from JSON with every field defaulted, then overridden from
//! `STRATUS_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;
use crate::{Error, Result};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "STRATUS_";

/// Runtime configuration of the orchestrator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Identity written into `lease_owner`; patches from other owners are refused
    pub lease_owner: String,
    /// Interval between Condition polls, in milliseconds
    pub poll_interval_ms: u64,
    /// Timeout for the API servers to become ready
    pub api_servers_timeout_secs: u64,
    /// Timeout for the minimum worker count to become ready
    pub workers_timeout_secs: u64,
    /// Timeout for the console operator to become available
    pub console_timeout_secs: u64,
    /// Timeout for the cluster version to report available
    pub cluster_version_timeout_secs: u64,
    /// Timeout for the ingress operator to become available
    pub ingress_timeout_secs: u64,
    /// Timeout for the cluster operator deployment to roll out
    pub operator_timeout_secs: u64,
    /// Attempts for optimistic-concurrency retries (store and managed cluster)
    pub conflict_retry_attempts: u32,
    /// Fixed delay between optimistic-concurrency retries, in milliseconds
    pub conflict_retry_delay_ms: u64,
    /// Minimum number of ready worker nodes before install continues
    pub min_ready_workers: usize,
    /// Gather diagnostics when a pipeline fails
    pub gather_failure_logs: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            lease_owner: "stratus".to_string(),
            poll_interval_ms: 10_000,
            api_servers_timeout_secs: 30 * 60,
            workers_timeout_secs: 30 * 60,
            console_timeout_secs: 30 * 60,
            cluster_version_timeout_secs: 30 * 60,
            ingress_timeout_secs: 30 * 60,
            operator_timeout_secs: 20 * 60,
            conflict_retry_attempts: 5,
            conflict_retry_delay_ms: 250,
            min_ready_workers: 2,
            gather_failure_logs: true,
        }
    }
}

impl OrchestratorConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::internal_with_context(
                "config",
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        Self::from_json(&raw)
    }

    /// Apply `STRATUS_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides using the given variable lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

        if let Some(owner) = var("LEASE_OWNER") {
            self.lease_owner = owner;
        }
        if let Some(v) = var("POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_var("POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = var("API_SERVERS_TIMEOUT_SECS") {
            self.api_servers_timeout_secs = parse_var("API_SERVERS_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("WORKERS_TIMEOUT_SECS") {
            self.workers_timeout_secs = parse_var("WORKERS_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("CONSOLE_TIMEOUT_SECS") {
            self.console_timeout_secs = parse_var("CONSOLE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("CLUSTER_VERSION_TIMEOUT_SECS") {
            self.cluster_version_timeout_secs = parse_var("CLUSTER_VERSION_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("INGRESS_TIMEOUT_SECS") {
            self.ingress_timeout_secs = parse_var("INGRESS_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("OPERATOR_TIMEOUT_SECS") {
            self.operator_timeout_secs = parse_var("OPERATOR_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("CONFLICT_RETRY_ATTEMPTS") {
            self.conflict_retry_attempts = parse_var("CONFLICT_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = var("CONFLICT_RETRY_DELAY_MS") {
            self.conflict_retry_delay_ms = parse_var("CONFLICT_RETRY_DELAY_MS", &v)?;
        }
        if let Some(v) = var("MIN_READY_WORKERS") {
            self.min_ready_workers = parse_var("MIN_READY_WORKERS", &v)?;
        }
        if let Some(v) = var("GATHER_FAILURE_LOGS") {
            self.gather_failure_logs = parse_var("GATHER_FAILURE_LOGS", &v)?;
        }

        self.validate()
    }

    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.lease_owner.is_empty() {
            return Err(Error::validation_for_field(
                "leaseOwner",
                "lease owner must not be empty",
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::validation_for_field(
                "pollIntervalMs",
                "poll interval must be positive",
            ));
        }
        if self.conflict_retry_attempts == 0 {
            return Err(Error::validation_for_field(
                "conflictRetryAttempts",
                "at least one attempt is required",
            ));
        }
        Ok(())
    }

    /// Interval between Condition polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Fixed retry policy for optimistic-concurrency conflicts
    pub fn conflict_retry(&self) -> RetryConfig {
        RetryConfig::fixed(
            self.conflict_retry_attempts,
            Duration::from_millis(self.conflict_retry_delay_ms),
        )
    }

    /// API server readiness timeout
    pub fn api_servers_timeout(&self) -> Duration {
        Duration::from_secs(self.api_servers_timeout_secs)
    }

    /// Worker readiness timeout
    pub fn workers_timeout(&self) -> Duration {
        Duration::from_secs(self.workers_timeout_secs)
    }

    /// Console readiness timeout
    pub fn console_timeout(&self) -> Duration {
        Duration::from_secs(self.console_timeout_secs)
    }

    /// Cluster version availability timeout
    pub fn cluster_version_timeout(&self) -> Duration {
        Duration::from_secs(self.cluster_version_timeout_secs)
    }

    /// Ingress readiness timeout
    pub fn ingress_timeout(&self) -> Duration {
        Duration::from_secs(self.ingress_timeout_secs)
    }

    /// Cluster operator rollout timeout
    pub fn operator_timeout(&self) -> Duration {
        Duration::from_secs(self.operator_timeout_secs)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        Error::validation_for_field(
            format!("{}{}", ENV_PREFIX, name),
            format!("invalid value {:?}: {}", value, e),
        )
    })
}
