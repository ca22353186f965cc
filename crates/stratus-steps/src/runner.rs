//! Sequential pipeline runner

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use stratus_common::Result;

use crate::step::{Step, DEFAULT_POLL_INTERVAL};

/// Elapsed seconds per metric topic
pub type StepTimings = HashMap<String, f64>;

/// Best-effort capture of cluster state after a failed run
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Diagnostics: Send + Sync {
    /// Collect whatever logs are reachable; failures are only logged by the caller
    async fn gather_failure_logs(&self, cancel: CancellationToken) -> Result<()>;
}

/// Executes a pipeline of steps in order
#[derive(Clone)]
pub struct Runner {
    poll_interval: Duration,
    diagnostics: Option<Arc<dyn Diagnostics>>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl Runner {
    /// Create a runner polling Conditions at the given interval
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            diagnostics: None,
        }
    }

    /// Run `diagnostics` whenever a pipeline fails
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Run every step in order, aborting on the first error.
    ///
    /// On failure the diagnostics hook runs before the original error is
    /// returned. On success the elapsed time of every step that carries a
    /// metric topic is returned.
    pub async fn run(&self, steps: &[Step], cancel: &CancellationToken) -> Result<StepTimings> {
        let mut timings = StepTimings::new();

        for step in steps {
            info!("running step [{}]", step);
            let started = Instant::now();

            if let Err(e) = step.execute_with(cancel, self.poll_interval).await {
                error!(retryable = e.is_retryable(), "step [{}] encountered error: {}", step, e);
                self.gather_failure_logs(cancel).await;
                return Err(e);
            }

            if let Some(topic) = step.metric() {
                timings.insert(topic.to_string(), started.elapsed().as_secs_f64());
            }
        }

        Ok(timings)
    }

    async fn gather_failure_logs(&self, cancel: &CancellationToken) {
        let Some(diagnostics) = &self.diagnostics else {
            return;
        };
        if let Err(e) = diagnostics.gather_failure_logs(cancel.clone()).await {
            warn!(error = %e, "failed to gather failure logs");
        }
    }
}
