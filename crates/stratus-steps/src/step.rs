//! The `Step` enum and its execution semantics

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use stratus_common::{Error, Result};

use crate::refreshing::Authorizer;

/// Poll interval used when a step runs outside a [`crate::Runner`]
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Boxed side-effecting operation
pub type ActionFn = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Boxed readiness predicate
pub type ConditionFn =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// One unit of a pipeline
#[derive(Clone)]
pub enum Step {
    /// Idempotent operation that runs once
    Action {
        /// Name used in logs
        name: String,
        /// Metric topic for timings
        metric: Option<String>,
        /// The operation
        run: ActionFn,
    },
    /// Predicate polled until it returns `Ok(true)`
    Condition {
        /// Name used in logs
        name: String,
        /// Metric topic for timings
        metric: Option<String>,
        /// The predicate; `Ok(false)` means not ready yet
        check: ConditionFn,
        /// How long to wait for readiness
        timeout: Duration,
        /// When false, a timeout is logged and the pipeline continues
        fail: bool,
    },
    /// Children run strictly in order, stopping at the first error
    List {
        /// Name used in logs
        name: String,
        /// Metric topic for timings
        metric: Option<String>,
        /// Children
        steps: Vec<Step>,
    },
    /// Wrapped step retried once after a credential refresh on 403
    AuthorizationRefreshing {
        /// The wrapped step
        step: Box<Step>,
        /// Credential to refresh
        authorizer: Arc<dyn Authorizer>,
    },
}

impl Step {
    /// Build an Action from an async closure
    pub fn action<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Step::Action {
            name: name.into(),
            metric: None,
            run: Arc::new(move |cancel| f(cancel).boxed()),
        }
    }

    /// Build a Condition from an async predicate
    pub fn condition<F, Fut>(name: impl Into<String>, f: F, timeout: Duration, fail: bool) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        Step::Condition {
            name: name.into(),
            metric: None,
            check: Arc::new(move |cancel| f(cancel).boxed()),
            timeout,
            fail,
        }
    }

    /// Group steps under one name
    pub fn list(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Step::List {
            name: name.into(),
            metric: None,
            steps,
        }
    }

    /// Wrap a step with refresh-and-retry on authorization failure
    pub fn authorization_refreshing(authorizer: Arc<dyn Authorizer>, step: Step) -> Self {
        Step::AuthorizationRefreshing {
            step: Box::new(step),
            authorizer,
        }
    }

    /// Attach a metric topic; the runner reports this step's duration under it
    pub fn with_metric(mut self, topic: impl Into<String>) -> Self {
        match &mut self {
            Step::Action { metric, .. }
            | Step::Condition { metric, .. }
            | Step::List { metric, .. } => *metric = Some(topic.into()),
            Step::AuthorizationRefreshing { step, .. } => {
                let inner = std::mem::replace(step.as_mut(), Step::list("", Vec::new()));
                **step = inner.with_metric(topic);
            }
        }
        self
    }

    /// Metric topic, if any
    pub fn metric(&self) -> Option<&str> {
        match self {
            Step::Action { metric, .. }
            | Step::Condition { metric, .. }
            | Step::List { metric, .. } => metric.as_deref(),
            Step::AuthorizationRefreshing { step, .. } => step.metric(),
        }
    }

    /// Execute with the default poll interval
    pub async fn execute(&self, cancel: &CancellationToken) -> Result<()> {
        self.execute_with(cancel, DEFAULT_POLL_INTERVAL).await
    }

    /// Execute, polling Conditions every `poll_interval`
    pub fn execute_with<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        poll_interval: Duration,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self {
                Step::Action { run, .. } => run(cancel.clone()).await,
                Step::Condition {
                    name,
                    check,
                    timeout,
                    fail,
                    ..
                } => poll_condition(name, check, *timeout, *fail, poll_interval, cancel).await,
                Step::List { steps, .. } => {
                    for step in steps {
                        info!("running step [{}]", step);
                        step.execute_with(cancel, poll_interval).await?;
                    }
                    Ok(())
                }
                Step::AuthorizationRefreshing { step, authorizer } => {
                    match step.execute_with(cancel, poll_interval).await {
                        Err(e) if e.is_authorization_failed() => {
                            info!(error = %e, "authorization failed, refreshing credential");
                            authorizer.refresh().await?;
                            step.execute_with(cancel, poll_interval).await
                        }
                        result => result,
                    }
                }
            }
        }
        .boxed()
    }
}

async fn poll_condition(
    name: &str,
    check: &ConditionFn,
    timeout: Duration,
    fail: bool,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let deadline = Instant::now() + timeout;

    loop {
        let ready = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep_until(deadline) => false,
            ready = check(cancel.clone()) => ready?,
        };
        if ready {
            return Ok(());
        }

        if Instant::now() >= deadline {
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep_until(deadline) => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    let err = Error::ConditionTimeout {
        step: name.to_string(),
        timeout,
    };
    if fail {
        return Err(err);
    }
    warn!(step = %name, timeout_secs = timeout.as_secs(), "condition not met, continuing: {}", err);
    Ok(())
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Action { name, .. } => write!(f, "Action {}", name),
            Step::Condition { name, timeout, .. } => {
                write!(f, "Condition {}, timeout {:?}", name, timeout)
            }
            Step::List { name, .. } => write!(f, "List {}", name),
            Step::AuthorizationRefreshing { step, .. } => {
                write!(f, "AuthorizationRefreshingAction [{}]", step)
            }
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refreshing::MockAuthorizer;
    use std::sync::atomic::{AtomicU32, Ordering};
    use stratus_common::error::AUTHORIZATION_FAILED;

    fn counting_action(name: &str, counter: Arc<AtomicU32>) -> Step {
        Step::action(name, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn forbidden() -> Error {
        Error::cloud(403, AUTHORIZATION_FAILED, "rg", "stale token")
    }

    mod condition {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn ready_condition_returns_immediately() {
            let step = Step::condition("ready", |_| async { Ok(true) }, Duration::from_secs(60), true);
            let start = Instant::now();
            step.execute(&CancellationToken::new()).await.unwrap();
            assert_eq!(start.elapsed(), Duration::ZERO);
        }

        #[tokio::test(start_paused = true)]
        async fn never_ready_condition_times_out_after_its_timeout() {
            let polls = Arc::new(AtomicU32::new(0));
            let p = polls.clone();
            let step = Step::condition(
                "neverReady",
                move |_| {
                    let p = p.clone();
                    async move {
                        p.fetch_add(1, Ordering::SeqCst);
                        Ok(false)
                    }
                },
                Duration::from_secs(60),
                true,
            );

            let start = Instant::now();
            let err = step.execute(&CancellationToken::new()).await.unwrap_err();

            assert!(matches!(err, Error::ConditionTimeout { ref step, .. } if step == "neverReady"));
            assert_eq!(start.elapsed(), Duration::from_secs(60));
            // immediate poll plus one every 10s before the deadline
            assert_eq!(polls.load(Ordering::SeqCst), 6);
        }

        #[tokio::test(start_paused = true)]
        async fn non_failing_condition_continues_after_timeout() {
            let step = Step::condition("optional", |_| async { Ok(false) }, Duration::from_secs(30), false);
            step.execute(&CancellationToken::new()).await.unwrap();
        }

        #[tokio::test(start_paused = true)]
        async fn predicate_error_is_not_a_timeout() {
            let step = Step::condition(
                "broken",
                |_| async { Err(Error::internal("boom")) },
                Duration::from_secs(60),
                false,
            );
            let err = step.execute(&CancellationToken::new()).await.unwrap_err();
            assert!(matches!(err, Error::Internal { .. }));
        }

        #[tokio::test(start_paused = true)]
        async fn becomes_ready_on_a_later_poll() {
            let polls = Arc::new(AtomicU32::new(0));
            let p = polls.clone();
            let step = Step::condition(
                "eventually",
                move |_| {
                    let p = p.clone();
                    async move { Ok(p.fetch_add(1, Ordering::SeqCst) >= 2) }
                },
                Duration::from_secs(60),
                true,
            );
            let start = Instant::now();
            step.execute(&CancellationToken::new()).await.unwrap();
            assert_eq!(start.elapsed(), Duration::from_secs(20));
        }

        #[tokio::test(start_paused = true)]
        async fn cancellation_interrupts_polling() {
            let cancel = CancellationToken::new();
            let step = Step::condition("slow", |_| async { Ok(false) }, Duration::from_secs(3600), true);

            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                trigger.cancel();
            });

            let start = Instant::now();
            let err = step.execute(&cancel).await.unwrap_err();
            assert!(matches!(err, Error::Cancelled));
            assert_eq!(start.elapsed(), Duration::from_secs(5));
        }
    }

    mod list {
        use super::*;

        #[tokio::test]
        async fn stops_at_first_error() {
            let before = Arc::new(AtomicU32::new(0));
            let after = Arc::new(AtomicU32::new(0));
            let step = Step::list(
                "group",
                vec![
                    counting_action("first", before.clone()),
                    Step::action("fails", |_| async { Err(Error::internal("oh no!")) }),
                    counting_action("never", after.clone()),
                ],
            );

            let err = step.execute(&CancellationToken::new()).await.unwrap_err();
            assert_eq!(err.to_string(), "internal error [unknown]: oh no!");
            assert_eq!(before.load(Ordering::SeqCst), 1);
            assert_eq!(after.load(Ordering::SeqCst), 0);
        }
    }

    mod authorization_refreshing {
        use super::*;

        #[tokio::test]
        async fn refreshes_and_retries_once() {
            let mut authorizer = MockAuthorizer::new();
            authorizer.expect_refresh().times(1).returning(|| Ok(true));

            let calls = Arc::new(AtomicU32::new(0));
            let c = calls.clone();
            let inner = Step::action("flaky", move |_| {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(forbidden())
                    } else {
                        Ok(())
                    }
                }
            });

            let step = Step::authorization_refreshing(Arc::new(authorizer), inner);
            step.execute(&CancellationToken::new()).await.unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn second_failure_surfaces() {
            let mut authorizer = MockAuthorizer::new();
            authorizer.expect_refresh().times(1).returning(|| Ok(true));

            let calls = Arc::new(AtomicU32::new(0));
            let c = calls.clone();
            let inner = Step::action("denied", move |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(forbidden())
                }
            });

            let step = Step::authorization_refreshing(Arc::new(authorizer), inner);
            let err = step.execute(&CancellationToken::new()).await.unwrap_err();
            assert!(err.is_authorization_failed());
            assert_eq!(calls.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn other_errors_skip_refresh() {
            let mut authorizer = MockAuthorizer::new();
            authorizer.expect_refresh().never();

            let step = Step::authorization_refreshing(
                Arc::new(authorizer),
                Step::action("broken", |_| async { Err(Error::not_found("lb")) }),
            );
            let err = step.execute(&CancellationToken::new()).await.unwrap_err();
            assert!(err.is_not_found());
        }
    }

    #[test]
    fn display_names() {
        let action = Step::action("ensureInfraID", |_| async { Ok(()) });
        assert_eq!(action.to_string(), "Action ensureInfraID");

        let cond = Step::condition("apiServersReady", |_| async { Ok(true) }, Duration::from_secs(1800), true);
        assert_eq!(cond.to_string(), "Condition apiServersReady, timeout 1800s");

        let wrapped = Step::authorization_refreshing(Arc::new(MockAuthorizer::new()), action)
            .with_metric("ensure_infra_id");
        assert_eq!(wrapped.to_string(), "AuthorizationRefreshingAction [Action ensureInfraID]");
        assert_eq!(wrapped.metric(), Some("ensure_infra_id"));
    }
}
