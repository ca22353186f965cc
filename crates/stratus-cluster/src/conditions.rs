//! Readiness predicates against the managed cluster
//!
//! Every predicate here treats a failed observation as "not ready yet": the
//! API server may be unreachable or an operator may not exist while the
//! cluster is still coming up, and the enclosing Condition's timeout bounds
//! how long that is tolerated.

use k8s_openapi::api::core::v1::Node;
use tracing::{debug, info, instrument};

use stratus_common::retry::retry_on_conflict;
use stratus_common::Result;

use crate::manager::Manager;

/// Label carried by every worker node
pub const WORKER_LABEL: &str = "node-role.kubernetes.io/worker";

/// Check if a node has the Ready condition set to True.
pub fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false)
}

impl Manager {
    async fn operator_available(&self, name: &str) -> Result<bool> {
        match self.managed.get_cluster_operator(name).await {
            Ok(Some(operator)) => Ok(operator.is_available()),
            Ok(None) => {
                debug!(operator = name, "cluster operator does not exist yet");
                Ok(false)
            }
            Err(e) => {
                debug!(operator = name, error = %e, "failed to read cluster operator");
                Ok(false)
            }
        }
    }

    /// The kube-apiserver operator is available
    pub async fn api_servers_ready(&self) -> Result<bool> {
        self.operator_available("kube-apiserver").await
    }

    /// At least the configured number of worker nodes report Ready
    pub async fn minimum_worker_nodes_ready(&self) -> Result<bool> {
        let nodes = match self.managed.list_nodes(WORKER_LABEL).await {
            Ok(nodes) => nodes,
            Err(e) => {
                debug!(error = %e, "failed to list worker nodes");
                return Ok(false);
            }
        };

        let ready = nodes.iter().filter(|node| is_node_ready(node)).count();
        debug!(
            ready = ready,
            required = self.config.min_ready_workers,
            "worker node readiness"
        );
        Ok(ready >= self.config.min_ready_workers)
    }

    /// The console operator's configuration has been created
    pub async fn operator_console_exists(&self) -> Result<bool> {
        match self.managed.console_exists().await {
            Ok(exists) => Ok(exists),
            Err(e) => {
                debug!(error = %e, "failed to read console config");
                Ok(false)
            }
        }
    }

    /// The console operator is available
    pub async fn operator_console_ready(&self) -> Result<bool> {
        self.operator_available("console").await
    }

    /// The cluster version reports Available
    pub async fn cluster_version_ready(&self) -> Result<bool> {
        match self.managed.get_cluster_version().await {
            Ok(cv) => Ok(cv.is_available()),
            Err(e) => {
                debug!(error = %e, "failed to read cluster version");
                Ok(false)
            }
        }
    }

    /// The ingress operator is available
    pub async fn ingress_controller_ready(&self) -> Result<bool> {
        self.operator_available("ingress").await
    }

    /// Clear the cluster version's channel and upstream so it never self-updates
    #[instrument(skip(self))]
    pub async fn disable_updates(&self) -> Result<()> {
        retry_on_conflict(&self.config.conflict_retry(), "disable_updates", || async move {
            let mut cv = self.managed.get_cluster_version().await?;
            cv.channel = None;
            cv.upstream = None;
            self.managed.update_cluster_version(&cv).await
        })
        .await?;
        info!("cluster updates disabled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus};
    use kube::api::ObjectMeta;
    use stratus_common::Error;

    use super::*;
    use crate::clients::{ClusterOperator, ClusterVersion, OperatorCondition};
    use crate::manager::testing::*;

    fn make_node(name: &str, is_ready: bool) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: None,
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: if is_ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    fn operator(name: &str, available: &str, progressing: &str) -> ClusterOperator {
        ClusterOperator {
            name: name.to_string(),
            conditions: vec![
                OperatorCondition::new("Available", available),
                OperatorCondition::new("Progressing", progressing),
            ],
        }
    }

    #[test]
    fn is_node_ready_checks_ready_condition() {
        assert!(is_node_ready(&make_node("ready", true)));
        assert!(!is_node_ready(&make_node("not-ready", false)));
        assert!(!is_node_ready(&Node::default()));
    }

    #[tokio::test]
    async fn worker_readiness_counts_only_ready_nodes() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut harness = Harness::new();
        harness
            .managed
            .expect_list_nodes()
            .withf(|selector| selector == WORKER_LABEL)
            .returning(move |_| {
                let second_ready = calls.fetch_add(1, Ordering::SeqCst) > 0;
                Ok(vec![make_node("w-0", true), make_node("w-1", second_ready)])
            });
        let (manager, _store) = harness.build(document());

        assert!(!manager.minimum_worker_nodes_ready().await.unwrap());
        assert!(manager.minimum_worker_nodes_ready().await.unwrap());
    }

    #[tokio::test]
    async fn observation_errors_mean_not_ready() {
        let mut harness = Harness::new();
        harness
            .managed
            .expect_list_nodes()
            .returning(|_| Err(Error::internal("connection refused")));
        harness
            .managed
            .expect_get_cluster_operator()
            .returning(|_| Err(Error::internal("connection refused")));
        harness
            .managed
            .expect_get_cluster_version()
            .returning(|| Err(Error::internal("connection refused")));
        harness
            .managed
            .expect_console_exists()
            .returning(|| Err(Error::internal("connection refused")));
        let (manager, _store) = harness.build(document());

        assert!(!manager.minimum_worker_nodes_ready().await.unwrap());
        assert!(!manager.api_servers_ready().await.unwrap());
        assert!(!manager.cluster_version_ready().await.unwrap());
        assert!(!manager.operator_console_exists().await.unwrap());
    }

    #[tokio::test]
    async fn operators_must_be_available_and_settled() {
        let mut harness = Harness::new();
        harness
            .managed
            .expect_get_cluster_operator()
            .returning(|name| match name {
                "kube-apiserver" => Ok(Some(operator(name, "True", "False"))),
                "ingress" => Ok(Some(operator(name, "True", "True"))),
                _ => Ok(None),
            });
        let (manager, _store) = harness.build(document());

        assert!(manager.api_servers_ready().await.unwrap());
        assert!(!manager.ingress_controller_ready().await.unwrap());
        assert!(!manager.operator_console_ready().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn disable_updates_retries_conflicts_on_a_fresh_read() {
        let reads = Arc::new(AtomicU32::new(0));
        let mut harness = Harness::new();
        let counter = reads.clone();
        harness.managed.expect_get_cluster_version().returning(move || {
            let read = counter.fetch_add(1, Ordering::SeqCst);
            Ok(ClusterVersion {
                resource_version: Some(read.to_string()),
                channel: Some("stable-4.14".to_string()),
                upstream: Some("https://updates.example.com".to_string()),
                conditions: Vec::new(),
            })
        });
        harness
            .managed
            .expect_update_cluster_version()
            .times(2)
            .returning(|cv| {
                assert!(cv.channel.is_none());
                assert!(cv.upstream.is_none());
                match cv.resource_version.as_deref() {
                    Some("0") => Err(Error::conflict("version")),
                    _ => Ok(()),
                }
            });
        let (manager, _store) = harness.build(document());

        manager.disable_updates().await.unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }
}
