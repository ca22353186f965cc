//! Client for the managed cluster's own Kubernetes API

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use stratus_common::{Error, Result};

/// Name of the singleton ClusterVersion object
pub const CLUSTER_VERSION_NAME: &str = "version";
/// Name of the singleton Console operator config
pub const CONSOLE_CONFIG_NAME: &str = "cluster";

/// One status condition of an operator or the cluster version
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OperatorCondition {
    /// Convenience constructor
    pub fn new(type_: &str, status: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: status.to_string(),
            message: None,
        }
    }
}

/// Status of a cluster operator
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterOperator {
    pub name: String,
    pub conditions: Vec<OperatorCondition>,
}

impl ClusterOperator {
    /// Available and not progressing
    pub fn is_available(&self) -> bool {
        condition_status(&self.conditions, "Available") == Some("True")
            && condition_status(&self.conditions, "Progressing") == Some("False")
    }
}

/// The cluster version object
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterVersion {
    /// Resource version the object was read at; writes are conditional on it
    pub resource_version: Option<String>,
    /// Update channel; `None` disables updates
    pub channel: Option<String>,
    /// Update server; `None` disables updates
    pub upstream: Option<String>,
    pub conditions: Vec<OperatorCondition>,
}

impl ClusterVersion {
    /// True once the version reports Available
    pub fn is_available(&self) -> bool {
        condition_status(&self.conditions, "Available") == Some("True")
    }
}

fn condition_status<'a>(conditions: &'a [OperatorCondition], type_: &str) -> Option<&'a str> {
    conditions
        .iter()
        .find(|c| c.type_ == type_)
        .map(|c| c.status.as_str())
}

/// Typed access to the managed cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManagedClusterClient: Send + Sync {
    /// Fetch a cluster operator; `None` if it does not exist yet
    async fn get_cluster_operator(&self, name: &str) -> Result<Option<ClusterOperator>>;

    /// List nodes matching a label selector
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>>;

    /// True if the console operator config exists
    async fn console_exists(&self) -> Result<bool>;

    /// Fetch the cluster version
    async fn get_cluster_version(&self) -> Result<ClusterVersion>;

    /// Write the cluster version's channel and upstream
    ///
    /// Conditional on `resource_version`; a stale read fails with a 409.
    async fn update_cluster_version(&self, cv: &ClusterVersion) -> Result<()>;
}

/// [`ManagedClusterClient`] backed by a kube client
pub struct KubeManagedClusterClient {
    client: Client,
}

impl KubeManagedClusterClient {
    /// Wrap a kube client configured for the managed cluster
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn config_api(&self, kind: &str) -> Api<DynamicObject> {
        Api::all_with(
            self.client.clone(),
            &ApiResource::from_gvk(&GroupVersionKind::gvk("config.openshift.io", "v1", kind)),
        )
    }
}

#[async_trait]
impl ManagedClusterClient for KubeManagedClusterClient {
    async fn get_cluster_operator(&self, name: &str) -> Result<Option<ClusterOperator>> {
        match self.config_api("ClusterOperator").get(name).await {
            Ok(obj) => Ok(Some(ClusterOperator {
                name: name.to_string(),
                conditions: parse_conditions(&obj.data)?,
            })),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(operator = %name, "cluster operator not found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(nodes.items)
    }

    async fn console_exists(&self) -> Result<bool> {
        let api: Api<DynamicObject> = Api::all_with(
            self.client.clone(),
            &ApiResource::from_gvk(&GroupVersionKind::gvk(
                "operator.openshift.io",
                "v1",
                "Console",
            )),
        );
        match api.get(CONSOLE_CONFIG_NAME).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_cluster_version(&self) -> Result<ClusterVersion> {
        let obj = self.config_api("ClusterVersion").get(CLUSTER_VERSION_NAME).await?;
        cluster_version_from(&obj)
    }

    async fn update_cluster_version(&self, cv: &ClusterVersion) -> Result<()> {
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": cv.resource_version },
            "spec": { "channel": cv.channel, "upstream": cv.upstream },
        });
        self.config_api("ClusterVersion")
            .patch(
                CLUSTER_VERSION_NAME,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

/// Read `status.conditions` from an unstructured object
pub fn parse_conditions(data: &serde_json::Value) -> Result<Vec<OperatorCondition>> {
    match data.pointer("/status/conditions") {
        Some(raw) => serde_json::from_value(raw.clone()).map_err(Error::from),
        None => Ok(Vec::new()),
    }
}

/// Build a [`ClusterVersion`] from an unstructured object
pub fn cluster_version_from(obj: &DynamicObject) -> Result<ClusterVersion> {
    let spec_str = |field: &str| {
        obj.data
            .pointer(&format!("/spec/{}", field))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Ok(ClusterVersion {
        resource_version: obj.metadata.resource_version.clone(),
        channel: spec_str("channel"),
        upstream: spec_str("upstream"),
        conditions: parse_conditions(&obj.data)?,
    })
}
