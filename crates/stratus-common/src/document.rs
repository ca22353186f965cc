//! The workflow document: the durable record of one cluster
//!
//! The orchestrator owns this document and mutates it only through
//! [`crate::store::patch_with_lease`]. It is the sole progress record, so a
//! restarted process resumes from whatever it says.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource_id::ResourceRef;
use crate::store::Leased;
use crate::Error;

/// Durable record of a cluster and its orchestration progress
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    /// Store key
    pub key: String,
    /// Cluster resource ID
    pub id: String,
    /// Cloud region
    pub location: String,
    /// Worker that currently holds the lease
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<String>,
    /// Cluster properties
    pub properties: ClusterProperties,
}

impl WorkflowDocument {
    /// Create a document for a newly accepted cluster
    pub fn new(key: impl Into<String>, id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            id: id.into(),
            location: location.into(),
            ..Default::default()
        }
    }

    /// True if the cluster's API server is reachable from the internet
    pub fn api_server_is_public(&self) -> bool {
        self.properties.api_server_profile.visibility == Visibility::Public
    }
}

impl Leased for WorkflowDocument {
    fn lease_owner(&self) -> Option<&str> {
        self.lease_owner.as_deref()
    }
}

/// Mutable cluster state
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterProperties {
    /// State reported to the caller
    pub provisioning_state: ProvisioningState,
    /// Admin maintenance task to run on the next admin update
    pub maintenance_task: MaintenanceTask,
    /// Infrastructure ID that prefixes every generated resource name
    pub infra_id: String,
    /// Network layout version of the cluster
    pub architecture_version: ArchitectureVersion,
    /// Cluster-level settings
    pub cluster_profile: ClusterProfile,
    /// Control plane settings
    pub master_profile: MasterProfile,
    /// API server settings
    pub api_server_profile: ApiServerProfile,
    /// Network settings
    pub network_profile: NetworkProfile,
    /// Install progress; `None` when not installing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallState>,
    /// Availability zones the control plane uses
    pub zones: Vec<String>,
    /// Build of the orchestrator that last drove this cluster
    pub provisioned_by: String,
}

/// Caller-visible lifecycle state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    /// Being created
    #[default]
    Creating,
    /// Being updated
    Updating,
    /// Admin update in progress
    AdminUpdating,
    /// Being deleted
    Deleting,
    /// Last operation succeeded
    Succeeded,
    /// Last operation failed
    Failed,
}

/// Admin-triggered remediation to run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaintenanceTask {
    /// Full remediation
    #[default]
    Everything,
    /// Redeploy the in-cluster operator only
    Operator,
    /// Reconcile the load balancer profile only
    LoadBalancerProfile,
    /// Migrate the internal load balancer to zone-redundant frontends
    ZonalMigration,
}

/// Network layout version
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchitectureVersion {
    /// Original layout with a separate internal LB per role
    #[default]
    V1,
    /// Consolidated layout with one public LB named after the infra ID
    V2,
}

/// API server or ingress reachability
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    /// Reachable from the internet
    #[default]
    Public,
    /// Reachable only inside the virtual network
    Private,
}

/// How cluster egress is routed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundType {
    /// Through the public load balancer's outbound rule
    #[default]
    Loadbalancer,
    /// Through a customer route table
    UserDefinedRouting,
}

/// Cluster-level settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterProfile {
    /// ID of the managed resource group holding cluster infrastructure
    pub resource_group_id: String,
    /// Cluster domain
    pub domain: String,
}

/// Control plane settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MasterProfile {
    /// VM size of control plane nodes
    pub vm_size: String,
    /// Subnet the control plane runs in
    pub subnet_id: String,
}

/// API server settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiServerProfile {
    /// Reachability of the API server
    pub visibility: Visibility,
    /// Static private IP of the internal API frontend
    pub int_ip: String,
}

/// Network settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkProfile {
    /// Egress routing
    pub outbound_type: OutboundType,
    /// Public load balancer state
    pub load_balancer: LoadBalancerState,
}

/// Desired and last-converged state of the public load balancer
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoadBalancerState {
    /// Desired number of managed outbound IPs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_outbound_ip_count: Option<usize>,
    /// Outbound IPs the outbound rule last converged to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_outbound_ips: Option<Vec<ResourceRef>>,
    /// Zones of the load balancer frontends
    pub zones: Vec<String>,
}

/// Install progress
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallState {
    /// Raw phase number; see [`InstallPhase`]
    pub phase: i32,
    /// When the install started
    pub started_at: DateTime<Utc>,
}

impl InstallState {
    /// Start an install at the first phase
    pub fn start(now: DateTime<Utc>) -> Self {
        Self {
            phase: InstallPhase::Bootstrap as i32,
            started_at: now,
        }
    }

    /// Decode the persisted phase
    pub fn current_phase(&self) -> Result<InstallPhase, Error> {
        InstallPhase::try_from(self.phase)
    }
}

/// Macro-phases of an install
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum InstallPhase {
    /// Provision infrastructure and bootstrap the control plane
    Bootstrap = 0,
    /// Tear down bootstrap resources and finish configuration
    RemoveBootstrap = 1,
}

impl InstallPhase {
    /// The phase after this one, or `None` for the final phase
    pub fn next(self) -> Option<Self> {
        match self {
            InstallPhase::Bootstrap => Some(InstallPhase::RemoveBootstrap),
            InstallPhase::RemoveBootstrap => None,
        }
    }

    /// True for the last phase
    pub fn is_final(self) -> bool {
        self.next().is_none()
    }
}

impl TryFrom<i32> for InstallPhase {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(InstallPhase::Bootstrap),
            1 => Ok(InstallPhase::RemoveBootstrap),
            other => Err(Error::UnknownPhase(other)),
        }
    }
}

impl std::fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallPhase::Bootstrap => f.write_str("Bootstrap"),
            InstallPhase::RemoveBootstrap => f.write_str("RemoveBootstrap"),
        }
    }
}
