//! Clients for the external APIs the orchestrator drives
//!
//! Every client is a narrow async trait so the manager can be exercised
//! against mocks. Production implementations live with the SDK bindings,
//! except for the managed-cluster client which talks to Kubernetes directly.

pub mod compute;
pub mod managed;
pub mod network;
pub mod resources;

use std::sync::Arc;

pub use compute::{ResourceSkuClient, VirtualMachineClient};
pub use managed::{
    ClusterOperator, ClusterVersion, KubeManagedClusterClient, ManagedClusterClient,
    OperatorCondition,
};
pub use network::{
    InterfaceClient, LoadBalancerClient, PublicIpClient, SecurityGroupClient, SubnetClient,
    VirtualNetworkLinkClient,
};
pub use resources::{DeletionHandle, ResourceClient, ResourceGroupClient};

/// The cloud clients a manager needs, scoped to the cluster's subscription
#[derive(Clone)]
pub struct CloudClients {
    pub load_balancers: Arc<dyn LoadBalancerClient>,
    pub public_ips: Arc<dyn PublicIpClient>,
    pub security_groups: Arc<dyn SecurityGroupClient>,
    pub subnets: Arc<dyn SubnetClient>,
    pub virtual_network_links: Arc<dyn VirtualNetworkLinkClient>,
    pub interfaces: Arc<dyn InterfaceClient>,
    pub resource_skus: Arc<dyn ResourceSkuClient>,
    pub virtual_machines: Arc<dyn VirtualMachineClient>,
    pub resources: Arc<dyn ResourceClient>,
    pub resource_groups: Arc<dyn ResourceGroupClient>,
}
