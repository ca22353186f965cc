//! Network resource clients

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use stratus_common::Result;

use crate::models::{
    LoadBalancer, NetworkInterface, PublicIpAddress, SecurityGroup, Subnet, VirtualNetworkLink,
};

/// Load balancer operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LoadBalancerClient: Send + Sync {
    /// Fetch a load balancer
    async fn get(&self, resource_group: &str, name: &str) -> Result<LoadBalancer>;

    /// Replace a load balancer and wait for the operation to finish
    async fn create_or_update_and_wait(
        &self,
        resource_group: &str,
        name: &str,
        lb: &LoadBalancer,
    ) -> Result<()>;
}

/// Public IP address operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PublicIpClient: Send + Sync {
    /// List every public IP in a resource group
    async fn list(&self, resource_group: &str) -> Result<Vec<PublicIpAddress>>;

    /// Create or replace a public IP and wait
    async fn create_or_update_and_wait(
        &self,
        resource_group: &str,
        name: &str,
        ip: &PublicIpAddress,
    ) -> Result<()>;

    /// Delete a public IP and wait
    async fn delete_and_wait(&self, resource_group: &str, name: &str) -> Result<()>;
}

/// Network security group operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecurityGroupClient: Send + Sync {
    /// Fetch a security group, including the IDs of subnets that reference it
    async fn get(&self, resource_group: &str, name: &str) -> Result<SecurityGroup>;
}

/// Subnet operations, addressed by full subnet ID
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SubnetClient: Send + Sync {
    /// Fetch a subnet
    async fn get(&self, id: &str) -> Result<Subnet>;

    /// Replace a subnet
    async fn create_or_update(&self, id: &str, subnet: &Subnet) -> Result<()>;
}

/// Private DNS zone virtual-network link operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VirtualNetworkLinkClient: Send + Sync {
    /// List links of a private DNS zone
    async fn list(&self, resource_group: &str, zone: &str) -> Result<Vec<VirtualNetworkLink>>;

    /// Delete a link and wait
    async fn delete_and_wait(&self, resource_group: &str, zone: &str, name: &str) -> Result<()>;
}

/// Network interface operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InterfaceClient: Send + Sync {
    /// Fetch an interface with its true provisioning state
    async fn get(&self, resource_group: &str, name: &str) -> Result<NetworkInterface>;

    /// Re-put an interface unchanged and wait
    async fn create_or_update_and_wait(
        &self,
        resource_group: &str,
        name: &str,
        nic: &NetworkInterface,
    ) -> Result<()>;
}
