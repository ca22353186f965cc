//! Compute resource clients

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use stratus_common::Result;

use crate::models::{ResourceSku, VirtualMachine};

/// Compute SKU catalogue
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceSkuClient: Send + Sync {
    /// List SKUs matching an OData filter such as `location eq 'eastus'`
    async fn list(&self, filter: &str) -> Result<Vec<ResourceSku>>;
}

/// Virtual machine operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VirtualMachineClient: Send + Sync {
    /// List VMs in a resource group, without instance views
    async fn list(&self, resource_group: &str) -> Result<Vec<VirtualMachine>>;

    /// Fetch a VM with its instance view populated
    async fn get_instance_view(&self, resource_group: &str, name: &str) -> Result<VirtualMachine>;

    /// Start a VM and wait until it is running
    async fn start_and_wait(&self, resource_group: &str, name: &str) -> Result<()>;
}
