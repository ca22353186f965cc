//! Template, installer and certificate collaborator
//!
//! Everything that shapes individual cloud resources or talks to the
//! cluster's own installer sits behind this trait. The manager only decides
//! when each operation runs; each operation must converge when re-run.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use stratus_common::{Result, WorkflowDocument};

/// Provisioning operations the lifecycle pipelines sequence
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Check the customer's network and permissions before touching anything
    async fn validate_resources(&self, doc: &WorkflowDocument) -> Result<()>;

    /// Create the cluster resource group if it is missing
    async fn ensure_resource_group(&self, doc: &WorkflowDocument) -> Result<()>;

    /// Create the cluster's public DNS records
    async fn create_dns(&self, doc: &WorkflowDocument) -> Result<()>;

    /// Remove the cluster's public DNS records
    async fn delete_dns(&self, doc: &WorkflowDocument) -> Result<()>;

    /// Deploy storage accounts and the bootstrap ignition payload
    async fn deploy_storage_template(&self, doc: &WorkflowDocument) -> Result<()>;

    /// Deploy load balancers, NSGs, private DNS and control plane VMs
    async fn deploy_base_resources(&self, doc: &WorkflowDocument) -> Result<()>;

    /// Issue API server and ingress certificates
    async fn create_certificates(&self, doc: &WorkflowDocument) -> Result<()>;

    /// Run the cluster installer to completion
    async fn run_installer(&self, doc: &WorkflowDocument) -> Result<()>;

    /// Write admin and service kubeconfigs
    async fn generate_kubeconfigs(&self, doc: &WorkflowDocument) -> Result<()>;

    /// Deploy or upgrade the in-cluster operator
    async fn ensure_operator(&self, doc: &WorkflowDocument) -> Result<()>;

    /// True once the in-cluster operator deployment is available
    async fn operator_ready(&self, doc: &WorkflowDocument) -> Result<bool>;

    /// Delete the bootstrap VM and its ignition data
    async fn remove_bootstrap(&self, doc: &WorkflowDocument) -> Result<()>;

    /// Install the signed API server certificate
    async fn configure_api_server_certificate(&self, doc: &WorkflowDocument) -> Result<()>;

    /// Install the signed ingress certificate
    async fn configure_ingress_certificate(&self, doc: &WorkflowDocument) -> Result<()>;

    /// Mark the encrypted storage class as default
    async fn configure_default_storage_class(&self, doc: &WorkflowDocument) -> Result<()>;

    /// Push rotated service principal credentials into the cluster
    async fn rotate_credentials(&self, doc: &WorkflowDocument) -> Result<()>;
}
