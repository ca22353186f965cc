//! Generic resource and resource group clients

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
#[cfg(test)]
use mockall::automock;

use stratus_common::Result;

use crate::models::{GenericResource, ResourceGroup};

/// A deletion that has been accepted and may still be running
pub struct DeletionHandle {
    resource_id: String,
    completion: BoxFuture<'static, Result<()>>,
}

impl DeletionHandle {
    /// Wrap the future that resolves when the deletion finishes
    pub fn new<F>(resource_id: impl Into<String>, completion: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            resource_id: resource_id.into(),
            completion: completion.boxed(),
        }
    }

    /// A deletion that already finished successfully
    pub fn completed(resource_id: impl Into<String>) -> Self {
        Self::new(resource_id, async { Ok(()) })
    }

    /// ID of the resource being deleted
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Wait for the deletion to finish
    pub async fn wait(self) -> Result<()> {
        self.completion.await
    }
}

impl fmt::Debug for DeletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletionHandle")
            .field("resource_id", &self.resource_id)
            .finish()
    }
}

/// Operations on arbitrary resources by ID
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// List every resource in a resource group
    async fn list_by_resource_group(&self, resource_group: &str) -> Result<Vec<GenericResource>>;

    /// Begin deleting a resource; the handle resolves when it is gone
    async fn delete_by_id(&self, id: &str, api_version: &str) -> Result<DeletionHandle>;
}

/// Resource group operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceGroupClient: Send + Sync {
    /// Fetch a resource group
    async fn get(&self, name: &str) -> Result<ResourceGroup>;

    /// Delete a resource group and everything left in it, and wait
    async fn delete_and_wait(&self, name: &str) -> Result<()>;
}
