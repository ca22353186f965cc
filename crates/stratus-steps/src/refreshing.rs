//! Credential refresh for steps that hit stale authorization

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use stratus_common::Result;

/// Something that can fetch a fresh credential on demand
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Refresh the credential. Returns whether the token changed.
    async fn refresh(&self) -> Result<bool>;
}
