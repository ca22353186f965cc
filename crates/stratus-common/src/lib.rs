//! Common types for Stratus: errors, retry policies, configuration, the
//! workflow document and the store it lives in.

#![deny(missing_docs)]

pub mod config;
pub mod document;
pub mod error;
pub mod resource_id;
pub mod retry;
pub mod store;
pub mod telemetry;

pub use config::OrchestratorConfig;
pub use document::{InstallPhase, InstallState, WorkflowDocument};
pub use error::{CloudError, Error};
pub use resource_id::{ResourceId, ResourceRef};
pub use store::{patch_with_lease, DocumentStore, Leased, MemoryStore, Versioned};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name of the public load balancer's IPv4 outbound NAT rule
pub const OUTBOUND_RULE_V4: &str = "outbound-rule-v4";

/// Suffix of every managed outbound public IP created by the orchestrator
pub const MANAGED_OUTBOUND_IP_SUFFIX: &str = "-outbound-pip-v4";

/// Name of the default outbound IP created at install time (`<infraID>-pip-v4`)
pub fn default_outbound_ip_name(infra_id: &str) -> String {
    format!("{}-pip-v4", infra_id)
}
