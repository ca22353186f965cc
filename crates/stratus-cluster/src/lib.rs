//! Cluster lifecycle management for Stratus
//!
//! A [`Manager`] drives one cluster through install, update, admin update and
//! delete by building step pipelines and running them, and owns the
//! reconciliation algorithms those pipelines call: outbound IP pool
//! management, zonal migration of the internal API frontend, and leveled
//! resource-group teardown.
//!
//! Related crates:
//! - `stratus-common`: errors, config, the workflow document and its store
//! - `stratus-steps`: step primitives and the pipeline runner

pub mod clients;
pub mod conditions;
pub mod delete;
pub mod install;
pub mod loadbalancer;
pub mod manager;
pub mod models;
pub mod naming;
pub mod outbound_ips;
pub mod provisioner;
pub mod vms;
pub mod zonal;

pub use clients::{
    CloudClients, DeletionHandle, KubeManagedClusterClient, ManagedClusterClient,
};
pub use manager::{internal_lb_name, Manager, ManagerBuilder};
pub use naming::{NameGenerator, UuidNameGenerator};
pub use provisioner::Provisioner;

// Re-export common error types
pub use stratus_common::{Error, Result};
