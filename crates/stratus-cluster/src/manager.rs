//! Per-cluster lifecycle manager
//!
//! A [`Manager`] owns the collaborators one cluster's pipelines need and a
//! cached copy of its [`WorkflowDocument`]. The cache is refreshed from every
//! leased patch and is never held across an await; the store's compare and
//! swap is the only synchronization between workers.
//!
//! Use [`ManagerBuilder`] to construct instances:
//!
//! ```text
//! let manager = Manager::builder(doc, store, clouds, managed, provisioner)
//!     .config(config)
//!     .diagnostics(diagnostics)
//!     .build();
//! ```

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use stratus_common::document::ArchitectureVersion;
use stratus_common::resource_id::last_token;
use stratus_common::{
    patch_with_lease, DocumentStore, Error, OrchestratorConfig, Result, WorkflowDocument,
};
use stratus_steps::{Authorizer, Diagnostics, Runner, Step};

use crate::clients::{CloudClients, ManagedClusterClient};
use crate::naming::{
    generate_infra_id, NameGenerator, UuidNameGenerator, INFRA_ID_MAX_LEN, INFRA_ID_RANDOM_LEN,
};
use crate::provisioner::Provisioner;

/// Drives one cluster through install, update, admin update and delete
pub struct Manager {
    /// Cloud resource clients scoped to the cluster's subscription
    pub clouds: CloudClients,
    /// Client for the managed cluster's own API
    pub managed: Arc<dyn ManagedClusterClient>,
    /// Template and installer collaborator
    pub provisioner: Arc<dyn Provisioner>,
    /// Source of names for created resources
    pub names: Arc<dyn NameGenerator>,
    /// Credential refreshed when a step hits an authorization failure
    pub authorizer: Option<Arc<dyn Authorizer>>,
    /// Durable home of the workflow document
    pub store: Arc<dyn DocumentStore<WorkflowDocument>>,
    /// Timeouts, retry policy and lease owner
    pub config: OrchestratorConfig,
    runner: Runner,
    provisioned_by: String,
    doc: RwLock<WorkflowDocument>,
}

impl Manager {
    /// Create a builder for constructing a Manager
    pub fn builder(
        doc: WorkflowDocument,
        store: Arc<dyn DocumentStore<WorkflowDocument>>,
        clouds: CloudClients,
        managed: Arc<dyn ManagedClusterClient>,
        provisioner: Arc<dyn Provisioner>,
    ) -> ManagerBuilder {
        ManagerBuilder::new(doc, store, clouds, managed, provisioner)
    }

    /// Snapshot of the cached document
    pub fn doc(&self) -> WorkflowDocument {
        self.doc.read().clone()
    }

    /// Leased patch of the document; the cache takes the written version
    pub async fn patch<F>(&self, mutate: F) -> Result<WorkflowDocument>
    where
        F: FnMut(&mut WorkflowDocument) -> Result<()> + Send,
    {
        let key = self.doc.read().key.clone();
        let updated = patch_with_lease(
            self.store.as_ref(),
            &key,
            &self.config.lease_owner,
            &self.config.conflict_retry(),
            mutate,
        )
        .await?;
        *self.doc.write() = updated.clone();
        Ok(updated)
    }

    /// Name of the cluster's managed resource group
    pub fn resource_group(&self) -> String {
        last_token(&self.doc.read().properties.cluster_profile.resource_group_id).to_string()
    }

    /// Build an Action that runs `f` against this manager
    pub fn action<F, Fut>(self: &Arc<Self>, name: &str, f: F) -> Step
    where
        F: Fn(Arc<Manager>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let manager = Arc::clone(self);
        Step::action(name, move |cancel| f(Arc::clone(&manager), cancel))
    }

    /// Build a failing Condition that polls `f` against this manager
    pub fn condition<F, Fut>(self: &Arc<Self>, name: &str, timeout: std::time::Duration, f: F) -> Step
    where
        F: Fn(Arc<Manager>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        let manager = Arc::clone(self);
        Step::condition(name, move |cancel| f(Arc::clone(&manager), cancel), timeout, true)
    }

    /// Wrap `step` so an authorization failure refreshes credentials and retries once
    pub fn refreshing(&self, step: Step) -> Step {
        match &self.authorizer {
            Some(authorizer) => Step::authorization_refreshing(Arc::clone(authorizer), step),
            None => step,
        }
    }

    /// Run a pipeline and log per-topic and total durations on success
    pub async fn run_steps(&self, steps: &[Step], cancel: &CancellationToken) -> Result<()> {
        let timings = self.runner.run(steps, cancel).await?;

        let mut total = 0.0;
        for (topic, seconds) in &timings {
            info!(topic = %topic, seconds = seconds, "step duration");
            total += seconds;
        }
        if !timings.is_empty() {
            info!(seconds = total, "total step duration");
        }
        Ok(())
    }

    /// Give the cluster an infra ID if it has none
    #[instrument(skip(self))]
    pub async fn ensure_infra_id(&self) -> Result<()> {
        let doc = self.doc();
        if !doc.properties.infra_id.is_empty() {
            return Ok(());
        }

        let infra_id = generate_infra_id(
            &last_token(&doc.id).to_lowercase(),
            INFRA_ID_MAX_LEN,
            INFRA_ID_RANDOM_LEN,
        );
        info!(infra_id = %infra_id, "assigning infra ID");
        self.patch(|doc| {
            if doc.properties.infra_id.is_empty() {
                doc.properties.infra_id = infra_id.clone();
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Record which build last drove this cluster
    pub async fn update_provisioned_by(&self) -> Result<()> {
        let version = self.provisioned_by.clone();
        self.patch(|doc| {
            doc.properties.provisioned_by = version.clone();
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Backfill the API server's internal IP from the internal load balancer
    #[instrument(skip(self))]
    pub async fn populate_database_int_ip(&self) -> Result<()> {
        let doc = self.doc();
        if !doc.properties.api_server_profile.int_ip.is_empty() {
            return Ok(());
        }

        let lb_name = internal_lb_name(&doc);
        let lb = self
            .clouds
            .load_balancers
            .get(&self.resource_group(), &lb_name)
            .await?;

        let int_ip = lb
            .frontend_ip_configurations
            .first()
            .and_then(|fip| fip.private_ip_address.clone())
            .ok_or_else(|| {
                Error::internal_with_context(
                    "populate_database_int_ip",
                    format!("load balancer {} has no private frontend IP", lb_name),
                )
            })?;

        info!(int_ip = %int_ip, "recording API server internal IP");
        self.patch(|doc| {
            doc.properties.api_server_profile.int_ip = int_ip.clone();
            Ok(())
        })
        .await?;
        Ok(())
    }
}

/// Name of the cluster's internal load balancer
pub fn internal_lb_name(doc: &WorkflowDocument) -> String {
    let infra_id = match doc.properties.infra_id.as_str() {
        "" => "aro",
        id => id,
    };
    match doc.properties.architecture_version {
        ArchitectureVersion::V1 => format!("{}-internal-lb", infra_id),
        ArchitectureVersion::V2 => format!("{}-internal", infra_id),
    }
}

/// Builder for constructing [`Manager`] instances
pub struct ManagerBuilder {
    doc: WorkflowDocument,
    store: Arc<dyn DocumentStore<WorkflowDocument>>,
    clouds: CloudClients,
    managed: Arc<dyn ManagedClusterClient>,
    provisioner: Arc<dyn Provisioner>,
    names: Option<Arc<dyn NameGenerator>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    diagnostics: Option<Arc<dyn Diagnostics>>,
    config: OrchestratorConfig,
    provisioned_by: String,
}

impl ManagerBuilder {
    fn new(
        doc: WorkflowDocument,
        store: Arc<dyn DocumentStore<WorkflowDocument>>,
        clouds: CloudClients,
        managed: Arc<dyn ManagedClusterClient>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        Self {
            doc,
            store,
            clouds,
            managed,
            provisioner,
            names: None,
            authorizer: None,
            diagnostics: None,
            config: OrchestratorConfig::default(),
            provisioned_by: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Override the resource name generator (primarily for testing)
    pub fn names(mut self, names: Arc<dyn NameGenerator>) -> Self {
        self.names = Some(names);
        self
    }

    /// Set the credential refreshed on authorization failures
    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Set the hook that gathers logs when a pipeline fails
    pub fn diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Set timeouts, retry policy and lease owner
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the build identifier recorded on admin update
    pub fn provisioned_by(mut self, version: impl Into<String>) -> Self {
        self.provisioned_by = version.into();
        self
    }

    /// Build the Manager
    pub fn build(self) -> Manager {
        let mut runner = Runner::new(self.config.poll_interval());
        if self.config.gather_failure_logs {
            if let Some(diagnostics) = self.diagnostics {
                runner = runner.with_diagnostics(diagnostics);
            }
        }

        Manager {
            clouds: self.clouds,
            managed: self.managed,
            provisioner: self.provisioner,
            names: self.names.unwrap_or_else(|| Arc::new(UuidNameGenerator)),
            authorizer: self.authorizer,
            store: self.store,
            config: self.config,
            runner,
            provisioned_by: self.provisioned_by,
            doc: RwLock::new(self.doc),
        }
    }
}
