//! Lifecycle pipelines: install, update, admin update and delete
//!
//! Each entry point builds a fresh `Vec<Step>` from the current document and
//! hands it to the manager's runner. Install is split into phases; the
//! persisted phase selects which plan runs, and the last step of every plan
//! advances or clears it. A crashed install therefore resumes at the top of
//! the phase it was in.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use stratus_common::document::MaintenanceTask;
use stratus_common::{Error, InstallPhase, InstallState, Result};
use stratus_steps::Step;

use crate::manager::Manager;

impl Manager {
    /// Run the current install phase
    ///
    /// Installation is started on first call. Only the plan for the persisted
    /// phase runs; callers invoke this again to drive later phases.
    #[instrument(skip(self, cancel))]
    pub async fn install(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        self.start_installation().await?;

        let install = self.doc().properties.install.ok_or_else(|| {
            Error::internal_with_context("install", "install state missing after start")
        })?;
        let phase = install.current_phase()?;

        info!(phase = %phase, "starting install phase");
        let steps = match phase {
            InstallPhase::Bootstrap => self.bootstrap_steps(),
            InstallPhase::RemoveBootstrap => self.remove_bootstrap_steps(),
        };
        self.run_steps(&steps, cancel).await
    }

    /// Record the start of an install if none is in progress
    pub async fn start_installation(&self) -> Result<()> {
        let now = Utc::now();
        self.patch(|doc| {
            if doc.properties.install.is_none() {
                doc.properties.install = Some(InstallState::start(now));
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Advance to the next install phase
    pub async fn incr_install_phase(&self) -> Result<()> {
        let doc = self
            .patch(|doc| {
                let install = doc.properties.install.as_mut().ok_or_else(|| {
                    Error::internal_with_context("incr_install_phase", "no install in progress")
                })?;
                let next = install.current_phase()?.next().ok_or_else(|| {
                    Error::internal_with_context("incr_install_phase", "already in the final phase")
                })?;
                install.phase = next as i32;
                Ok(())
            })
            .await?;

        if let Some(install) = &doc.properties.install {
            info!(phase = install.phase, "advanced install phase");
        }
        Ok(())
    }

    /// Clear the install state once the final phase has succeeded
    pub async fn finish_installation(&self) -> Result<()> {
        self.patch(|doc| {
            doc.properties.install = None;
            Ok(())
        })
        .await?;
        info!("installation finished");
        Ok(())
    }

    /// Plan for the Bootstrap phase
    pub fn bootstrap_steps(self: &Arc<Self>) -> Vec<Step> {
        vec![
            self.refreshing(self.action("validate_resources", |m, _| async move {
                m.provisioner.validate_resources(&m.doc()).await
            })),
            self.action("ensure_infra_id", |m, _| async move { m.ensure_infra_id().await }),
            self.action("create_dns", |m, _| async move {
                m.provisioner.create_dns(&m.doc()).await
            }),
            self.refreshing(self.action("ensure_resource_group", |m, _| async move {
                m.provisioner.ensure_resource_group(&m.doc()).await
            })),
            self.refreshing(self.action("deploy_storage_template", |m, _| async move {
                m.provisioner.deploy_storage_template(&m.doc()).await
            })),
            self.refreshing(self.action("deploy_base_resources", |m, _| async move {
                m.provisioner.deploy_base_resources(&m.doc()).await
            })),
            self.action("create_certificates", |m, _| async move {
                m.provisioner.create_certificates(&m.doc()).await
            }),
            self.action("run_installer", |m, _| async move {
                m.provisioner.run_installer(&m.doc()).await
            }),
            self.refreshing(self.action("generate_kubeconfigs", |m, _| async move {
                m.provisioner.generate_kubeconfigs(&m.doc()).await
            })),
            self.condition("api_servers_ready", self.config.api_servers_timeout(), |m, _| async move {
                m.api_servers_ready().await
            }),
            self.action("ensure_operator", |m, _| async move {
                m.provisioner.ensure_operator(&m.doc()).await
            }),
            self.action("incr_install_phase", |m, _| async move { m.incr_install_phase().await }),
        ]
    }

    /// Plan for the RemoveBootstrap phase
    pub fn remove_bootstrap_steps(self: &Arc<Self>) -> Vec<Step> {
        let config = &self.config;
        vec![
            self.action("remove_bootstrap", |m, _| async move {
                m.provisioner.remove_bootstrap(&m.doc()).await
            })
            .with_metric("remove_bootstrap"),
            self.action("configure_api_server_certificate", |m, _| async move {
                m.provisioner.configure_api_server_certificate(&m.doc()).await
            })
            .with_metric("configure_api_server_certificate"),
            self.condition("api_servers_ready", config.api_servers_timeout(), |m, _| async move {
                m.api_servers_ready().await
            })
            .with_metric("finishing_phase_check_api_server"),
            self.condition("minimum_worker_nodes_ready", config.workers_timeout(), |m, _| async move {
                m.minimum_worker_nodes_ready().await
            })
            .with_metric("check_minimum_worker_nodes"),
            self.condition("operator_console_exists", config.console_timeout(), |m, _| async move {
                m.operator_console_exists().await
            })
            .with_metric("check_operator_console_exists"),
            self.condition("operator_console_ready", config.console_timeout(), |m, _| async move {
                m.operator_console_ready().await
            })
            .with_metric("check_operator_console"),
            self.condition("cluster_version_ready", config.cluster_version_timeout(), |m, _| async move {
                m.cluster_version_ready().await
            })
            .with_metric("check_cluster_version"),
            self.operator_ready_condition().with_metric("check_operator_deployment"),
            self.action("disable_updates", |m, _| async move { m.disable_updates().await })
                .with_metric("disable_updates"),
            self.action("configure_ingress_certificate", |m, _| async move {
                m.provisioner.configure_ingress_certificate(&m.doc()).await
            })
            .with_metric("configure_ingress_certificate"),
            self.condition("ingress_controller_ready", config.ingress_timeout(), |m, _| async move {
                m.ingress_controller_ready().await
            })
            .with_metric("check_ingress_controller"),
            self.action("configure_default_storage_class", |m, _| async move {
                m.provisioner.configure_default_storage_class(&m.doc()).await
            })
            .with_metric("configure_default_storage_class"),
            self.action("finish_installation", |m, _| async move { m.finish_installation().await })
                .with_metric("finish_installation"),
        ]
    }

    /// Rotate credentials on a running cluster
    #[instrument(skip(self, cancel))]
    pub async fn update(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        let steps = vec![
            self.refreshing(self.action("validate_resources", |m, _| async move {
                m.provisioner.validate_resources(&m.doc()).await
            })),
            self.start_vms_step(),
            self.api_servers_ready_condition(),
            self.action("configure_api_server_certificate", |m, _| async move {
                m.provisioner.configure_api_server_certificate(&m.doc()).await
            }),
            self.action("configure_ingress_certificate", |m, _| async move {
                m.provisioner.configure_ingress_certificate(&m.doc()).await
            }),
            self.action("rotate_credentials", |m, _| async move {
                m.provisioner.rotate_credentials(&m.doc()).await
            }),
        ];
        self.run_steps(&steps, cancel).await
    }

    /// Run the remediation selected by the document's maintenance task
    #[instrument(skip(self, cancel))]
    pub async fn admin_update(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        let steps = self.admin_update_steps();
        self.run_steps(&steps, cancel).await
    }

    /// Plan for an admin update
    pub fn admin_update_steps(self: &Arc<Self>) -> Vec<Step> {
        let task = self.doc().properties.maintenance_task;
        info!(task = ?task, "planning admin update");
        let everything = task == MaintenanceTask::Everything;

        let mut steps = Vec::new();

        if everything {
            steps.push(self.refreshing(self.action("ensure_resource_group", |m, _| async move {
                m.provisioner.ensure_resource_group(&m.doc()).await
            })));
            steps.push(self.action("populate_database_int_ip", |m, _| async move {
                m.populate_database_int_ip().await
            }));
        }

        match task {
            MaintenanceTask::LoadBalancerProfile => {
                steps.push(self.action("reconcile_load_balancer_profile", |m, _| async move {
                    m.reconcile_load_balancer_profile().await
                }));
            }
            MaintenanceTask::ZonalMigration => {
                steps.push(self.action("migrate_internal_lb_zones", |m, _| async move {
                    m.migrate_internal_lb_zones().await
                }));
            }
            MaintenanceTask::Everything | MaintenanceTask::Operator => {
                steps.push(self.start_vms_step());
                steps.push(self.api_servers_ready_condition());
            }
        }

        if everything {
            steps.push(self.action("configure_api_server_certificate", |m, _| async move {
                m.provisioner.configure_api_server_certificate(&m.doc()).await
            }));
            steps.push(self.action("configure_ingress_certificate", |m, _| async move {
                m.provisioner.configure_ingress_certificate(&m.doc()).await
            }));
        }

        if matches!(task, MaintenanceTask::Everything | MaintenanceTask::Operator) {
            steps.push(self.action("ensure_operator", |m, _| async move {
                m.provisioner.ensure_operator(&m.doc()).await
            }));
            steps.push(self.operator_ready_condition());
        }

        // last, so the recorded build reflects a completed remediation
        if everything {
            steps.push(self.action("update_provisioned_by", |m, _| async move {
                m.update_provisioned_by().await
            }));
        }

        steps
    }

    /// Tear the cluster down
    ///
    /// Re-creating the resource group's access first is best effort.
    #[instrument(skip(self, cancel))]
    pub async fn delete(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        info!("ensuring resource group before deletion");
        if let Err(e) = self.provisioner.ensure_resource_group(&self.doc()).await {
            error!(error = %e, "failed to ensure resource group");
        }

        let steps = vec![
            self.action("delete_dns", |m, _| async move { m.provisioner.delete_dns(&m.doc()).await }),
            self.refreshing(self.action("delete_resources_and_resource_group", |m, _| async move {
                m.delete_resources_and_resource_group().await
            })),
        ];
        self.run_steps(&steps, cancel).await
    }

    fn start_vms_step(self: &Arc<Self>) -> Step {
        self.action("start_vms", |m, _| async move { m.start_vms().await })
    }

    fn api_servers_ready_condition(self: &Arc<Self>) -> Step {
        self.condition("api_servers_ready", self.config.api_servers_timeout(), |m, _| async move {
            m.api_servers_ready().await
        })
    }

    fn operator_ready_condition(self: &Arc<Self>) -> Step {
        self.condition("operator_ready", self.config.operator_timeout(), |m, _| async move {
            m.provisioner.operator_ready(&m.doc()).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use k8s_openapi::api::core::v1::Node;
    use stratus_common::store::MemoryStore;
    use stratus_common::WorkflowDocument;
    use stratus_steps::Diagnostics;

    use super::*;
    use crate::clients::{ClusterOperator, ClusterVersion, OperatorCondition};
    use crate::manager::testing::*;

    fn step_names(steps: &[Step]) -> Vec<String> {
        steps
            .iter()
            .map(|s| {
                let shown = s.to_string();
                let inner = shown
                    .strip_prefix("AuthorizationRefreshingAction [")
                    .and_then(|s| s.strip_suffix(']'))
                    .unwrap_or(&shown)
                    .to_string();
                let name = inner
                    .trim_start_matches("Action ")
                    .trim_start_matches("Condition ");
                name.split(',').next().unwrap().to_string()
            })
            .collect()
    }

    fn available_operators(harness: &mut Harness) {
        harness.managed.expect_get_cluster_operator().returning(|name| {
            Ok(Some(ClusterOperator {
                name: name.to_string(),
                conditions: vec![
                    OperatorCondition::new("Available", "True"),
                    OperatorCondition::new("Progressing", "False"),
                ],
            }))
        });
    }

    fn expect_bootstrap_provisioning(harness: &mut Harness) {
        let p = &mut harness.provisioner;
        p.expect_validate_resources().times(1).returning(|_| Ok(()));
        p.expect_create_dns().times(1).returning(|_| Ok(()));
        p.expect_ensure_resource_group().times(1).returning(|_| Ok(()));
        p.expect_deploy_storage_template().times(1).returning(|_| Ok(()));
        p.expect_deploy_base_resources().times(1).returning(|_| Ok(()));
        p.expect_create_certificates().times(1).returning(|_| Ok(()));
        p.expect_run_installer().times(1).returning(|_| Ok(()));
        p.expect_generate_kubeconfigs().times(1).returning(|_| Ok(()));
        p.expect_ensure_operator().times(1).returning(|_| Ok(()));
    }

    #[tokio::test]
    async fn bootstrap_phase_starts_install_and_advances() {
        let mut harness = Harness::new();
        expect_bootstrap_provisioning(&mut harness);
        available_operators(&mut harness);
        let mut doc = document();
        doc.properties.infra_id.clear();
        let (manager, store) = harness.build(doc);

        manager.install(&CancellationToken::new()).await.unwrap();

        let stored = store.snapshot(KEY).unwrap();
        let install = stored.properties.install.unwrap();
        assert_eq!(install.current_phase().unwrap(), InstallPhase::RemoveBootstrap);
        assert!(stored.properties.infra_id.starts_with("my-cluster-"));
    }

    #[tokio::test]
    async fn failed_step_leaves_the_phase_unchanged() {
        let mut harness = Harness::new();
        harness
            .provisioner
            .expect_validate_resources()
            .returning(|_| Ok(()));
        harness
            .provisioner
            .expect_create_dns()
            .returning(|_| Err(Error::cloud(500, "InternalServerError", "dns", "boom")));
        let (manager, store) = harness.build(document());

        let err = manager.install(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, Error::Cloud { status: 500, .. }));
        let install = store.snapshot(KEY).unwrap().properties.install.unwrap();
        assert_eq!(install.current_phase().unwrap(), InstallPhase::Bootstrap);
    }

    fn expect_remove_bootstrap_provisioning(harness: &mut Harness) {
        let p = &mut harness.provisioner;
        p.expect_remove_bootstrap().times(1).returning(|_| Ok(()));
        p.expect_configure_api_server_certificate().times(1).returning(|_| Ok(()));
        p.expect_configure_ingress_certificate().times(1).returning(|_| Ok(()));
        p.expect_configure_default_storage_class()
            .times(1)
            .returning(|doc| {
                assert!(doc.properties.install.is_some());
                Ok(())
            });
        p.expect_operator_ready().returning(|_| Ok(true));
        harness.managed.expect_list_nodes().returning(|_| {
            let ready = |name: &str| -> Node {
                serde_json::from_value(serde_json::json!({
                    "metadata": {"name": name},
                    "status": {"conditions": [{"type": "Ready", "status": "True"}]}
                }))
                .unwrap()
            };
            Ok(vec![ready("w-0"), ready("w-1"), ready("w-2")])
        });
        harness.managed.expect_console_exists().returning(|| Ok(true));
        harness.managed.expect_get_cluster_version().returning(|| {
            Ok(ClusterVersion {
                resource_version: Some("1".to_string()),
                channel: Some("stable".to_string()),
                upstream: None,
                conditions: vec![OperatorCondition::new("Available", "True")],
            })
        });
        harness
            .managed
            .expect_update_cluster_version()
            .times(1)
            .returning(|_| Ok(()));
    }

    #[tokio::test]
    async fn resumed_install_runs_only_the_persisted_phase() {
        let mut harness = Harness::new();
        available_operators(&mut harness);
        expect_remove_bootstrap_provisioning(&mut harness);

        let mut doc = document();
        doc.properties.install = Some(InstallState {
            phase: InstallPhase::RemoveBootstrap as i32,
            started_at: Utc::now(),
        });
        let (manager, store) = harness.build(doc);

        manager.install(&CancellationToken::new()).await.unwrap();

        assert!(store.snapshot(KEY).unwrap().properties.install.is_none());
    }

    #[tokio::test]
    async fn phase_only_moves_forward_across_repeated_installs() {
        let dns_calls = Arc::new(AtomicU32::new(0));
        let mut harness = Harness::new();
        available_operators(&mut harness);
        expect_remove_bootstrap_provisioning(&mut harness);

        let p = &mut harness.provisioner;
        p.expect_validate_resources().times(2).returning(|_| Ok(()));
        let calls = dns_calls.clone();
        p.expect_create_dns().times(2).returning(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::cloud(500, "InternalServerError", "dns", "boom"))
            } else {
                Ok(())
            }
        });
        p.expect_ensure_resource_group().times(1).returning(|_| Ok(()));
        p.expect_deploy_storage_template().times(1).returning(|_| Ok(()));
        p.expect_deploy_base_resources().times(1).returning(|_| Ok(()));
        p.expect_create_certificates().times(1).returning(|_| Ok(()));
        p.expect_run_installer().times(1).returning(|_| Ok(()));
        p.expect_generate_kubeconfigs().times(1).returning(|_| Ok(()));
        p.expect_ensure_operator().times(1).returning(|_| Ok(()));
        let (manager, store) = harness.build(document());
        let cancel = CancellationToken::new();

        let phase = |store: &MemoryStore<WorkflowDocument>| {
            store
                .snapshot(KEY)
                .unwrap()
                .properties
                .install
                .map(|install| install.current_phase().unwrap())
        };

        assert!(manager.install(&cancel).await.is_err());
        assert_eq!(phase(&store), Some(InstallPhase::Bootstrap));
        let started_at = store.snapshot(KEY).unwrap().properties.install.unwrap().started_at;

        manager.install(&cancel).await.unwrap();
        assert_eq!(phase(&store), Some(InstallPhase::RemoveBootstrap));
        assert_eq!(
            store.snapshot(KEY).unwrap().properties.install.unwrap().started_at,
            started_at
        );

        manager.install(&cancel).await.unwrap();
        assert_eq!(phase(&store), None);
        assert_eq!(dns_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn losing_concurrent_start_keeps_the_winners_install() {
        let winner = InstallState {
            phase: InstallPhase::RemoveBootstrap as i32,
            started_at: Utc::now() - chrono::Duration::hours(2),
        };
        let (manager, store) = Harness::new().build(document());
        let competing = winner.clone();
        store.interleave_once(move |doc| doc.properties.install = Some(competing));

        manager.start_installation().await.unwrap();

        let install = store.snapshot(KEY).unwrap().properties.install.unwrap();
        assert_eq!(install, winner);
    }

    #[tokio::test]
    async fn unknown_phase_is_fatal() {
        let mut doc = document();
        doc.properties.install = Some(InstallState {
            phase: 7,
            started_at: Utc::now(),
        });
        let (manager, store) = Harness::new().build(doc);

        let err = manager.install(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, Error::UnknownPhase(7)));
        assert!(!err.is_retryable());
        assert_eq!(store.snapshot(KEY).unwrap().properties.install.unwrap().phase, 7);
    }

    #[tokio::test]
    async fn start_installation_keeps_an_existing_install() {
        let started_at = Utc::now() - chrono::Duration::hours(1);
        let mut doc = document();
        doc.properties.install = Some(InstallState {
            phase: InstallPhase::RemoveBootstrap as i32,
            started_at,
        });
        let (manager, store) = Harness::new().build(doc);

        manager.start_installation().await.unwrap();

        let install = store.snapshot(KEY).unwrap().properties.install.unwrap();
        assert_eq!(install.started_at, started_at);
        assert_eq!(install.phase, InstallPhase::RemoveBootstrap as i32);
    }

    #[tokio::test]
    async fn phase_cannot_advance_past_the_last() {
        let mut doc = document();
        doc.properties.install = Some(InstallState {
            phase: InstallPhase::RemoveBootstrap as i32,
            started_at: Utc::now(),
        });
        let (manager, _store) = Harness::new().build(doc);

        assert!(manager.incr_install_phase().await.is_err());

        manager.finish_installation().await.unwrap();
        assert!(manager.incr_install_phase().await.is_err());
    }

    #[test]
    fn install_plans_end_by_advancing_the_phase() {
        let (manager, _store) = Harness::new().build(document());

        let bootstrap = step_names(&manager.bootstrap_steps());
        assert_eq!(bootstrap.first().unwrap(), "validate_resources");
        assert_eq!(bootstrap.last().unwrap(), "incr_install_phase");

        let remove = manager.remove_bootstrap_steps();
        assert_eq!(step_names(&remove).last().unwrap(), "finish_installation");
        assert!(remove.iter().all(|s| s.metric().is_some()));
    }

    #[test]
    fn admin_update_plans_follow_the_maintenance_task() {
        let plan = |task| {
            let mut doc = document();
            doc.properties.maintenance_task = task;
            let (manager, _store) = Harness::new().build(doc);
            step_names(&manager.admin_update_steps())
        };

        assert_eq!(
            plan(MaintenanceTask::Everything),
            vec![
                "ensure_resource_group",
                "populate_database_int_ip",
                "start_vms",
                "api_servers_ready",
                "configure_api_server_certificate",
                "configure_ingress_certificate",
                "ensure_operator",
                "operator_ready",
                "update_provisioned_by",
            ]
        );
        assert_eq!(
            plan(MaintenanceTask::Operator),
            vec!["start_vms", "api_servers_ready", "ensure_operator", "operator_ready"]
        );
        assert_eq!(
            plan(MaintenanceTask::LoadBalancerProfile),
            vec!["reconcile_load_balancer_profile"]
        );
        assert_eq!(
            plan(MaintenanceTask::ZonalMigration),
            vec!["migrate_internal_lb_zones"]
        );
    }

    #[tokio::test]
    async fn load_balancer_profile_task_on_user_defined_routing_is_a_no_op() {
        let mut doc = document();
        doc.properties.maintenance_task = MaintenanceTask::LoadBalancerProfile;
        doc.properties.network_profile.outbound_type =
            stratus_common::document::OutboundType::UserDefinedRouting;
        let (manager, store) = Harness::new().build(doc);

        manager.admin_update(&CancellationToken::new()).await.unwrap();

        assert_eq!(store.writes(), 0);
    }

    struct CountingDiagnostics(AtomicU32);

    #[async_trait::async_trait]
    impl Diagnostics for CountingDiagnostics {
        async fn gather_failure_logs(&self, _cancel: CancellationToken) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(Error::internal("cluster unreachable"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn api_server_timeout_gathers_diagnostics_and_aborts() {
        let diagnostics = Arc::new(CountingDiagnostics(AtomicU32::new(0)));
        let mut harness = Harness::new();
        harness.diagnostics = Some(diagnostics.clone());
        harness.provisioner.expect_validate_resources().returning(|_| Ok(()));
        harness.virtual_machines.expect_list().returning(|_| Ok(Vec::new()));
        harness
            .managed
            .expect_get_cluster_operator()
            .returning(|_| Ok(None));
        let (manager, _store) = harness.build(document());

        let started = tokio::time::Instant::now();
        let err = manager.update(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, Error::ConditionTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_secs(30 * 60));
        assert_eq!(diagnostics.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delete_continues_when_ensuring_the_resource_group_fails() {
        let mut harness = Harness::new();
        harness
            .provisioner
            .expect_ensure_resource_group()
            .returning(|_| Err(Error::cloud(403, "AuthorizationFailed", "rg", "denied")));
        harness.provisioner.expect_delete_dns().times(1).returning(|_| Ok(()));
        harness
            .resource_groups
            .expect_get()
            .returning(|name| Err(Error::not_found(name)));
        let (manager, _store) = harness.build(document());

        manager.delete(&CancellationToken::new()).await.unwrap();
    }
}
