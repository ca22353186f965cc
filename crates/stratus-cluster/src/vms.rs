//! Restarting stopped cluster VMs

use futures::future::try_join_all;
use tracing::{info, instrument};

use stratus_common::Result;

use crate::manager::Manager;
use crate::models::VirtualMachine;

const POWER_STATE_STOPPED: &str = "PowerState/stopped";
const POWER_STATE_DEALLOCATED: &str = "PowerState/deallocated";

/// True if the VM's instance view reports it stopped or deallocated
pub fn is_stopped(vm: &VirtualMachine) -> bool {
    vm.instance_view.as_ref().is_some_and(|view| {
        view.statuses
            .iter()
            .any(|s| s.code == POWER_STATE_STOPPED || s.code == POWER_STATE_DEALLOCATED)
    })
}

impl Manager {
    /// Start every stopped VM in the cluster resource group
    ///
    /// Starts run concurrently; the first failure cancels the rest.
    #[instrument(skip(self))]
    pub async fn start_vms(&self) -> Result<()> {
        let resource_group = self.resource_group();
        let resource_group = resource_group.as_str();
        let vms = self.clouds.virtual_machines.list(resource_group).await?;

        let views = try_join_all(vms.iter().map(|vm| {
            self.clouds
                .virtual_machines
                .get_instance_view(resource_group, &vm.name)
        }))
        .await?;

        let starts = views.iter().filter(|vm| is_stopped(vm)).map(|vm| async move {
            info!(vm = %vm.name, "starting VM");
            self.clouds
                .virtual_machines
                .start_and_wait(resource_group, &vm.name)
                .await
        });
        try_join_all(starts).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::testing::*;
    use crate::models::{InstanceView, InstanceViewStatus};
    use stratus_common::Error;

    fn vm(name: &str) -> VirtualMachine {
        VirtualMachine {
            id: format!("/vms/{}", name),
            name: name.to_string(),
            instance_view: None,
        }
    }

    fn with_power_state(name: &str, code: &str) -> VirtualMachine {
        VirtualMachine {
            instance_view: Some(InstanceView {
                statuses: vec![
                    InstanceViewStatus {
                        code: "ProvisioningState/succeeded".to_string(),
                    },
                    InstanceViewStatus {
                        code: code.to_string(),
                    },
                ],
            }),
            ..vm(name)
        }
    }

    #[tokio::test]
    async fn only_stopped_and_deallocated_vms_are_started() {
        let mut harness = Harness::new();
        harness
            .virtual_machines
            .expect_list()
            .withf(|rg| rg == "cluster-rg")
            .returning(|_| Ok(vec![vm("master-0"), vm("master-1"), vm("worker-0")]));
        harness
            .virtual_machines
            .expect_get_instance_view()
            .returning(|_, name| {
                Ok(match name {
                    "master-0" => with_power_state(name, "PowerState/running"),
                    "master-1" => with_power_state(name, POWER_STATE_STOPPED),
                    _ => with_power_state(name, POWER_STATE_DEALLOCATED),
                })
            });
        harness
            .virtual_machines
            .expect_start_and_wait()
            .withf(|_, name| name == "master-1")
            .times(1)
            .returning(|_, _| Ok(()));
        harness
            .virtual_machines
            .expect_start_and_wait()
            .withf(|_, name| name == "worker-0")
            .times(1)
            .returning(|_, _| Ok(()));
        let (manager, _store) = harness.build(document());

        manager.start_vms().await.unwrap();
    }

    #[tokio::test]
    async fn start_failure_is_returned() {
        let mut harness = Harness::new();
        harness
            .virtual_machines
            .expect_list()
            .returning(|_| Ok(vec![vm("master-0")]));
        harness
            .virtual_machines
            .expect_get_instance_view()
            .returning(|_, name| Ok(with_power_state(name, POWER_STATE_STOPPED)));
        harness
            .virtual_machines
            .expect_start_and_wait()
            .returning(|_, name| Err(Error::cloud(409, "OperationNotAllowed", name, "quota")));
        let (manager, _store) = harness.build(document());

        let err = manager.start_vms().await.unwrap_err();
        assert!(matches!(err, Error::Cloud { status: 409, .. }));
    }

    #[test]
    fn vm_without_instance_view_is_not_stopped() {
        assert!(!is_stopped(&vm("master-0")));
        assert!(is_stopped(&with_power_state("m", POWER_STATE_DEALLOCATED)));
    }
}
