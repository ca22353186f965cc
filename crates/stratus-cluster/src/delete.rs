//! Leveled teardown of the cluster resource group
//!
//! Resources are bucketed by type into deletion levels and each level is
//! deleted concurrently before the next one starts. Types that others
//! depend on sit at higher levels, so nothing is deleted before its
//! dependents have begun deleting.

use std::collections::BTreeMap;

use futures::future::join_all;
use tracing::{info, instrument, warn};

use stratus_common::error::{
    AUTHORIZATION_FAILED, CLOUD_ERROR_CODE_CANNOT_DELETE_LOAD_BALANCER_BY_ID,
    CLOUD_ERROR_CODE_FORBIDDEN, CLOUD_ERROR_CODE_INVALID_LINKED_VNET,
    CLOUD_ERROR_CODE_IN_USE_SUBNET_CANNOT_BE_DELETED, CLOUD_ERROR_CODE_SCOPE_LOCKED,
};
use stratus_common::resource_id::{ids_equal, ResourceId};
use stratus_common::{Error, Result};

use crate::clients::DeletionHandle;
use crate::manager::Manager;
use crate::models::{GenericResource, ProvisioningState};

const DELETE_BY_ID_TARGET: &str = "ResourceClient#delete_by_id";

/// Deletion level of a lower-cased resource type; unknown types are level 0
pub fn delete_level(resource_type: &str) -> i32 {
    match resource_type {
        // before disks and NICs
        "microsoft.compute/virtualmachines" => -3,
        // before load balancers
        "microsoft.network/privatelinkservices" => -3,
        // before NICs
        "microsoft.network/privateendpoints" => -3,
        "microsoft.compute/galleries/applications/versions" => -2,
        "microsoft.compute/galleries/images/versions" => -2,
        "microsoft.compute/galleries/applications" => -1,
        "microsoft.compute/galleries/images" => -1,
        "microsoft.compute/galleries/serviceartifacts" => -1,
        // before load balancers
        "microsoft.network/networkinterfaces" => -1,
        // get everything else underway first
        "microsoft.network/privatednszones" => 1,
        "microsoft.compute/galleries" => 1,
        _ => 0,
    }
}

/// API version used to delete a lower-cased resource type by ID
pub fn api_version(resource_type: &str) -> Option<&'static str> {
    match resource_type {
        "microsoft.compute/virtualmachines"
        | "microsoft.compute/disks"
        | "microsoft.compute/images"
        | "microsoft.compute/galleries"
        | "microsoft.compute/galleries/images"
        | "microsoft.compute/galleries/images/versions"
        | "microsoft.compute/galleries/applications"
        | "microsoft.compute/galleries/applications/versions"
        | "microsoft.compute/galleries/serviceartifacts" => Some("2022-03-01"),
        "microsoft.network/loadbalancers"
        | "microsoft.network/networkinterfaces"
        | "microsoft.network/networksecuritygroups"
        | "microsoft.network/privateendpoints"
        | "microsoft.network/privatelinkservices"
        | "microsoft.network/publicipaddresses"
        | "microsoft.network/routetables" => Some("2020-08-01"),
        "microsoft.network/privatednszones" => Some("2018-09-01"),
        "microsoft.storage/storageaccounts" => Some("2021-09-01"),
        _ => None,
    }
}

/// Map a delete-by-ID failure onto the user-facing error it represents
pub fn delete_by_id_error(err: Error) -> Error {
    let message = err.to_string();
    let user = |status: u16, code: &str| {
        Error::user(status, code, DELETE_BY_ID_TARGET, message.clone())
    };

    if message.contains("CannotDeleteLoadBalancerWithPrivateLinkService") {
        user(400, CLOUD_ERROR_CODE_CANNOT_DELETE_LOAD_BALANCER_BY_ID)
    } else if message.contains(AUTHORIZATION_FAILED) {
        user(403, CLOUD_ERROR_CODE_FORBIDDEN)
    } else if message.contains(CLOUD_ERROR_CODE_IN_USE_SUBNET_CANNOT_BE_DELETED) {
        user(400, CLOUD_ERROR_CODE_IN_USE_SUBNET_CANNOT_BE_DELETED)
    } else if message.contains(CLOUD_ERROR_CODE_SCOPE_LOCKED) {
        user(409, CLOUD_ERROR_CODE_SCOPE_LOCKED)
    } else {
        err
    }
}

impl Manager {
    /// Delete every resource in the cluster resource group, level by level,
    /// then the group itself if this cluster manages it
    #[instrument(skip(self))]
    pub async fn delete_resources_and_resource_group(&self) -> Result<()> {
        let resource_group = self.resource_group();
        if !self.should_delete_resource_group(&resource_group).await? {
            return Ok(());
        }

        info!("deleting resources");
        self.delete_resources().await?;

        info!(resource_group = %resource_group, "deleting resource group");
        self.delete_resource_group(&resource_group).await
    }

    /// True if the resource group exists and is managed by this cluster
    pub async fn should_delete_resource_group(&self, name: &str) -> Result<bool> {
        let group = match self.clouds.resource_groups.get(name).await {
            Ok(group) => group,
            Err(e) if e.is_not_found() => {
                info!(resource_group = %name, "managed resource group not found, skipping deletion");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let cluster_id = self.doc().id;
        let managed_by_cluster = group
            .managed_by
            .as_deref()
            .is_some_and(|owner| ids_equal(owner, &cluster_id));
        if !managed_by_cluster {
            info!(resource_group = %name, "managed resource group not managed by cluster, skipping deletion");
        }
        Ok(managed_by_cluster)
    }

    /// Delete the resource group; an already-missing group is success
    pub async fn delete_resource_group(&self, name: &str) -> Result<()> {
        match self.clouds.resource_groups.delete_and_wait(name).await {
            Err(e) if e.is_not_found() => Ok(()),
            result => result,
        }
    }

    /// Delete all resources in the cluster resource group in dependency order
    pub async fn delete_resources(&self) -> Result<()> {
        let resource_group = self.resource_group();

        let resources = match self.clouds.resources.list_by_resource_group(&resource_group).await {
            Ok(resources) => resources,
            Err(Error::Cloud { status: 403 | 404, .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut levels: BTreeMap<i32, Vec<GenericResource>> = BTreeMap::new();
        for resource in resources {
            levels
                .entry(delete_level(&resource.resource_type.to_lowercase()))
                .or_default()
                .push(resource);
        }

        for (level, mut resources) in levels {
            resources.sort_by_key(|r| r.id.to_lowercase());
            info!(level = level, count = resources.len(), "deleting resource level");

            let mut handles = Vec::with_capacity(resources.len());
            for resource in &resources {
                if let Some(handle) = self.begin_delete(resource).await? {
                    handles.push(handle);
                }
            }

            let waits = handles.into_iter().map(|handle| async move {
                info!(resource = %handle.resource_id(), "waiting for deletion");
                handle.wait().await
            });
            if let Some(err) = join_all(waits).await.into_iter().find_map(Result::err) {
                return Err(err);
            }
        }

        Ok(())
    }

    /// Prepare and issue one deletion; `None` for unsupported types
    async fn begin_delete(&self, resource: &GenericResource) -> Result<Option<DeletionHandle>> {
        let resource_type = resource.resource_type.to_lowercase();
        let Some(api_version) = api_version(&resource_type) else {
            warn!(resource = %resource.id, "skipping resource of unsupported type");
            return Ok(None);
        };

        match resource_type.as_str() {
            "microsoft.network/networksecuritygroups" => {
                info!(resource = %resource.id, "disconnecting network security group");
                self.disconnect_security_group(&resource.id).await?;
            }
            "microsoft.network/privatednszones" => {
                info!(resource = %resource.id, "deleting private DNS virtual network links");
                self.delete_private_dns_vnet_links(&resource.id).await?;
            }
            "microsoft.network/networkinterfaces" => {
                self.reconcile_failed_nic(&resource.name).await?;
            }
            _ => {}
        }

        info!(resource = %resource.id, "deleting");
        self.clouds
            .resources
            .delete_by_id(&resource.id, api_version)
            .await
            .map(Some)
            .map_err(delete_by_id_error)
    }

    /// Clear this NSG from every subnet that still references it
    async fn disconnect_security_group(&self, nsg_id: &str) -> Result<()> {
        let parsed = ResourceId::parse(nsg_id)?;
        let nsg = self
            .clouds
            .security_groups
            .get(&parsed.resource_group, &parsed.name)
            .await?;

        for subnet_ref in &nsg.subnets {
            let mut subnet = self.clouds.subnets.get(&subnet_ref.id).await.map_err(|e| {
                warn!(subnet = %subnet_ref.id, error = %e, "failed to get subnet");
                invalid_linked_vnet(format!("Failed to get subnet '{}'.", subnet_ref.id))
            })?;

            let attached = subnet
                .network_security_group
                .as_ref()
                .is_some_and(|attached| ids_equal(&attached.id, &nsg.id));
            if !attached {
                continue;
            }

            subnet.network_security_group = None;
            info!(subnet = %subnet.id, "disconnecting network security group from subnet");
            self.clouds
                .subnets
                .create_or_update(&subnet.id, &subnet)
                .await
                .map_err(|e| {
                    warn!(subnet = %subnet_ref.id, error = %e, "failed to update subnet");
                    invalid_linked_vnet(format!("Failed to update subnet '{}'.", subnet_ref.id))
                })?;
        }

        Ok(())
    }

    async fn delete_private_dns_vnet_links(&self, zone_id: &str) -> Result<()> {
        let parsed = ResourceId::parse(zone_id)?;
        let links = self
            .clouds
            .virtual_network_links
            .list(&parsed.resource_group, &parsed.name)
            .await?;

        for link in links {
            self.clouds
                .virtual_network_links
                .delete_and_wait(&parsed.resource_group, &parsed.name, &link.name)
                .await?;
        }
        Ok(())
    }

    /// Re-put a NIC stuck in a failed provisioning state so it can be deleted
    async fn reconcile_failed_nic(&self, name: &str) -> Result<()> {
        let resource_group = self.resource_group();
        let nic = match self.clouds.interfaces.get(&resource_group, name).await {
            Ok(nic) => nic,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        if nic.provisioning_state == ProvisioningState::Failed {
            info!(nic = %nic.id, "NIC is in a failed provisioning state, reconciling before deletion");
            self.clouds
                .interfaces
                .create_or_update_and_wait(&resource_group, &nic.name, &nic)
                .await?;
        }
        Ok(())
    }
}

fn invalid_linked_vnet(message: String) -> Error {
    Error::user(400, CLOUD_ERROR_CODE_INVALID_LINKED_VNET, "", message)
}
