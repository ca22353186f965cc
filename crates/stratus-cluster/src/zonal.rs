//! Migration of the internal load balancer to a zone-redundant frontend

use tracing::{error, info, instrument, warn};

use stratus_common::document::ArchitectureVersion;
use stratus_common::Result;

use crate::manager::{internal_lb_name, Manager};
use crate::models::{
    FrontendIpConfiguration, IpAllocationMethod, LoadBalancer, LoadBalancingRule, Probe,
    ResourceSku, SubResource,
};

/// Frontend that serves api-int and the machine config server
pub const INTERNAL_LB_FRONTEND_NAME: &str = "internal-lb-ip-v4";
/// Internal API server rule
pub const API_INTERNAL_RULE: &str = "api-internal-v4";
/// Machine config server rule
pub const SINT_RULE: &str = "sint-v4";
const API_INTERNAL_PROBE: &str = "api-internal-probe";
const SINT_PROBE: &str = "sint-probe";
const API_PORT: u16 = 6443;
const SINT_PORT: u16 = 22623;

impl Manager {
    /// Replace the internal load balancer's API frontend with a zone-redundant one
    ///
    /// The frontend keeps the API server's internal IP, so the old frontend
    /// and the rules using it must be removed before the new one is added.
    /// Between the two load balancer updates api-int is unreachable.
    #[instrument(skip(self))]
    pub async fn migrate_internal_lb_zones(&self) -> Result<()> {
        let doc = self.doc();
        let resource_group = self.resource_group();
        let lb_name = internal_lb_name(&doc);

        let mut lb = self.clouds.load_balancers.get(&resource_group, &lb_name).await?;

        if lb
            .frontend_ip_configurations
            .iter()
            .any(|fip| fip.name == INTERNAL_LB_FRONTEND_NAME && !fip.zones.is_empty())
        {
            info!("internal load balancer frontend already zone-redundant");
            return Ok(());
        }

        let zones = match self.control_plane_zones().await {
            Ok(zones) => zones,
            Err(e) => {
                warn!(error = %e, "could not determine control plane SKU zones, skipping migration");
                return Ok(());
            }
        };
        if zones.is_empty() {
            info!(
                vm_size = %doc.properties.master_profile.vm_size,
                "non-zonal control plane SKU, not migrating"
            );
            return Ok(());
        }

        let persisted = zones.clone();
        self.patch(|doc| {
            doc.properties.zones = persisted.clone();
            doc.properties.network_profile.load_balancer.zones = persisted.clone();
            Ok(())
        })
        .await?;

        info!(zones = ?zones, "load balancer zonal migration: starting critical section");

        remove_api_frontend(&mut lb);
        if let Err(e) = self
            .clouds
            .load_balancers
            .create_or_update_and_wait(&resource_group, &lb_name, &lb)
            .await
        {
            error!(error = %e, "failure in critical section, api-int rules may now be missing");
            return Err(e);
        }

        let backend_pool = internal_backend_pool_id(
            &lb,
            &doc.properties.infra_id,
            doc.properties.architecture_version,
        );
        add_zonal_api_frontend(
            &mut lb,
            &zones,
            &doc.properties.api_server_profile.int_ip,
            &doc.properties.master_profile.subnet_id,
            &backend_pool,
        );
        if let Err(e) = self
            .clouds
            .load_balancers
            .create_or_update_and_wait(&resource_group, &lb_name, &lb)
            .await
        {
            error!(error = %e, "failure in critical section, api-int rules may now be missing");
            return Err(e);
        }

        info!("load balancer zonal migration: critical section complete");
        Ok(())
    }

    /// Zones the control plane VM size is offered in within the cluster's region
    async fn control_plane_zones(&self) -> Result<Vec<String>> {
        let doc = self.doc();
        let skus = self
            .clouds
            .resource_skus
            .list(&format!("location eq '{}'", doc.location))
            .await?;

        Ok(skus
            .iter()
            .find(|sku| {
                sku.resource_type.eq_ignore_ascii_case("virtualMachines")
                    && sku.name.eq_ignore_ascii_case(&doc.properties.master_profile.vm_size)
            })
            .map(|sku| sku_zones(sku, &doc.location))
            .unwrap_or_default())
    }
}

/// Unrestricted zones a SKU is offered in at `location`
pub fn sku_zones(sku: &ResourceSku, location: &str) -> Vec<String> {
    let restricted_here = sku.restrictions.iter().any(|r| {
        r.restriction_type == "Location" && r.locations.iter().any(|l| l.eq_ignore_ascii_case(location))
    });
    if restricted_here {
        return Vec::new();
    }

    let restricted_zones: Vec<&String> = sku
        .restrictions
        .iter()
        .filter(|r| {
            r.restriction_type == "Zone"
                && r.locations.iter().any(|l| l.eq_ignore_ascii_case(location))
        })
        .flat_map(|r| r.zones.iter())
        .collect();

    let mut zones: Vec<String> = sku
        .location_info
        .iter()
        .filter(|info| info.location.eq_ignore_ascii_case(location))
        .flat_map(|info| info.zones.iter())
        .filter(|z| !restricted_zones.contains(z))
        .cloned()
        .collect();
    zones.sort();
    zones.dedup();
    zones
}

fn internal_backend_pool_id(lb: &LoadBalancer, infra_id: &str, version: ArchitectureVersion) -> String {
    let pool = format!("{}/backendAddressPools/{}", lb.id, infra_id);
    match version {
        ArchitectureVersion::V1 => format!("{}-internal-controlplane-v4", pool),
        ArchitectureVersion::V2 => pool,
    }
}

/// Drop the api-int and sint rules and the non-zonal API frontend
fn remove_api_frontend(lb: &mut LoadBalancer) {
    lb.load_balancing_rules
        .retain(|rule| rule.name != API_INTERNAL_RULE && rule.name != SINT_RULE);
    lb.frontend_ip_configurations
        .retain(|fip| fip.name != INTERNAL_LB_FRONTEND_NAME);
}

/// Add the zone-redundant API frontend with its rules and probes
fn add_zonal_api_frontend(
    lb: &mut LoadBalancer,
    zones: &[String],
    int_ip: &str,
    subnet_id: &str,
    backend_pool_id: &str,
) {
    let frontend_id = format!("{}/frontendIPConfigurations/{}", lb.id, INTERNAL_LB_FRONTEND_NAME);
    lb.frontend_ip_configurations.push(FrontendIpConfiguration {
        id: frontend_id.clone(),
        name: INTERNAL_LB_FRONTEND_NAME.to_string(),
        private_ip_address: Some(int_ip.to_string()),
        private_ip_allocation_method: Some(IpAllocationMethod::Static),
        subnet: Some(SubResource::new(subnet_id)),
        zones: zones.to_vec(),
        ..Default::default()
    });

    for probe in [API_INTERNAL_PROBE, SINT_PROBE] {
        if !lb.probes.iter().any(|p| p.name == probe) {
            lb.probes.push(Probe {
                id: format!("{}/probes/{}", lb.id, probe),
                name: probe.to_string(),
            });
        }
    }

    let rule = |name: &str, probe: &str, port: u16, disable_outbound_snat: bool| LoadBalancingRule {
        name: name.to_string(),
        frontend_ip_configuration: Some(SubResource::new(frontend_id.clone())),
        backend_address_pool: Some(SubResource::new(backend_pool_id)),
        probe: Some(SubResource::new(format!("{}/probes/{}", lb.id, probe))),
        protocol: "Tcp".to_string(),
        load_distribution: "Default".to_string(),
        frontend_port: port,
        backend_port: port,
        idle_timeout_in_minutes: 30,
        disable_outbound_snat,
    };
    let rules = [
        rule(API_INTERNAL_RULE, API_INTERNAL_PROBE, API_PORT, true),
        rule(SINT_RULE, SINT_PROBE, SINT_PORT, false),
    ];
    lb.load_balancing_rules.extend(rules);
}
