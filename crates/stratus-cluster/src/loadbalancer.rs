//! Pure edits of a load balancer's outbound NAT frontends

use stratus_common::resource_id::{ids_equal, last_token};
use stratus_common::{ResourceRef, OUTBOUND_RULE_V4};

use crate::models::{FrontendIpConfiguration, LoadBalancer, SubResource};

fn outbound_rule_v4(lb: &LoadBalancer) -> Option<&crate::models::OutboundRule> {
    lb.outbound_rules.iter().find(|r| r.name == OUTBOUND_RULE_V4)
}

/// Public IPs currently fronting `outbound-rule-v4`, in rule order
pub fn get_outbound_ips(lb: &LoadBalancer) -> Vec<ResourceRef> {
    let Some(rule) = outbound_rule_v4(lb) else {
        return Vec::new();
    };

    rule.frontend_ip_configurations
        .iter()
        .filter_map(|member| {
            lb.frontend_ip_configurations
                .iter()
                .find(|fip| ids_equal(&fip.id, &member.id))
        })
        .filter_map(|fip| fip.public_ip_address.as_ref())
        .map(|ip| ResourceRef::new(ip.id.clone()))
        .collect()
}

/// Detach every frontend from `outbound-rule-v4`
///
/// Frontends used only by the outbound rule are removed from the load
/// balancer. Frontends that load-balancing rules still reference stay.
pub fn remove_outbound_ips(lb: &mut LoadBalancer) {
    let Some(rule) = lb
        .outbound_rules
        .iter_mut()
        .find(|r| r.name == OUTBOUND_RULE_V4)
    else {
        return;
    };

    let members = std::mem::take(&mut rule.frontend_ip_configurations);
    let is_member = |fip: &FrontendIpConfiguration| members.iter().any(|m| ids_equal(&m.id, &fip.id));

    lb.frontend_ip_configurations
        .retain(|fip| !is_member(fip) || !fip.load_balancing_rules.is_empty());

    for fip in lb.frontend_ip_configurations.iter_mut() {
        fip.outbound_rules.retain(|r| last_token(&r.id) != OUTBOUND_RULE_V4);
    }
}

/// Attach `ips` to `outbound-rule-v4`
///
/// A frontend that already fronts an IP is reused; otherwise a new frontend
/// named after the IP is appended.
pub fn add_outbound_ips(resource_group_id: &str, lb: &mut LoadBalancer, ips: &[ResourceRef]) {
    let mut members = Vec::with_capacity(ips.len());

    for ip in ips {
        let existing = lb.frontend_ip_configurations.iter().find(|fip| {
            fip.public_ip_address
                .as_ref()
                .is_some_and(|p| ids_equal(&p.id, &ip.id))
        });

        let fip_id = match existing {
            Some(fip) => fip.id.clone(),
            None => {
                let name = last_token(&ip.id).to_string();
                let id = format!(
                    "{}/providers/Microsoft.Network/loadBalancers/{}/frontendIPConfigurations/{}",
                    resource_group_id, lb.name, name
                );
                lb.frontend_ip_configurations.push(FrontendIpConfiguration {
                    id: id.clone(),
                    name,
                    public_ip_address: Some(SubResource::new(ip.id.clone())),
                    ..Default::default()
                });
                id
            }
        };
        members.push(SubResource::new(fip_id));
    }

    if let Some(rule) = lb
        .outbound_rules
        .iter_mut()
        .find(|r| r.name == OUTBOUND_RULE_V4)
    {
        rule.frontend_ip_configurations = members;
    }
}
