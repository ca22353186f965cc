//! Outbound IP reconciliation for the public load balancer
//!
//! Converges the frontends of `outbound-rule-v4` to the managed outbound IP
//! count on the document. The persisted effective IP set is only written
//! after the load balancer update is confirmed, so after a crash it matches
//! either the old or the new state of the rule.

use std::collections::BTreeMap;

use futures::future::{join_all, try_join_all};
use tracing::{debug, info, instrument, warn};

use stratus_common::document::{ArchitectureVersion, OutboundType};
use stratus_common::resource_id::{is_in_resource_group, last_token, refs_equal};
use stratus_common::retry::{retry_with_backoff, RetryConfig};
use stratus_common::{
    default_outbound_ip_name, Error, ResourceRef, Result, MANAGED_OUTBOUND_IP_SUFFIX,
};

use crate::loadbalancer::{add_outbound_ips, get_outbound_ips, remove_outbound_ips};
use crate::manager::Manager;
use crate::models::{LoadBalancer, PublicIpAddress};

/// Attempts per unused IP deletion; a just-released IP can still be busy
const IP_DELETE_ATTEMPTS: u32 = 3;

impl Manager {
    /// Reconcile the public load balancer's managed outbound IPs
    ///
    /// Only clusters with load-balancer egress on the V2 layout have a
    /// reconcilable outbound rule; everything else is a no-op. Unused managed
    /// IPs are cleaned up afterwards whether or not reconciliation succeeded.
    #[instrument(skip(self))]
    pub async fn reconcile_load_balancer_profile(&self) -> Result<()> {
        let doc = self.doc();
        if doc.properties.network_profile.outbound_type != OutboundType::Loadbalancer
            || doc.properties.architecture_version != ArchitectureVersion::V2
        {
            return Ok(());
        }

        let lb = self
            .clouds
            .load_balancers
            .get(&self.resource_group(), &doc.properties.infra_id)
            .await?;

        let result = self.reconcile_outbound_rule_v4_ips(lb).await;
        self.delete_unused_managed_ips().await;
        result
    }

    async fn reconcile_outbound_rule_v4_ips(&self, mut lb: LoadBalancer) -> Result<()> {
        info!("reconciling outbound-rule-v4");

        let observed = get_outbound_ips(&lb);
        let effective = self
            .doc()
            .properties
            .network_profile
            .load_balancer
            .effective_outbound_ips;
        if effective.as_deref().map_or(true, |e| !refs_equal(e, &observed)) {
            self.patch_effective_outbound_ips(&observed).await?;
        }

        let Some(desired) = self.desired_outbound_ips().await? else {
            debug!("no managed outbound IP count set");
            return Ok(());
        };

        if refs_equal(&desired, &observed) {
            debug!(count = desired.len(), "outbound-rule-v4 already converged");
            return Ok(());
        }

        let doc = self.doc();
        remove_outbound_ips(&mut lb);
        add_outbound_ips(&doc.properties.cluster_profile.resource_group_id, &mut lb, &desired);

        info!(count = desired.len(), "updating outbound-rule-v4");
        self.clouds
            .load_balancers
            .create_or_update_and_wait(&self.resource_group(), &doc.properties.infra_id, &lb)
            .await?;

        self.patch_effective_outbound_ips(&desired).await
    }

    async fn patch_effective_outbound_ips(&self, ips: &[ResourceRef]) -> Result<()> {
        info!(count = ips.len(), "patching effective outbound IPs");
        self.patch(|doc| {
            doc.properties.network_profile.load_balancer.effective_outbound_ips = Some(ips.to_vec());
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Managed IPs the outbound rule should use, creating more if short
    async fn desired_outbound_ips(&self) -> Result<Option<Vec<ResourceRef>>> {
        let doc = self.doc();
        let Some(count) = doc.properties.network_profile.load_balancer.managed_outbound_ip_count
        else {
            return Ok(None);
        };

        let mut managed = self.cluster_managed_ips().await?;
        let missing = count.saturating_sub(managed.len());
        if missing > 0 {
            for ip in self.create_public_ips(missing).await? {
                managed.insert(ip.name.clone(), ip);
            }
        }

        Ok(Some(select_outbound_ips(count, managed, &doc.properties.infra_id)))
    }

    async fn create_public_ips(&self, count: usize) -> Result<Vec<PublicIpAddress>> {
        let doc = self.doc();
        let resource_group = self.resource_group();
        let resource_group = resource_group.as_str();

        let creations = (0..count).map(|_| {
            let name = format!("{}{}", self.names.generate(), MANAGED_OUTBOUND_IP_SUFFIX);
            let id = format!(
                "{}/providers/Microsoft.Network/publicIPAddresses/{}",
                doc.properties.cluster_profile.resource_group_id, name
            );
            let ip = PublicIpAddress::standard_static_v4(id, name, doc.location.clone());
            async move {
                info!(ip = %ip.name, "creating managed outbound IP");
                self.clouds
                    .public_ips
                    .create_or_update_and_wait(resource_group, &ip.name, &ip)
                    .await?;
                Ok::<_, Error>(ip)
            }
        });

        try_join_all(creations).await
    }

    /// Managed IPs in the cluster resource group, keyed by name
    async fn cluster_managed_ips(&self) -> Result<BTreeMap<String, PublicIpAddress>> {
        let default_name = default_outbound_ip_name(&self.doc().properties.infra_id);
        let ips = self.clouds.public_ips.list(&self.resource_group()).await?;

        Ok(ips
            .into_iter()
            .filter(|ip| ip.name == default_name || ip.name.contains(MANAGED_OUTBOUND_IP_SUFFIX))
            .map(|ip| (ip.name.clone(), ip))
            .collect())
    }

    /// Delete managed IPs the outbound rule no longer uses; errors are logged only
    async fn delete_unused_managed_ips(&self) {
        let unused = match self.managed_ips_to_delete().await {
            Ok(unused) => unused,
            Err(e) => {
                warn!(error = %e, "failed to determine unused managed outbound IPs");
                return;
            }
        };

        let resource_group = self.resource_group();
        let resource_group = resource_group.as_str();
        let policy = RetryConfig::with_max_attempts(IP_DELETE_ATTEMPTS);
        let deletions = unused.iter().map(|id| {
            let name = last_token(id);
            let policy = &policy;
            async move {
                info!(ip = %name, "deleting unused managed outbound IP");
                let result = retry_with_backoff(policy, "delete_unused_managed_ip", || {
                    self.clouds.public_ips.delete_and_wait(resource_group, name)
                })
                .await;
                (name, result)
            }
        });

        for (name, result) in join_all(deletions).await {
            if let Err(e) = result {
                warn!(ip = %name, error = %e, "deletion of unused managed outbound IP failed");
            }
        }
    }

    async fn managed_ips_to_delete(&self) -> Result<Vec<String>> {
        let doc = self.doc();
        let managed = self.cluster_managed_ips().await?;
        let lb = self
            .clouds
            .load_balancers
            .get(&self.resource_group(), &doc.properties.infra_id)
            .await?;
        let in_use = get_outbound_ips(&lb);

        let default_name = default_outbound_ip_name(&doc.properties.infra_id);
        let reserve_default = doc.api_server_is_public();

        Ok(managed
            .into_values()
            .filter(|ip| !(reserve_default && ip.name == default_name))
            .filter(|ip| !in_use.iter().any(|r| r.id.eq_ignore_ascii_case(&ip.id)))
            .filter(|ip| {
                is_in_resource_group(&ip.id, &doc.properties.cluster_profile.resource_group_id)
            })
            .map(|ip| ip.id)
            .collect())
    }
}

/// Pick `count` IPs, keeping the default outbound IP first when present
fn select_outbound_ips(
    count: usize,
    mut managed: BTreeMap<String, PublicIpAddress>,
    infra_id: &str,
) -> Vec<ResourceRef> {
    let mut desired = Vec::with_capacity(count);
    if let Some(default_ip) = managed.remove(&default_outbound_ip_name(infra_id)) {
        desired.push(ResourceRef::new(default_ip.id));
    }
    desired.extend(
        managed
            .into_values()
            .map(|ip| ResourceRef::new(ip.id))
            .take(count.saturating_sub(desired.len())),
    );
    desired.truncate(count);
    desired
}
