//! Wire models for the cloud resources the orchestrator touches
//!
//! Only the fields the orchestrator reads or writes are modelled. Every
//! struct round-trips through the resource APIs as camelCase JSON.

use serde::{Deserialize, Serialize};

/// Reference to another resource by ID
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubResource {
    /// Full resource ID
    pub id: String,
}

impl SubResource {
    /// Create a reference
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// A load balancer
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoadBalancer {
    pub id: String,
    pub name: String,
    pub location: String,
    pub frontend_ip_configurations: Vec<FrontendIpConfiguration>,
    pub load_balancing_rules: Vec<LoadBalancingRule>,
    pub outbound_rules: Vec<OutboundRule>,
    pub probes: Vec<Probe>,
}

/// Frontend IP configuration of a load balancer
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FrontendIpConfiguration {
    pub id: String,
    pub name: String,
    /// Public IP fronted by this configuration (public LBs)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip_address: Option<SubResource>,
    /// Static private IP (internal LBs)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_ip_allocation_method: Option<IpAllocationMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet: Option<SubResource>,
    /// Load-balancing rules that reference this configuration
    pub load_balancing_rules: Vec<SubResource>,
    /// Outbound rules that reference this configuration
    pub outbound_rules: Vec<SubResource>,
    pub zones: Vec<String>,
}

/// How a frontend's private IP is assigned
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpAllocationMethod {
    Static,
    Dynamic,
}

/// Inbound load-balancing rule
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoadBalancingRule {
    pub name: String,
    pub frontend_ip_configuration: Option<SubResource>,
    pub backend_address_pool: Option<SubResource>,
    pub probe: Option<SubResource>,
    pub protocol: String,
    pub load_distribution: String,
    pub frontend_port: u16,
    pub backend_port: u16,
    pub idle_timeout_in_minutes: u32,
    pub disable_outbound_snat: bool,
}

/// Outbound NAT rule
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutboundRule {
    pub name: String,
    pub frontend_ip_configurations: Vec<SubResource>,
    pub backend_address_pool: Option<SubResource>,
}

/// Health probe
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Probe {
    pub id: String,
    pub name: String,
}

/// A public IP address
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PublicIpAddress {
    pub id: String,
    pub name: String,
    pub location: String,
    pub sku: String,
    pub allocation_method: String,
    pub ip_version: String,
}

impl PublicIpAddress {
    /// A standard-SKU static IPv4 address
    pub fn standard_static_v4(
        id: impl Into<String>,
        name: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location: location.into(),
            sku: "Standard".to_string(),
            allocation_method: "Static".to_string(),
            ip_version: "IPv4".to_string(),
        }
    }
}

/// A network security group
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    /// Subnets that reference this group; only IDs are populated
    pub subnets: Vec<SubResource>,
}

/// A virtual network subnet
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Subnet {
    pub id: String,
    pub name: String,
    pub address_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_security_group: Option<SubResource>,
}

/// A private DNS zone's link to a virtual network
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VirtualNetworkLink {
    pub id: String,
    pub name: String,
}

/// Provisioning state reported by network resources
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    #[default]
    Succeeded,
    Updating,
    Deleting,
    Failed,
}

/// A network interface
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkInterface {
    pub id: String,
    pub name: String,
    pub provisioning_state: ProvisioningState,
}

/// A compute SKU offered in a region
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceSku {
    pub name: String,
    pub resource_type: String,
    pub location_info: Vec<SkuLocationInfo>,
    pub restrictions: Vec<SkuRestriction>,
}

/// Zones a SKU is offered in for one location
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SkuLocationInfo {
    pub location: String,
    pub zones: Vec<String>,
}

/// A restriction on where a SKU may be used
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SkuRestriction {
    /// "Location" or "Zone"
    pub restriction_type: String,
    pub locations: Vec<String>,
    pub zones: Vec<String>,
}

/// A virtual machine
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VirtualMachine {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_view: Option<InstanceView>,
}

/// Runtime state of a virtual machine
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InstanceView {
    pub statuses: Vec<InstanceViewStatus>,
}

/// One status entry, e.g. `PowerState/running`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InstanceViewStatus {
    pub code: String,
}

/// Any resource, as returned by resource-group listing
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GenericResource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
}

/// A resource group
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceGroup {
    pub id: String,
    pub name: String,
    pub location: String,
    /// ID of the resource that owns this group, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_by: Option<String>,
}
