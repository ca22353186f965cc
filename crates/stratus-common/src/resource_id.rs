//! Cloud resource ID helpers
//!
//! IDs look like
//! `/subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}[/{subtype}/{subname}...]`
//! and compare case-insensitively.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Reference to a cloud resource by ID
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Full resource ID
    pub id: String,
}

impl ResourceRef {
    /// Create a reference
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Parsed resource ID
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceId {
    /// Subscription ID
    pub subscription: String,
    /// Resource group name
    pub resource_group: String,
    /// Provider namespace, e.g. `Microsoft.Network`
    pub provider: String,
    /// Resource type including nested types, e.g. `virtualNetworks/subnets`
    pub resource_type: String,
    /// Name of the innermost resource
    pub name: String,
}

impl ResourceId {
    /// Parse a resource ID
    pub fn parse(id: &str) -> Result<Self> {
        let parts: Vec<&str> = id.trim_matches('/').split('/').collect();
        let invalid = || Error::validation(format!("invalid resource ID {:?}", id));

        if parts.len() < 8
            || !parts[0].eq_ignore_ascii_case("subscriptions")
            || !parts[2].eq_ignore_ascii_case("resourceGroups")
            || !parts[4].eq_ignore_ascii_case("providers")
            || parts.len() % 2 != 0
        {
            return Err(invalid());
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }

        let types: Vec<&str> = parts[6..].iter().step_by(2).copied().collect();

        Ok(Self {
            subscription: parts[1].to_string(),
            resource_group: parts[3].to_string(),
            provider: parts[5].to_string(),
            resource_type: types.join("/"),
            name: parts[parts.len() - 1].to_string(),
        })
    }

    /// Fully-qualified type, e.g. `Microsoft.Network/networkSecurityGroups`
    pub fn full_type(&self) -> String {
        format!("{}/{}", self.provider, self.resource_type)
    }
}

/// Resource group ID for a subscription and group name
pub fn resource_group_id(subscription: &str, resource_group: &str) -> String {
    format!("/subscriptions/{}/resourceGroups/{}", subscription, resource_group)
}

/// Last path segment of an ID, which is the resource name
pub fn last_token(id: &str) -> &str {
    id.trim_end_matches('/').rsplit('/').next().unwrap_or(id)
}

/// Case-insensitive ID comparison
pub fn ids_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Unordered, case-insensitive equality of two reference lists
pub fn refs_equal(a: &[ResourceRef], b: &[ResourceRef]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut left: Vec<String> = a.iter().map(|r| r.id.to_lowercase()).collect();
    let mut right: Vec<String> = b.iter().map(|r| r.id.to_lowercase()).collect();
    left.sort();
    right.sort();
    left == right
}

/// True if `id` lives inside the resource group `rg_id`
pub fn is_in_resource_group(id: &str, rg_id: &str) -> bool {
    let prefix = format!("{}/", rg_id.trim_end_matches('/').to_lowercase());
    id.to_lowercase().starts_with(&prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBNET: &str = "/subscriptions/sub/resourceGroups/vnet-rg/providers/Microsoft.Network/virtualNetworks/vnet/subnets/master";

    #[test]
    fn parses_nested_ids() {
        let id = ResourceId::parse(SUBNET).unwrap();
        assert_eq!(id.subscription, "sub");
        assert_eq!(id.resource_group, "vnet-rg");
        assert_eq!(id.provider, "Microsoft.Network");
        assert_eq!(id.resource_type, "virtualNetworks/subnets");
        assert_eq!(id.name, "master");
        assert_eq!(id.full_type(), "Microsoft.Network/virtualNetworks/subnets");
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(ResourceId::parse("").is_err());
        assert!(ResourceId::parse("/subscriptions/sub/resourceGroups/rg").is_err());
        assert!(ResourceId::parse("/subscriptions/sub/groups/rg/providers/A/b/c").is_err());
        assert!(ResourceId::parse("/subscriptions/sub/resourceGroups/rg/providers/A/b/c/d").is_err());
    }

    #[test]
    fn last_token_is_the_name() {
        assert_eq!(last_token(SUBNET), "master");
        assert_eq!(last_token("plain"), "plain");
    }

    #[test]
    fn reference_sets_compare_unordered_and_case_insensitively() {
        let a = vec![ResourceRef::new("/X/ip1"), ResourceRef::new("/x/IP2")];
        let b = vec![ResourceRef::new("/x/ip2"), ResourceRef::new("/x/ip1")];
        assert!(refs_equal(&a, &b));
        assert!(!refs_equal(&a, &b[..1]));
        assert!(!refs_equal(&a, &[ResourceRef::new("/x/ip1"), ResourceRef::new("/x/ip3")]));
    }

    #[test]
    fn resource_group_membership() {
        let rg = resource_group_id("sub", "cluster-rg");
        assert!(is_in_resource_group(
            "/subscriptions/sub/resourcegroups/CLUSTER-RG/providers/Microsoft.Network/publicIPAddresses/ip",
            &rg
        ));
        assert!(!is_in_resource_group(
            "/subscriptions/sub/resourceGroups/cluster-rg2/providers/Microsoft.Network/publicIPAddresses/ip",
            &rg
        ));
    }
}
