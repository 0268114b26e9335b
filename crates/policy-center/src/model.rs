use std::collections::BTreeMap;

use policyd_core_types::{Accessor, ClientKind, DepartmentId, IpFamily, NetworkId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PolicyError;

pub const NETWORK_INFO: &str = "network_info";
pub const SIGN_IN_POLICY: &str = "sign_in_policy";
pub const CLIENT_RESTRICTION: &str = "client_restriction";
pub const IS_ENABLED: &str = "is_enabled";
pub const NO_POLICY_ACCESSOR_ENABLED: &str = "no_policy_accessor_enabled";
pub const NETWORKS: &str = "networks";
pub const DEPARTMENTS: &str = "departments";
pub const USERS: &str = "users";
pub const INHERITED: &str = "inherited";
pub const USER_NETWORK: &str = "network";

/// Ordered chain of department ids from a user's department up to the root.
pub type DepartmentPath = Vec<DepartmentId>;

/// Named set of address ranges for one IP family.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkDefinition {
    pub id: NetworkId,
    pub family: IpFamily,
    pub ranges: Vec<String>,
}

/// Persisted binding of an accessor to a network for one IP family.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessorNetworkRelation {
    pub accessor: Accessor,
    pub network_id: NetworkId,
    pub family: IpFamily,
}

/// Client restriction as stored by the administrative layer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClientRestrictionPolicy {
    pub allowed_clients: Vec<String>,
}

/// Typed view of the document held by the policy store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct PolicyDocument {
    pub network_info: NetworkInfo,
    pub sign_in_policy: SignInPolicy,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct NetworkInfo {
    pub is_enabled: bool,
    pub no_policy_accessor_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<FamilyPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<FamilyPolicy>,
}

impl NetworkInfo {
    pub fn family_mut(&mut self, family: IpFamily) -> &mut FamilyPolicy {
        let slot = match family {
            IpFamily::Ipv4 => &mut self.ipv4,
            IpFamily::Ipv6 => &mut self.ipv6,
        };
        slot.get_or_insert_with(FamilyPolicy::default)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct FamilyPolicy {
    #[serde(default)]
    pub networks: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub departments: BTreeMap<String, String>,
    #[serde(default)]
    pub users: BTreeMap<String, UserEntry>,
    /// Departments without a relation of their own, mapped to the network of
    /// their nearest related ancestor.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inherited: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UserEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub departments: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct SignInPolicy {
    pub client_restriction: BTreeMap<String, bool>,
}

impl SignInPolicy {
    /// Projects the stored policy onto every known client kind.
    /// A missing policy allows every kind.
    pub fn project(policy: Option<&ClientRestrictionPolicy>) -> (Self, Vec<String>) {
        let mut client_restriction = BTreeMap::new();
        let mut unknown = Vec::new();
        match policy {
            None => {
                for kind in ClientKind::ALL {
                    client_restriction.insert(kind.as_str().to_string(), true);
                }
            }
            Some(policy) => {
                for kind in ClientKind::ALL {
                    client_restriction.insert(kind.as_str().to_string(), false);
                }
                for raw in &policy.allowed_clients {
                    match raw.parse::<ClientKind>() {
                        Ok(kind) => {
                            client_restriction.insert(kind.as_str().to_string(), true);
                        }
                        Err(_) => unknown.push(raw.clone()),
                    }
                }
            }
        }
        (Self { client_restriction }, unknown)
    }
}

impl PolicyDocument {
    pub fn to_value(&self) -> Result<Value, PolicyError> {
        serde_json::to_value(self).map_err(|err| PolicyError::Invalid(err.to_string()))
    }
}

/// Sorts string arrays recursively so structurally equal documents compare equal.
pub fn normalize(value: &mut Value) {
    match value {
        Value::Array(items) => {
            for item in items.iter_mut() {
                normalize(item);
            }
            if items.iter().all(Value::is_string) {
                items.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
                items.dedup();
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                normalize(item);
            }
        }
        _ => {}
    }
}
