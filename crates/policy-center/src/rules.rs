//! Contract with the rule-evaluation engine plus a native engine that
//! implements the two admission programs directly against the policy store.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use policyd_core_types::{Accessor, AccessorKind, IpFamily};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PolicyError;
use crate::model::{
    CLIENT_RESTRICTION, DEPARTMENTS, INHERITED, IS_ENABLED, NETWORKS, NETWORK_INFO,
    NO_POLICY_ACCESSOR_ENABLED, SIGN_IN_POLICY, USERS, USER_NETWORK,
};
use crate::network::AddressRange;
use crate::store::{PolicyStore, StorePath, TxnMode};

/// Values produced by one evaluation; empty means the query was undefined.
pub type ResultSet = Vec<Value>;

/// Identifies a query program understood by a [`RuleEngine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Program {
    pub name: &'static str,
    pub query: &'static str,
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Client kind → allowed map; takes no input.
pub const CLIENT_ADMISSION: Program = Program {
    name: "client_admission",
    query: "data.sign_in_policy.client_restriction",
};

/// Accessor + source address → allowed.
pub const NETWORK_ADMISSION: Program = Program {
    name: "network_admission",
    query: "data.network_info.allow",
};

/// Input document of [`NETWORK_ADMISSION`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkInput {
    pub accessor: Accessor,
    pub address: IpAddr,
}

/// A program compiled against one store instance.
pub trait PreparedQuery: Send + Sync {
    fn program(&self) -> Program;
    fn eval(&self, input: &Value) -> Result<ResultSet, PolicyError>;
}

pub trait RuleEngine: Send + Sync {
    fn compile(
        &self,
        program: Program,
        store: Arc<PolicyStore>,
    ) -> Result<Arc<dyn PreparedQuery>, PolicyError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NativeRuleEngine;

impl RuleEngine for NativeRuleEngine {
    fn compile(
        &self,
        program: Program,
        store: Arc<PolicyStore>,
    ) -> Result<Arc<dyn PreparedQuery>, PolicyError> {
        if program == CLIENT_ADMISSION {
            Ok(Arc::new(ClientAdmissionQuery { store }))
        } else if program == NETWORK_ADMISSION {
            Ok(Arc::new(NetworkAdmissionQuery { store }))
        } else {
            Err(PolicyError::Evaluation(format!(
                "native engine cannot compile program '{program}'"
            )))
        }
    }
}

struct ClientAdmissionQuery {
    store: Arc<PolicyStore>,
}

impl PreparedQuery for ClientAdmissionQuery {
    fn program(&self) -> Program {
        CLIENT_ADMISSION
    }

    fn eval(&self, _input: &Value) -> Result<ResultSet, PolicyError> {
        let txn = self.store.begin(TxnMode::Read);
        let path = StorePath::from_segments([SIGN_IN_POLICY, CLIENT_RESTRICTION]);
        Ok(txn.get(&path).cloned().into_iter().collect())
    }
}

struct NetworkAdmissionQuery {
    store: Arc<PolicyStore>,
}

impl PreparedQuery for NetworkAdmissionQuery {
    fn program(&self) -> Program {
        NETWORK_ADMISSION
    }

    fn eval(&self, input: &Value) -> Result<ResultSet, PolicyError> {
        let input: NetworkInput = serde_json::from_value(input.clone()).map_err(|err| {
            PolicyError::Evaluation(format!("{NETWORK_ADMISSION} input rejected: {err}"))
        })?;
        let txn = self.store.begin(TxnMode::Read);
        let allowed = evaluate_network(txn.document(), &input.accessor, input.address)?;
        Ok(allowed.map(Value::Bool).into_iter().collect())
    }
}

/// `None` when the document has no usable `network_info`.
fn evaluate_network(
    doc: &Value,
    accessor: &Accessor,
    address: IpAddr,
) -> Result<Option<bool>, PolicyError> {
    let Some(info) = doc.get(NETWORK_INFO) else {
        return Ok(None);
    };
    let Some(enabled) = info.get(IS_ENABLED).and_then(Value::as_bool) else {
        return Ok(None);
    };
    if !enabled {
        return Ok(Some(true));
    }

    let family = IpFamily::of(&address);
    let family_doc = info.get(family.as_str());
    let candidates = candidate_networks(family_doc, accessor);
    if candidates.is_empty() {
        let no_policy_allowed = info
            .get(NO_POLICY_ACCESSOR_ENABLED)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        return Ok(Some(no_policy_allowed));
    }

    let networks = family_doc.and_then(|doc| doc.get(NETWORKS));
    for network in candidates {
        let Some(ranges) = networks.and_then(|all| all.get(network)) else {
            continue;
        };
        let ranges = ranges.as_array().ok_or_else(|| {
            PolicyError::Evaluation(format!("ranges of network '{network}' are not a list"))
        })?;
        for raw in ranges {
            let raw = raw.as_str().ok_or_else(|| {
                PolicyError::Evaluation(format!("network '{network}' holds a non-string range"))
            })?;
            let range: AddressRange = raw
                .parse()
                .map_err(|err: PolicyError| PolicyError::Evaluation(err.to_string()))?;
            if range.contains(&address) {
                return Ok(Some(true));
            }
        }
    }
    Ok(Some(false))
}

fn candidate_networks<'a>(family_doc: Option<&'a Value>, accessor: &Accessor) -> Vec<&'a str> {
    let Some(family_doc) = family_doc else {
        return Vec::new();
    };
    let lookup = move |table: &str, id: &str| {
        family_doc
            .get(table)
            .and_then(|entries| entries.get(id))
            .and_then(Value::as_str)
    };
    let department_network = move |id: &str| lookup(DEPARTMENTS, id);

    match accessor.kind {
        AccessorKind::Department => {
            let id = accessor.id.as_str();
            department_network(id)
                .or_else(|| lookup(INHERITED, id))
                .into_iter()
                .collect()
        }
        AccessorKind::User => {
            let Some(entry) = family_doc.get(USERS).and_then(|users| users.get(&accessor.id))
            else {
                return Vec::new();
            };
            let direct = entry.get(USER_NETWORK).and_then(Value::as_str);
            let inherited = entry
                .get(DEPARTMENTS)
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .filter_map(department_network);
            direct.into_iter().chain(inherited).collect()
        }
    }
}
