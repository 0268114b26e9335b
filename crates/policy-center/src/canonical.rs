use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use policyd_core_types::{AccessorKind, DepartmentId, IpFamily, UserId};
use tracing::{debug, warn};

use crate::errors::PolicyError;
use crate::model::{
    AccessorNetworkRelation, ClientRestrictionPolicy, DepartmentPath, NetworkDefinition,
    NetworkInfo, PolicyDocument, SignInPolicy,
};
use crate::network::parse_ranges;

/// Durable source of policy truth.
#[async_trait]
pub trait CanonicalPolicySource: Send + Sync {
    async fn network_restriction_enabled(&self) -> Result<bool, PolicyError>;
    async fn no_network_policy_accessor_enabled(&self) -> Result<bool, PolicyError>;
    async fn list_networks(&self) -> Result<Vec<NetworkDefinition>, PolicyError>;
    async fn list_accessor_network_relations(
        &self,
    ) -> Result<Vec<AccessorNetworkRelation>, PolicyError>;
    async fn client_restriction_policy(
        &self,
    ) -> Result<Option<ClientRestrictionPolicy>, PolicyError>;
}

/// User and department directory.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Every department chain from the user's departments up to the root.
    async fn get_department_ancestors(
        &self,
        user: &UserId,
    ) -> Result<Vec<DepartmentPath>, PolicyError>;

    /// Users whose ancestry contains `department`, directly or through a sub-department.
    async fn list_department_members(
        &self,
        department: &DepartmentId,
    ) -> Result<Vec<UserId>, PolicyError>;

    /// One chain per department below `department`, running from that department
    /// up to and including `department`.
    async fn list_sub_departments(
        &self,
        department: &DepartmentId,
    ) -> Result<Vec<DepartmentPath>, PolicyError>;
}

/// Reads canonical policy state and assembles it into a [`PolicyDocument`].
#[derive(Clone)]
pub struct CanonicalPolicyReader {
    source: Arc<dyn CanonicalPolicySource>,
    directory: Arc<dyn DirectoryService>,
    timeout: Duration,
}

impl CanonicalPolicyReader {
    pub fn new(
        source: Arc<dyn CanonicalPolicySource>,
        directory: Arc<dyn DirectoryService>,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            directory,
            timeout,
        }
    }

    async fn call<T, F>(&self, op: &str, fut: F) -> Result<T, PolicyError>
    where
        F: Future<Output = Result<T, PolicyError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err @ PolicyError::CanonicalSource { .. })) => Err(err),
            Ok(Err(err)) => Err(PolicyError::canonical(op, err)),
            Err(_) => Err(PolicyError::canonical(
                op,
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }

    /// Computes the canonical document without touching any store.
    pub async fn read_document(&self) -> Result<PolicyDocument, PolicyError> {
        let enabled = self
            .call(
                "network_restriction_enabled",
                self.source.network_restriction_enabled(),
            )
            .await?;

        let network_info = if enabled {
            self.read_network_info().await?
        } else {
            NetworkInfo::default()
        };

        let client_policy = self
            .call(
                "client_restriction_policy",
                self.source.client_restriction_policy(),
            )
            .await?;
        let (sign_in_policy, unknown) = SignInPolicy::project(client_policy.as_ref());
        if !unknown.is_empty() {
            warn!(?unknown, "ignoring unknown client kinds in client restriction policy");
        }

        Ok(PolicyDocument {
            network_info,
            sign_in_policy,
        })
    }

    async fn read_network_info(&self) -> Result<NetworkInfo, PolicyError> {
        let mut info = NetworkInfo {
            is_enabled: true,
            no_policy_accessor_enabled: self
                .call(
                    "no_network_policy_accessor_enabled",
                    self.source.no_network_policy_accessor_enabled(),
                )
                .await?,
            ipv4: None,
            ipv6: None,
        };
        for family in IpFamily::ALL {
            info.family_mut(family);
        }

        let networks = self
            .call("list_networks", self.source.list_networks())
            .await?;
        for network in networks {
            parse_ranges(network.family, &network.ranges)
                .map_err(|err| PolicyError::canonical("list_networks", err))?;
            let mut ranges = network.ranges.clone();
            ranges.sort();
            ranges.dedup();
            info.family_mut(network.family)
                .networks
                .insert(network.id.0, ranges);
        }

        let relations = self
            .call(
                "list_accessor_network_relations",
                self.source.list_accessor_network_relations(),
            )
            .await?;
        let mut seen = HashSet::new();
        let mut department_relations = Vec::new();
        for relation in relations {
            if !seen.insert((relation.accessor.clone(), relation.family)) {
                return Err(PolicyError::canonical(
                    "list_accessor_network_relations",
                    format!(
                        "{} has more than one {} relation",
                        relation.accessor, relation.family
                    ),
                ));
            }
            let family = info.family_mut(relation.family);
            if !family.networks.contains_key(relation.network_id.as_str()) {
                warn!(
                    accessor = %relation.accessor,
                    network = %relation.network_id,
                    "relation references an unknown network; it will never match"
                );
            }
            match relation.accessor.kind {
                AccessorKind::User => {
                    family
                        .users
                        .entry(relation.accessor.id.clone())
                        .or_default()
                        .network = Some(relation.network_id.0.clone());
                }
                AccessorKind::Department => {
                    family
                        .departments
                        .insert(relation.accessor.id.clone(), relation.network_id.0.clone());
                    department_relations
                        .push((relation.family, DepartmentId::new(relation.accessor.id)));
                }
            }
        }

        let mut members: HashMap<DepartmentId, Vec<UserId>> = HashMap::new();
        let mut sub_departments: HashMap<DepartmentId, Vec<DepartmentPath>> = HashMap::new();
        for (family, department) in &department_relations {
            if !members.contains_key(department) {
                let listed = self
                    .call(
                        "list_department_members",
                        self.directory.list_department_members(department),
                    )
                    .await?;
                members.insert(department.clone(), listed);
            }
            if !sub_departments.contains_key(department) {
                let chains = self
                    .call(
                        "list_sub_departments",
                        self.directory.list_sub_departments(department),
                    )
                    .await?;
                sub_departments.insert(department.clone(), chains);
            }
            let family_policy = info.family_mut(*family);
            for user in members.get(department).into_iter().flatten() {
                family_policy
                    .users
                    .entry(user.0.clone())
                    .or_default()
                    .departments
                    .push(department.0.clone());
            }
        }
        for family in IpFamily::ALL {
            let family_policy = info.family_mut(family);
            for entry in family_policy.users.values_mut() {
                entry.departments.sort();
                entry.departments.dedup();
            }
            family_policy.inherited =
                inherited_networks(&family_policy.departments, sub_departments.values().flatten());
        }
        debug!(
            departments = members.len(),
            "expanded department relations to users"
        );
        Ok(info)
    }

    /// Every department id in `paths` plus the ancestors the directory reports.
    pub async fn department_closure(
        &self,
        user: &UserId,
        paths: &[DepartmentPath],
    ) -> Result<BTreeSet<String>, PolicyError> {
        let mut closure: BTreeSet<String> = paths
            .iter()
            .flatten()
            .map(|department| department.0.clone())
            .collect();
        let ancestors = self
            .call(
                "get_department_ancestors",
                self.directory.get_department_ancestors(user),
            )
            .await?;
        closure.extend(ancestors.into_iter().flatten().map(|department| department.0));
        Ok(closure)
    }
}

/// Maps every department without a relation of its own to the network of its
/// nearest related ancestor. Ties between chains go to the smaller network id.
fn inherited_networks<'a>(
    related: &BTreeMap<String, String>,
    chains: impl IntoIterator<Item = &'a DepartmentPath>,
) -> BTreeMap<String, String> {
    let mut nearest: BTreeMap<String, (usize, String)> = BTreeMap::new();
    for chain in chains {
        for (idx, department) in chain.iter().enumerate() {
            if related.contains_key(department.as_str()) {
                continue;
            }
            let found = chain[idx + 1..]
                .iter()
                .enumerate()
                .find_map(|(step, ancestor)| {
                    related
                        .get(ancestor.as_str())
                        .map(|network| (step + 1, network.clone()))
                });
            let Some(candidate) = found else {
                continue;
            };
            match nearest.get(department.as_str()) {
                Some(current) if *current <= candidate => {}
                _ => {
                    nearest.insert(department.0.clone(), candidate);
                }
            }
        }
    }
    nearest
        .into_iter()
        .map(|(department, (_, network))| (department, network))
        .collect()
}
