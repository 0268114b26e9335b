//! In-memory canonical source and directory for tests and embedding hosts.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use policyd_core_types::{Accessor, DepartmentId, IpFamily, NetworkId, UserId};

use crate::canonical::{CanonicalPolicySource, DirectoryService};
use crate::errors::PolicyError;
use crate::model::{
    AccessorNetworkRelation, ClientRestrictionPolicy, DepartmentPath, NetworkDefinition,
};

#[derive(Clone, Debug, Default)]
pub struct CanonicalState {
    pub network_restriction_enabled: bool,
    pub no_policy_accessor_enabled: bool,
    pub networks: Vec<NetworkDefinition>,
    pub relations: Vec<AccessorNetworkRelation>,
    pub client_restriction: Option<ClientRestrictionPolicy>,
}

#[derive(Default)]
pub struct InMemoryCanonicalSource {
    state: RwLock<CanonicalState>,
    unavailable: RwLock<Option<String>>,
}

impl InMemoryCanonicalSource {
    pub fn new(state: CanonicalState) -> Self {
        Self {
            state: RwLock::new(state),
            unavailable: RwLock::new(None),
        }
    }

    pub fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut CanonicalState),
    {
        let mut guard = self.state.write();
        mutate(&mut *guard);
    }

    pub fn state(&self) -> CanonicalState {
        self.state.read().clone()
    }

    /// Makes every read fail with `reason` until cleared with `None`.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        *self.unavailable.write() = reason.map(str::to_string);
    }

    pub fn add_network(&self, id: &str, family: IpFamily, ranges: &[&str]) {
        self.update(|state| {
            state.networks.retain(|network| network.id.as_str() != id);
            state.networks.push(NetworkDefinition {
                id: NetworkId::new(id),
                family,
                ranges: ranges.iter().map(|range| range.to_string()).collect(),
            });
        });
    }

    /// Binds `accessor` to `network`, replacing any previous relation for the family.
    pub fn relate(&self, accessor: Accessor, network: &str, family: IpFamily) {
        self.update(|state| {
            state
                .relations
                .retain(|relation| !(relation.accessor == accessor && relation.family == family));
            state.relations.push(AccessorNetworkRelation {
                accessor,
                network_id: NetworkId::new(network),
                family,
            });
        });
    }

    pub fn unrelate(&self, accessor: &Accessor, family: IpFamily) {
        self.update(|state| {
            state
                .relations
                .retain(|relation| !(&relation.accessor == accessor && relation.family == family));
        });
    }

    fn check(&self, op: &str) -> Result<(), PolicyError> {
        match self.unavailable.read().as_ref() {
            Some(reason) => Err(PolicyError::canonical(op, reason)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CanonicalPolicySource for InMemoryCanonicalSource {
    async fn network_restriction_enabled(&self) -> Result<bool, PolicyError> {
        self.check("network_restriction_enabled")?;
        Ok(self.state.read().network_restriction_enabled)
    }

    async fn no_network_policy_accessor_enabled(&self) -> Result<bool, PolicyError> {
        self.check("no_network_policy_accessor_enabled")?;
        Ok(self.state.read().no_policy_accessor_enabled)
    }

    async fn list_networks(&self) -> Result<Vec<NetworkDefinition>, PolicyError> {
        self.check("list_networks")?;
        Ok(self.state.read().networks.clone())
    }

    async fn list_accessor_network_relations(
        &self,
    ) -> Result<Vec<AccessorNetworkRelation>, PolicyError> {
        self.check("list_accessor_network_relations")?;
        Ok(self.state.read().relations.clone())
    }

    async fn client_restriction_policy(
        &self,
    ) -> Result<Option<ClientRestrictionPolicy>, PolicyError> {
        self.check("client_restriction_policy")?;
        Ok(self.state.read().client_restriction.clone())
    }
}

/// Directory holding each user's department paths (leaf first, root last).
/// The department tree is every path ever assigned or registered; moving users
/// never removes a department from it.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: RwLock<BTreeMap<UserId, Vec<DepartmentPath>>>,
    departments: RwLock<BTreeSet<DepartmentPath>>,
    unavailable: RwLock<bool>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_user_paths(&self, user: &str, paths: &[&[&str]]) {
        let paths = paths
            .iter()
            .map(|path| path.iter().map(|id| DepartmentId::new(*id)).collect())
            .collect();
        self.set_paths(UserId::new(user), paths);
    }

    pub fn set_paths(&self, user: UserId, paths: Vec<DepartmentPath>) {
        self.departments.write().extend(paths.iter().cloned());
        self.users.write().insert(user, paths);
    }

    /// Registers a department chain (leaf first) that may have no members.
    pub fn add_department(&self, path: &[&str]) {
        let path = path.iter().map(|id| DepartmentId::new(*id)).collect();
        self.departments.write().insert(path);
    }

    pub fn paths_of(&self, user: &UserId) -> Vec<DepartmentPath> {
        self.users.read().get(user).cloned().unwrap_or_default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write() = unavailable;
    }

    fn check(&self, op: &str) -> Result<(), PolicyError> {
        if *self.unavailable.read() {
            return Err(PolicyError::canonical(op, "directory unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryService for InMemoryDirectory {
    async fn get_department_ancestors(
        &self,
        user: &UserId,
    ) -> Result<Vec<DepartmentPath>, PolicyError> {
        self.check("get_department_ancestors")?;
        Ok(self.paths_of(user))
    }

    async fn list_department_members(
        &self,
        department: &DepartmentId,
    ) -> Result<Vec<UserId>, PolicyError> {
        self.check("list_department_members")?;
        let users = self.users.read();
        Ok(users
            .iter()
            .filter(|(_, paths)| paths.iter().flatten().any(|id| id == department))
            .map(|(user, _)| user.clone())
            .collect())
    }

    async fn list_sub_departments(
        &self,
        department: &DepartmentId,
    ) -> Result<Vec<DepartmentPath>, PolicyError> {
        self.check("list_sub_departments")?;
        let departments = self.departments.read();
        let chains: BTreeSet<DepartmentPath> = departments
            .iter()
            .flat_map(|path| {
                let Some(pos) = path.iter().position(|id| id == department) else {
                    return Vec::new();
                };
                // every prefix ending at `department` names one sub-department chain
                (0..pos)
                    .map(|start| path[start..=pos].to_vec())
                    .collect::<Vec<DepartmentPath>>()
            })
            .collect();
        Ok(chains.into_iter().collect())
    }
}
