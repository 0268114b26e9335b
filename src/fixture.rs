//! Canonical source and directory backed by a YAML (or JSON) policy file.
//!
//! The file is re-read on every call so edits show up on the next rebuild or
//! reconcile cycle without restarting the daemon.
//!
//! ```yaml
//! network_restriction_enabled: true
//! no_policy_accessor_enabled: false
//! networks:
//!   - { id: office, family: ipv4, ranges: ["10.0.0.0/8"] }
//! relations:
//!   - { accessor: { id: eng, type: department }, network_id: office, family: ipv4 }
//! client_restriction:
//!   allowed_clients: [ios, android]
//! users:
//!   alice: [[eng, root]]
//! departments:
//!   - [legal, root]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use policyd_core_types::{DepartmentId, UserId};
use policyd_policy_center::canonical::{CanonicalPolicySource, DirectoryService};
use policyd_policy_center::{
    AccessorNetworkRelation, ClientRestrictionPolicy, DepartmentPath, NetworkDefinition,
    PolicyError,
};
use serde::Deserialize;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyFixture {
    pub network_restriction_enabled: bool,
    pub no_policy_accessor_enabled: bool,
    pub networks: Vec<NetworkDefinition>,
    pub relations: Vec<AccessorNetworkRelation>,
    pub client_restriction: Option<ClientRestrictionPolicy>,
    pub users: BTreeMap<String, Vec<Vec<String>>>,
    /// Extra department chains (leaf first) for departments without members.
    pub departments: Vec<Vec<String>>,
}

impl PolicyFixture {
    fn paths_of(&self, user: &UserId) -> Vec<DepartmentPath> {
        self.users
            .get(user.as_str())
            .map(|paths| {
                paths
                    .iter()
                    .map(|path| path.iter().map(|id| DepartmentId::new(id.as_str())).collect())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn sub_department_chains(&self, department: &DepartmentId) -> Vec<DepartmentPath> {
        let chains: BTreeSet<DepartmentPath> = self
            .users
            .values()
            .flatten()
            .chain(&self.departments)
            .flat_map(|path| {
                let Some(pos) = path.iter().position(|id| id.as_str() == department.as_str())
                else {
                    return Vec::new();
                };
                (0..pos)
                    .map(|start| {
                        path[start..=pos]
                            .iter()
                            .map(|id| DepartmentId::new(id.as_str()))
                            .collect::<DepartmentPath>()
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        chains.into_iter().collect()
    }
}

#[derive(Clone, Debug)]
pub struct FileCanonicalSource {
    path: PathBuf,
}

impl FileCanonicalSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self, op: &str) -> Result<PolicyFixture, PolicyError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|err| PolicyError::canonical(op, format!("{}: {err}", self.path.display())))?;
        serde_yaml::from_str(&content)
            .map_err(|err| PolicyError::canonical(op, format!("{}: {err}", self.path.display())))
    }
}

#[async_trait]
impl CanonicalPolicySource for FileCanonicalSource {
    async fn network_restriction_enabled(&self) -> Result<bool, PolicyError> {
        Ok(self
            .load("network_restriction_enabled")
            .await?
            .network_restriction_enabled)
    }

    async fn no_network_policy_accessor_enabled(&self) -> Result<bool, PolicyError> {
        Ok(self
            .load("no_network_policy_accessor_enabled")
            .await?
            .no_policy_accessor_enabled)
    }

    async fn list_networks(&self) -> Result<Vec<NetworkDefinition>, PolicyError> {
        Ok(self.load("list_networks").await?.networks)
    }

    async fn list_accessor_network_relations(
        &self,
    ) -> Result<Vec<AccessorNetworkRelation>, PolicyError> {
        Ok(self.load("list_accessor_network_relations").await?.relations)
    }

    async fn client_restriction_policy(
        &self,
    ) -> Result<Option<ClientRestrictionPolicy>, PolicyError> {
        Ok(self.load("client_restriction_policy").await?.client_restriction)
    }
}

#[async_trait]
impl DirectoryService for FileCanonicalSource {
    async fn get_department_ancestors(
        &self,
        user: &UserId,
    ) -> Result<Vec<DepartmentPath>, PolicyError> {
        Ok(self.load("get_department_ancestors").await?.paths_of(user))
    }

    async fn list_department_members(
        &self,
        department: &DepartmentId,
    ) -> Result<Vec<UserId>, PolicyError> {
        let fixture = self.load("list_department_members").await?;
        Ok(fixture
            .users
            .iter()
            .filter(|(_, paths)| {
                paths
                    .iter()
                    .flatten()
                    .any(|id| id.as_str() == department.as_str())
            })
            .map(|(user, _)| UserId::new(user.as_str()))
            .collect())
    }

    async fn list_sub_departments(
        &self,
        department: &DepartmentId,
    ) -> Result<Vec<DepartmentPath>, PolicyError> {
        let fixture = self.load("list_sub_departments").await?;
        Ok(fixture.sub_department_chains(department))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
network_restriction_enabled: true
networks:
  - { id: office, family: ipv4, ranges: ["10.0.0.0/8"] }
relations:
  - { accessor: { id: eng, type: department }, network_id: office, family: ipv4 }
users:
  alice: [[backend, eng, root]]
  bob: [[sales, root]]
"#;

    #[tokio::test]
    async fn fixture_serves_source_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        std::fs::write(&path, FIXTURE).unwrap();
        let source = FileCanonicalSource::new(&path);

        assert!(source.network_restriction_enabled().await.unwrap());
        assert!(!source.no_network_policy_accessor_enabled().await.unwrap());
        assert_eq!(source.list_networks().await.unwrap().len(), 1);
        assert!(source.client_restriction_policy().await.unwrap().is_none());

        let members = source
            .list_department_members(&DepartmentId::new("eng"))
            .await
            .unwrap();
        assert_eq!(members, vec![UserId::new("alice")]);
        let ancestors = source
            .get_department_ancestors(&UserId::new("bob"))
            .await
            .unwrap();
        assert_eq!(ancestors, vec![vec![DepartmentId::new("sales"), DepartmentId::new("root")]]);
    }

    #[tokio::test]
    async fn sub_departments_include_memberless_chains() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        std::fs::write(&path, format!("{FIXTURE}departments:\n  - [legal, root]\n")).unwrap();
        let source = FileCanonicalSource::new(&path);

        let chains = source
            .list_sub_departments(&DepartmentId::new("root"))
            .await
            .unwrap();
        let leaves: Vec<&str> = chains.iter().map(|chain| chain[0].as_str()).collect();
        assert_eq!(leaves, vec!["backend", "eng", "legal", "sales"]);
        assert!(chains.iter().all(|chain| chain.last().unwrap().as_str() == "root"));
    }

    #[tokio::test]
    async fn missing_file_is_a_canonical_error() {
        let source = FileCanonicalSource::new("/nonexistent/policy.yaml");
        let err = source.list_networks().await.unwrap_err();
        assert!(matches!(err, PolicyError::CanonicalSource { .. }));
    }
}
