//! Minimal patch sets for a single user's department change.

use std::collections::BTreeSet;

use policyd_core_types::{IpFamily, UserId};
use serde_json::{json, Value};

use crate::model::{DepartmentPath, DEPARTMENTS, NETWORK_INFO, USERS};
use crate::store::{PatchOperation, StorePath};

fn family_path(family: IpFamily) -> StorePath {
    StorePath::from_segments([NETWORK_INFO, family.as_str()])
}

/// Departments holding a relation for `family` in `doc`.
pub fn relation_departments(doc: &Value, family: IpFamily) -> BTreeSet<String> {
    family_path(family)
        .join(DEPARTMENTS)
        .resolve(doc)
        .and_then(Value::as_object)
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}

fn has_department_entry(doc: &Value, family: IpFamily, user: &UserId) -> bool {
    family_path(family)
        .join(USERS)
        .join(user.as_str())
        .join(DEPARTMENTS)
        .resolve(doc)
        .is_some()
}

/// Whether an update for `user` can change anything at all: some department in
/// the new paths holds a relation, or the user currently has department entries.
pub fn touches_relations(doc: &Value, user: &UserId, paths: &[DepartmentPath]) -> bool {
    IpFamily::ALL.iter().any(|family| {
        if has_department_entry(doc, *family, user) {
            return true;
        }
        let related = relation_departments(doc, *family);
        paths
            .iter()
            .flatten()
            .any(|department| related.contains(department.as_str()))
    })
}

/// Patches that make `user`'s department entries match `closure`.
pub fn plan(doc: &Value, user: &UserId, closure: &BTreeSet<String>) -> Vec<PatchOperation> {
    let mut patches = Vec::new();
    for family in IpFamily::ALL {
        let family_root = family_path(family);
        let Some(family_doc) = family_root.resolve(doc) else {
            continue;
        };
        let related = relation_departments(doc, family);
        let wanted: Vec<&String> = closure.intersection(&related).collect();
        let users_path = family_root.join(USERS);
        let user_path = users_path.join(user.as_str());
        let existing = user_path.resolve(doc);

        if !wanted.is_empty() {
            let wanted = json!(wanted);
            match existing {
                None => {
                    if family_doc.get(USERS).is_none() {
                        patches.push(PatchOperation::add(users_path, json!({})));
                    }
                    patches.push(PatchOperation::add(
                        user_path,
                        json!({ DEPARTMENTS: wanted }),
                    ));
                }
                Some(entry) if entry.get(DEPARTMENTS) != Some(&wanted) => {
                    patches.push(PatchOperation::add(user_path.join(DEPARTMENTS), wanted));
                }
                Some(_) => {}
            }
        } else if let Some(entry) = existing {
            if entry.get(DEPARTMENTS).is_none() {
                continue;
            }
            let has_other_content = entry
                .as_object()
                .map(|map| map.keys().any(|key| key != DEPARTMENTS))
                .unwrap_or(false);
            if has_other_content {
                patches.push(PatchOperation::remove(user_path.join(DEPARTMENTS)));
            } else {
                patches.push(PatchOperation::remove(user_path));
            }
        }
    }
    patches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PatchOp;
    use policyd_core_types::DepartmentId;

    fn doc() -> Value {
        json!({
            "network_info": {
                "is_enabled": true,
                "no_policy_accessor_enabled": false,
                "ipv4": {
                    "networks": {"n1": ["10.0.0.0/8"]},
                    "departments": {"d1": "n1", "d3": "n1"},
                    "users": {
                        "direct": {"network": "n1", "departments": ["d1"]},
                        "plain": {"departments": ["d1"]}
                    }
                },
                "ipv6": {"networks": {}, "departments": {}, "users": {}}
            }
        })
    }

    fn closure(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn new_user_gets_a_whole_entry() {
        let patches = plan(&doc(), &UserId::new("u9"), &closure(&["d3", "d1", "root"]));
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].op, PatchOp::Add);
        assert_eq!(patches[0].path.to_string(), "/network_info/ipv4/users/u9");
        assert_eq!(patches[0].value, json!({"departments": ["d1", "d3"]}));
    }

    #[test]
    fn existing_entry_only_gets_departments_replaced() {
        let patches = plan(&doc(), &UserId::new("direct"), &closure(&["d3"]));
        assert_eq!(patches.len(), 1);
        assert_eq!(
            patches[0].path.to_string(),
            "/network_info/ipv4/users/direct/departments"
        );
        assert_eq!(patches[0].value, json!(["d3"]));
    }

    #[test]
    fn unchanged_entry_needs_no_patch() {
        assert!(plan(&doc(), &UserId::new("plain"), &closure(&["d1", "d7"])).is_empty());
    }

    #[test]
    fn leaving_related_departments_removes_entry_or_field() {
        let plain = plan(&doc(), &UserId::new("plain"), &closure(&["d7"]));
        let expected = PatchOperation::remove("/network_info/ipv4/users/plain".parse().unwrap());
        assert_eq!(plain, vec![expected]);

        let direct = plan(&doc(), &UserId::new("direct"), &closure(&[]));
        let expected = PatchOperation::remove(
            "/network_info/ipv4/users/direct/departments"
                .parse()
                .unwrap(),
        );
        assert_eq!(direct, vec![expected]);
    }

    #[test]
    fn disabled_snapshot_produces_no_patches() {
        let disabled = json!({
            "network_info": {"is_enabled": false, "no_policy_accessor_enabled": false}
        });
        assert!(plan(&disabled, &UserId::new("u1"), &closure(&["d1"])).is_empty());
    }

    #[test]
    fn short_circuit_considers_paths_and_prior_entries() {
        let doc = doc();
        let unrelated = vec![vec![DepartmentId::new("d7"), DepartmentId::new("root")]];
        assert!(!touches_relations(&doc, &UserId::new("nobody"), &unrelated));
        assert!(touches_relations(&doc, &UserId::new("plain"), &unrelated));

        let related = vec![vec![DepartmentId::new("d3"), DepartmentId::new("root")]];
        assert!(touches_relations(&doc, &UserId::new("nobody"), &related));
    }
}
