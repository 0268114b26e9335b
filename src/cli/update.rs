use anyhow::Result;
use clap::Args;
use policyd_core_types::{DepartmentId, IpFamily, UserId};
use policyd_policy_center::{DepartmentPath, PolicyError, StorePath, UpdateOutcome};
use serde_json::{json, Map, Value};

use super::context::CliContext;
use super::output::{print_structured, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct UpdateUserArgs {
    /// User whose departments changed
    #[arg(long)]
    pub user: String,

    /// Department chain from the user's department to the root, e.g. `team/eng/root`.
    /// Repeat for users in several departments.
    #[arg(long = "path", value_name = "A/B/C")]
    pub paths: Vec<String>,
}

fn parse_path(raw: &str) -> Result<DepartmentPath, PolicyError> {
    let path: DepartmentPath = raw
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(DepartmentId::new)
        .collect();
    if path.is_empty() {
        return Err(PolicyError::CallerInput(format!(
            "empty department path '{raw}'"
        )));
    }
    Ok(path)
}

pub async fn cmd_update_user(args: UpdateUserArgs, ctx: &CliContext) -> Result<()> {
    let user = UserId::new(args.user.as_str());
    let paths = args
        .paths
        .iter()
        .map(|raw| parse_path(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let engine = ctx.engine().await?;
    let outcome = engine.incremental_update_policy(&user, &paths).await?;

    let mut entries = Map::new();
    for family in IpFamily::ALL {
        let path = StorePath::from_segments(["network_info", family.as_str(), "users"])
            .join(user.as_str());
        let entry = match engine.read_policy_data(&path).await {
            Ok(value) => value,
            Err(PolicyError::NotFound(_)) => Value::Null,
            Err(err) => return Err(err.into()),
        };
        entries.insert(family.as_str().to_string(), entry);
    }

    let outcome_label = match outcome {
        UpdateOutcome::ShortCircuited => "short_circuited",
        UpdateOutcome::Unchanged => "unchanged",
        UpdateOutcome::Applied { .. } => "applied",
    };
    match ctx.output() {
        OutputFormat::Human => {
            println!("{outcome_label}");
            for (family, entry) in &entries {
                println!("{family}: {entry}");
            }
            Ok(())
        }
        other => print_structured(
            other,
            &json!({"user": user, "outcome": outcome_label, "entries": entries}),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn department_paths_split_on_slashes() {
        let path = parse_path("team/eng/root").unwrap();
        assert_eq!(
            path,
            vec![
                DepartmentId::new("team"),
                DepartmentId::new("eng"),
                DepartmentId::new("root")
            ]
        );
        assert!(parse_path("//").unwrap_err().is_caller_input());
    }
}
