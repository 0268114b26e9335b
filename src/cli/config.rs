use anyhow::Result;
use serde_json::json;

use super::context::CliContext;
use super::output::{print_structured, OutputFormat};

pub fn cmd_config(ctx: &CliContext) -> Result<()> {
    let settings = ctx.config().describe();
    match ctx.output() {
        OutputFormat::Human => {
            println!("Config file: {}", ctx.config_path().display());
            for (key, value, source) in settings {
                println!("{key} = {value} ({source:?})");
            }
            Ok(())
        }
        other => {
            let entries: Vec<_> = settings
                .into_iter()
                .map(|(key, value, source)| json!({"key": key, "value": value, "source": source}))
                .collect();
            print_structured(
                other,
                &json!({"path": ctx.config_path(), "settings": entries}),
            )
        }
    }
}
