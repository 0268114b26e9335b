use anyhow::Result;
use clap::Args;
use policyd_policy_center::{PolicyError, StorePath};

use super::context::CliContext;
use super::output::print_structured;

#[derive(Args, Clone, Debug)]
pub struct DumpArgs {
    /// Slash-separated path inside the snapshot
    #[arg(long, default_value = "/")]
    pub path: String,
}

pub async fn cmd_dump(args: DumpArgs, ctx: &CliContext) -> Result<()> {
    let path: StorePath = args
        .path
        .parse()
        .map_err(|err: PolicyError| PolicyError::CallerInput(err.to_string()))?;
    let engine = ctx.engine().await?;
    let value = engine.read_policy_data(&path).await?;
    print_structured(ctx.output(), &value)
}
