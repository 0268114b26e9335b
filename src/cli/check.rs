use std::net::IpAddr;

use anyhow::Result;
use clap::Args;
use policyd_core_types::Accessor;
use policyd_policy_center::{DecisionContext, PolicyError};
use serde_json::json;

use super::context::CliContext;
use super::output::{print_structured, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct CheckNetworkArgs {
    /// Accessor as `user:<id>` or `department:<id>`
    #[arg(long)]
    pub accessor: String,

    /// Source address of the connection
    #[arg(long)]
    pub address: IpAddr,
}

#[derive(Args, Clone, Debug)]
pub struct CheckClientArgs {
    /// Client kind, e.g. pc_web, ios, linux
    #[arg(long)]
    pub kind: String,
}

pub async fn cmd_check_network(args: CheckNetworkArgs, ctx: &CliContext) -> Result<()> {
    let accessor: Accessor = args
        .accessor
        .parse()
        .map_err(|err| PolicyError::CallerInput(format!("{err}")))?;
    let engine = ctx.engine().await?;
    let allowed = engine
        .network_decision(&DecisionContext::new(args.address), &accessor)
        .await?;
    report(
        ctx.output(),
        allowed,
        json!({
            "accessor": accessor.to_string(),
            "address": args.address,
            "allowed": allowed,
        }),
    )
}

pub async fn cmd_check_client(args: CheckClientArgs, ctx: &CliContext) -> Result<()> {
    let engine = ctx.engine().await?;
    // client kinds do not depend on the address
    let decision_ctx = DecisionContext::new(IpAddr::from([127, 0, 0, 1]));
    let allowed = engine.client_sign_decision(&decision_ctx, &args.kind).await?;
    report(
        ctx.output(),
        allowed,
        json!({"client": args.kind, "allowed": allowed}),
    )
}

fn report(format: OutputFormat, allowed: bool, payload: serde_json::Value) -> Result<()> {
    match format {
        OutputFormat::Human => {
            println!("{}", if allowed { "allowed" } else { "denied" });
            Ok(())
        }
        other => print_structured(other, &payload),
    }
}
