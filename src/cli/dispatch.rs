use super::check::{cmd_check_client, cmd_check_network};
use super::config::cmd_config;
use super::env::CliArgs;
use super::inspect::cmd_dump;
use super::serve::cmd_run;
use super::update::cmd_update_user;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Run(args) => cmd_run(args, ctx).await,
        Commands::CheckNetwork(args) => cmd_check_network(args, ctx).await,
        Commands::CheckClient(args) => cmd_check_client(args, ctx).await,
        Commands::Dump(args) => cmd_dump(args, ctx).await,
        Commands::UpdateUser(args) => cmd_update_user(args, ctx).await,
        Commands::Config => cmd_config(ctx),
    }
}
