use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use policyd_policy_center::PolicyError;
use tracing::{debug, error};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, load_engine_config, LoadedConfig};

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    init_logging(&cli.log_level, cli.debug)?;
    debug!("Starting policyd v{}", env!("CARGO_PKG_VERSION"));

    let LoadedConfig { config, path } = load_engine_config(cli.config.as_ref())?;
    let cli_context = CliContext::new(config, path, cli.policy.clone(), cli.output);

    match dispatch(&cli, &cli_context).await {
        Ok(()) => Ok(()),
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}

/// `2` for invalid caller input, `1` for every other failure.
pub fn exit_code(err: &anyhow::Error) -> ExitCode {
    let caller_input = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<PolicyError>())
        .any(PolicyError::is_caller_input);
    if caller_input {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}
