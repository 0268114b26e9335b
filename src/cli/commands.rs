use clap::Subcommand;

use super::check::{CheckClientArgs, CheckNetworkArgs};
use super::inspect::DumpArgs;
use super::serve::RunArgs;
use super::update::UpdateUserArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Start the engine and keep it reconciled until interrupted
    Run(RunArgs),

    /// Evaluate network admission for an accessor
    CheckNetwork(CheckNetworkArgs),

    /// Evaluate sign-in admission for a client kind
    CheckClient(CheckClientArgs),

    /// Print the live policy snapshot
    Dump(DumpArgs),

    /// Apply an incremental department update for one user
    UpdateUser(UpdateUserArgs),

    /// Show the effective engine configuration
    Config,
}
