//! Blade command-line interface
//!
//! Static subcommands are declared here; the `run` hierarchy is
//! materialized from the recipe tree at startup:
//! - `run`: execute a discovered recipe (one subcommand per tree node)
//! - `cache`: operations against the Blade database
//! - `version`: print the version

pub mod cache;
pub mod run;

use crate::tree::CommandTree;
use clap::{Command, crate_version};

/// Assemble the root command.
pub fn build_cli(tree: &CommandTree) -> Command {
    Command::new("blade")
        .about("Blade runs recipe-driven commands across your fleet over SSH")
        .version(crate_version!())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(run::command(tree))
        .subcommand(cache::command())
        .subcommand(Command::new("version").about("version prints the Blade version"))
}
