//! Cache maintenance commands

use anyhow::{Context, Result};
use clap::{ArgMatches, Command};
use convenient_cache::{CacheDb, DEFAULT_CACHE_PATH};

pub fn command() -> Command {
    Command::new("cache")
        .about("cache does operations against the Blade database")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("clear")
                .about("clear destroys the cache; Blade rebuilds it on the next run"),
        )
}

pub fn dispatch(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("clear", _)) => clear(),
        _ => unreachable!("clap enforces a known cache subcommand"),
    }
}

fn clear() -> Result<()> {
    let db = CacheDb::open(DEFAULT_CACHE_PATH).context("cannot open the Blade cache database")?;
    db.clear_all().context("cannot clear the Blade cache")?;
    println!("Cache cleared.");
    Ok(())
}
