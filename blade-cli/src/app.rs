//! Application wiring
//!
//! Startup state lives on one `Application` value: the command tree built
//! from the recipe search roots. Nothing here is process-global; the cache
//! database is opened only by the paths that need it.

use crate::commands;
use crate::tree::CommandTree;
use anyhow::Result;
use std::path::PathBuf;
use tracing::debug;

pub struct Application {
    tree: CommandTree,
}

impl Application {
    /// Discover recipes and build the command tree.
    pub async fn bootstrap() -> Application {
        let roots = recipe_roots();
        let tree = CommandTree::build(&roots).await;
        if tree.is_empty() {
            debug!("no recipes found under {roots:?}");
        }
        Application { tree }
    }

    /// Parse the command line and dispatch.
    pub async fn execute(&self) -> Result<()> {
        let cli = commands::build_cli(&self.tree);
        let matches = cli.get_matches();

        match matches.subcommand() {
            Some(("run", sub)) => commands::run::dispatch(&self.tree, sub).await,
            Some(("cache", sub)) => commands::cache::dispatch(sub),
            Some(("version", _)) => {
                println!("blade {}", clap::crate_version!());
                Ok(())
            }
            _ => unreachable!("clap enforces a known subcommand"),
        }
    }
}

/// The system recipes folder relative to the working directory, then the
/// user's hidden recipe folder under home.
fn recipe_roots() -> Vec<PathBuf> {
    let mut roots = vec![PathBuf::from("recipes")];
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join(".blade").join("recipes"));
    }
    roots
}
