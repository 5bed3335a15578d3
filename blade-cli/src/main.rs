//! Blade - recipe-driven remote command execution
//!
//! At startup Blade walks the recipe directories, mirrors them into a
//! `run` subcommand hierarchy, and hands matched leaves to the session
//! executor:
//!
//! 1. Recipe discovery and decoding (convenient-recipe)
//! 2. Command tree construction ([`tree`])
//! 3. Flag validation and dispatch ([`commands`])
//! 4. Concurrent SSH fan-out (convenient-ssh)

mod app;
mod commands;
mod tree;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The subscriber must exist before the tree build starts logging
    // skipped recipes, which is before clap parses --verbose/--quiet.
    // Peek at argv for the verbosity switches instead.
    let default_filter = if std::env::args().any(|a| a == "-v" || a == "--verbose") {
        "blade=debug,convenient_recipe=debug,convenient_ssh=debug,convenient_cache=debug"
    } else if std::env::args().any(|a| a == "-q" || a == "--quiet") {
        "blade=error,convenient_recipe=error,convenient_ssh=error,convenient_cache=error"
    } else {
        "blade=warn,convenient_recipe=warn,convenient_ssh=warn,convenient_cache=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app = app::Application::bootstrap().await;
    app.execute().await
}
