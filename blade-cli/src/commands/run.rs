//! The `run` subcommand
//!
//! Builds the clap subtree for every discovered recipe, validates the
//! persistent flags, and wires a matched terminal into the session
//! executor. Per-recipe argument flags are added dynamically to terminal
//! subcommands.

use crate::tree::{CommandNode, CommandTree, NodeKind};
use anyhow::{Result, bail};
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use convenient_cache::{
    CacheDb, DEFAULT_CACHE_PATH, HOST_LOOKUP_BUCKET, HostLookupRecord, RECIPE_COMMAND_BUCKET,
};
use convenient_recipe::Recipe;
use convenient_ssh::{SessionOverrides, SessionRunner, SessionSummary, SshConnector};
use std::collections::HashMap;
use tracing::warn;

/// Flags owned by `run`; recipe arguments may not shadow them.
const RESERVED_FLAGS: [&str; 9] = [
    "servers",
    "concurrency",
    "retries",
    "port",
    "user",
    "quiet",
    "verbose",
    "help",
    "version",
];

/// Build the `run` subtree with its persistent flags and one subcommand
/// per tree node.
pub fn command(tree: &CommandTree) -> Command {
    let mut run = Command::new("run")
        .about("run executes a recipe against its host set")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("servers")
                .short('s')
                .long("servers")
                .global(true)
                .default_value("")
                .help("comma-delimited host list overriding the recipe's hosts"),
        )
        .arg(
            Arg::new("concurrency")
                .short('c')
                .long("concurrency")
                .global(true)
                .value_parser(value_parser!(u32))
                .default_value("0")
                .help("worker-pool size; 0 uses the recipe default"),
        )
        .arg(
            Arg::new("retries")
                .short('r')
                .long("retries")
                .global(true)
                .value_parser(value_parser!(u32))
                .default_value("3")
                .help("attempts per host until a command succeeds"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .global(true)
                .value_parser(value_parser!(u16).range(22..))
                .default_value("22")
                .help("the ssh port to use"),
        )
        .arg(
            Arg::new("user")
                .short('u')
                .long("user")
                .global(true)
                .default_value("root")
                .help("login user for ssh"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .global(true)
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose")
                .help("suppress non-error output"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("extra logging"),
        );

    for node in &tree.roots {
        run = run.subcommand(node_command(node));
    }
    run
}

fn node_command(node: &CommandNode) -> Command {
    let mut cmd = Command::new(node.segment.clone()).about(node.short.clone());
    if !node.long.is_empty() {
        cmd = cmd.long_about(node.long.clone());
    }

    match &node.kind {
        NodeKind::Internal => {
            cmd = cmd.subcommand_required(true).arg_required_else_help(true);
            for child in &node.children {
                cmd = cmd.subcommand(node_command(child));
            }
        }
        NodeKind::Terminal(recipe) => {
            if !recipe.help.usage.is_empty() {
                cmd = cmd.override_usage(recipe.help.usage.clone());
            }
            for (name, arg) in &recipe.args {
                if RESERVED_FLAGS.contains(&name.as_str()) {
                    warn!(
                        "recipe argument {name:?} in {} shadows a built-in flag, skipping",
                        recipe.name
                    );
                    continue;
                }
                cmd = cmd.arg(
                    Arg::new(name.clone())
                        .long(name.clone())
                        .value_name("VALUE")
                        .default_value("")
                        .help(format!("{} (recipe flag)", arg.help)),
                );
            }
        }
    }
    cmd
}

/// Walk the matched subcommand path down to a terminal and execute it.
pub async fn dispatch(tree: &CommandTree, run_matches: &ArgMatches) -> Result<()> {
    let flags = RunFlags::from_matches(run_matches);

    let mut nodes = &tree.roots;
    let mut matches = run_matches;
    loop {
        let Some((name, sub)) = matches.subcommand() else {
            bail!("no recipe selected");
        };
        let Some(node) = nodes.iter().find(|node| node.segment == name) else {
            bail!("unknown run subcommand {name:?}");
        };
        match &node.kind {
            NodeKind::Terminal(recipe) => return execute(recipe, sub, flags).await,
            NodeKind::Internal => {
                nodes = &node.children;
                matches = sub;
            }
        }
    }
}

/// Persistent `run` flags with explicitness tracked where the recipe may
/// supply the fallback.
struct RunFlags {
    servers: String,
    concurrency: u32,
    port: u16,
    user: Option<String>,
    retries: Option<u32>,
    quiet: bool,
}

impl RunFlags {
    fn from_matches(matches: &ArgMatches) -> RunFlags {
        let explicit =
            |id: &str| matches.value_source(id) == Some(ValueSource::CommandLine);

        RunFlags {
            servers: matches
                .get_one::<String>("servers")
                .cloned()
                .unwrap_or_default(),
            concurrency: matches.get_one::<u32>("concurrency").copied().unwrap_or(0),
            port: if explicit("port") {
                matches.get_one::<u16>("port").copied().unwrap_or(0)
            } else {
                0
            },
            user: if explicit("user") {
                matches.get_one::<String>("user").cloned()
            } else {
                None
            },
            retries: if explicit("retries") {
                matches.get_one::<u32>("retries").copied()
            } else {
                None
            },
            quiet: matches.get_flag("quiet"),
        }
    }
}

async fn execute(recipe: &Recipe, leaf: &ArgMatches, flags: RunFlags) -> Result<()> {
    let mut arg_flags = HashMap::new();
    for name in recipe.args.keys() {
        if RESERVED_FLAGS.contains(&name.as_str()) {
            continue;
        }
        if let Some(value) = leaf.get_one::<String>(name) {
            arg_flags.insert(name.clone(), value.clone());
        }
    }

    let overrides = SessionOverrides {
        servers: flags.servers,
        concurrency: flags.concurrency,
        port: flags.port,
        user: flags.user,
        retries: flags.retries,
        quiet: flags.quiet,
        arg_flags,
    };

    // Per-host failures are tallied inside the run and reported by its
    // summary line; an error here means the run aborted before any dial
    // and must exit nonzero.
    let runner = SessionRunner::new(SshConnector);
    let summary = runner.run(recipe, &overrides).await?;
    record_run(recipe, &summary);
    Ok(())
}

/// Record the run in the cache database: the host-lookup result (when one
/// ran) and the recipe checksum. The lookup is never read back yet; the
/// records exist for a future read-side cache.
fn record_run(recipe: &Recipe, summary: &SessionSummary) {
    let db = match CacheDb::open(DEFAULT_CACHE_PATH) {
        Ok(db) => db,
        Err(err) => {
            warn!("cache database unavailable: {err}");
            return;
        }
    };

    if let Some(lookup) = &summary.lookup {
        let record = HostLookupRecord::new(lookup.command.clone(), lookup.hosts.clone());
        match record.to_json() {
            Ok(payload) => {
                if let Err(err) = db.put(HOST_LOOKUP_BUCKET, &lookup.command, &payload) {
                    warn!("couldn't record host lookup: {err}");
                }
            }
            Err(err) => warn!("couldn't encode host lookup record: {err}"),
        }
    }

    if !recipe.checksum.is_empty() {
        if let Err(err) = db.put(RECIPE_COMMAND_BUCKET, &recipe.name, &recipe.checksum) {
            warn!("couldn't record recipe checksum: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convenient_recipe::RecipeArg;
    use std::collections::BTreeMap;

    fn terminal(segment: &str, recipe: Recipe) -> CommandNode {
        CommandNode {
            segment: segment.to_string(),
            short: recipe.help.short.clone(),
            long: recipe.help.long.clone(),
            kind: NodeKind::Terminal(recipe),
            children: Vec::new(),
        }
    }

    fn tree_with(nodes: Vec<CommandNode>) -> CommandTree {
        CommandTree {
            roots: nodes,
            help_index: BTreeMap::new(),
        }
    }

    fn hello_recipe() -> Recipe {
        let mut recipe = Recipe::default();
        recipe.name = "hello".to_string();
        recipe.hosts = vec!["h1".to_string()];
        recipe.exec = vec!["echo hello ${name}".to_string()];
        recipe.args.insert(
            "name".to_string(),
            RecipeArg {
                name: "name".to_string(),
                value: "world".to_string(),
                help: "who".to_string(),
            },
        );
        recipe
    }

    #[test]
    fn recipe_flags_land_on_the_terminal_subcommand() {
        let tree = tree_with(vec![terminal("hello", hello_recipe())]);
        let matches = command(&tree)
            .try_get_matches_from(["run", "hello", "--name", "Alice"])
            .unwrap();

        let (_, leaf) = matches.subcommand().unwrap();
        assert_eq!(leaf.get_one::<String>("name").unwrap(), "Alice");
    }

    #[test]
    fn persistent_flags_reach_the_leaf() {
        let tree = tree_with(vec![terminal("hello", hello_recipe())]);
        let matches = command(&tree)
            .try_get_matches_from(["run", "hello", "-c", "5", "-s", "h9,h10"])
            .unwrap();

        let flags = RunFlags::from_matches(&matches);
        assert_eq!(flags.concurrency, 5);
        assert_eq!(flags.servers, "h9,h10");
        // Not explicitly passed: stays unset so the recipe can supply it.
        assert_eq!(flags.port, 0);
        assert_eq!(flags.user, None);
        assert_eq!(flags.retries, None);
    }

    #[test]
    fn explicit_port_and_retries_are_authoritative() {
        let tree = tree_with(vec![terminal("hello", hello_recipe())]);
        let matches = command(&tree)
            .try_get_matches_from(["run", "hello", "-p", "2222", "-r", "1", "-u", "ops"])
            .unwrap();

        let flags = RunFlags::from_matches(&matches);
        assert_eq!(flags.port, 2222);
        assert_eq!(flags.retries, Some(1));
        assert_eq!(flags.user.as_deref(), Some("ops"));
    }

    #[test]
    fn quiet_and_verbose_are_mutually_exclusive() {
        let tree = tree_with(vec![terminal("hello", hello_recipe())]);
        let result = command(&tree).try_get_matches_from(["run", "hello", "-q", "-v"]);
        assert!(result.is_err());
    }

    #[test]
    fn port_below_22_is_rejected() {
        let tree = tree_with(vec![terminal("hello", hello_recipe())]);
        let result = command(&tree).try_get_matches_from(["run", "hello", "-p", "21"]);
        assert!(result.is_err());
    }

    #[test]
    fn nested_tree_becomes_nested_subcommands() {
        let mut recipe = hello_recipe();
        recipe.name = "infra-a.mail.restart".to_string();
        let mail = CommandNode {
            segment: "mail".to_string(),
            short: String::new(),
            long: String::new(),
            kind: NodeKind::Internal,
            children: vec![terminal("restart", recipe)],
        };
        let infra = CommandNode {
            segment: "infra-a".to_string(),
            short: String::new(),
            long: String::new(),
            kind: NodeKind::Internal,
            children: vec![mail],
        };
        let tree = tree_with(vec![infra]);

        let matches = command(&tree)
            .try_get_matches_from(["run", "infra-a", "mail", "restart"])
            .unwrap();

        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "infra-a");
        let (name, sub) = sub.subcommand().unwrap();
        assert_eq!(name, "mail");
        let (name, _) = sub.subcommand().unwrap();
        assert_eq!(name, "restart");
    }
}
