//! Recipe command tree
//!
//! Walks the recipe search roots at startup and mirrors the directory
//! layout into the `run` subcommand hierarchy. Directories become
//! navigational nodes; recipe files become terminal nodes carrying their
//! decoded [`Recipe`]. A broken recipe is logged and skipped, never fatal.

use convenient_recipe::{Recipe, dotted_name, is_recipe_file, trim_recipe_suffix};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// What a node does when matched.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Navigational segment; help only
    Internal,
    /// Recipe-backed leaf; invoking it starts a session run
    Terminal(Recipe),
}

/// Help text attached to a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeHelp {
    pub short: String,
    pub long: String,
}

/// One node of the `run` hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandNode {
    /// Display name; recipe suffix already stripped on terminals
    pub segment: String,
    pub short: String,
    pub long: String,
    pub kind: NodeKind,
    /// Ordered children; empty on terminals
    pub children: Vec<CommandNode>,
}

/// The command hierarchy below `run`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandTree {
    /// Top-level nodes, in discovery order
    pub roots: Vec<CommandNode>,
    /// Internal-node help keyed by full dotted path from the recipes root.
    /// The first recipe that creates a node claims its help; later recipes
    /// never overwrite it.
    pub help_index: BTreeMap<String, NodeHelp>,
}

impl CommandTree {
    /// Walk every search root and build the tree. Missing or unreadable
    /// roots are skipped silently; both missing means an empty tree.
    pub async fn build(search_roots: &[PathBuf]) -> CommandTree {
        let mut tree = CommandTree::default();

        for root in search_roots {
            for path in discover(root) {
                let Some(segments) = recipe_segments(&path) else {
                    warn!("recipe {} is not under a recipes root", path.display());
                    continue;
                };
                match Recipe::load(&path).await {
                    Ok(mut recipe) => {
                        recipe.name = dotted_name(&segments);
                        tree.insert(&segments, recipe);
                    }
                    Err(err) => warn!("found a broken recipe, skipping: {err}"),
                }
            }
        }

        tree
    }

    /// Whether no recipes were discovered at all.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    fn insert(&mut self, segments: &[String], recipe: Recipe) {
        insert_into(
            &mut self.roots,
            &mut self.help_index,
            String::new(),
            segments,
            recipe,
        );
    }
}

fn insert_into(
    children: &mut Vec<CommandNode>,
    help_index: &mut BTreeMap<String, NodeHelp>,
    prefix: String,
    segments: &[String],
    recipe: Recipe,
) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        let segment_name = trim_recipe_suffix(head).to_string();
        if children.iter().any(|child| child.segment == segment_name) {
            warn!(
                "command {segment_name:?} already exists, skipping recipe {}",
                recipe.filename.display()
            );
            return;
        }
        children.push(CommandNode {
            segment: segment_name,
            short: recipe.help.short.clone(),
            long: recipe.help.long.clone(),
            kind: NodeKind::Terminal(recipe),
            children: Vec::new(),
        });
        return;
    }

    // Internal nodes are keyed by their full dotted path, so identically
    // named folders in disjoint hierarchies stay distinct.
    let path = if prefix.is_empty() {
        head.clone()
    } else {
        format!("{prefix}.{head}")
    };

    let index = match children.iter().position(|child| child.segment == *head) {
        Some(index) if matches!(children[index].kind, NodeKind::Internal) => index,
        Some(_) => {
            warn!(
                "segment {head:?} collides with an existing command, skipping recipe {}",
                recipe.filename.display()
            );
            return;
        }
        None => {
            let help = help_index.entry(path.clone()).or_insert_with(|| NodeHelp {
                short: recipe.help.short.clone(),
                long: recipe.help.long.clone(),
            });
            children.push(CommandNode {
                segment: head.clone(),
                short: help.short.clone(),
                long: help.long.clone(),
                kind: NodeKind::Internal,
                children: Vec::new(),
            });
            children.len() - 1
        }
    };

    insert_into(&mut children[index].children, help_index, path, rest, recipe);
}

/// Enumerate recipe files under a root in lexicographic walk order.
fn discover(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(is_recipe_file)
        })
        .map(|entry| entry.into_path())
        .collect()
}

/// Path segments below the nearest ancestor named `recipes`.
fn recipe_segments(path: &Path) -> Option<Vec<String>> {
    let components: Vec<String> = path
        .iter()
        .map(|part| part.to_string_lossy().into_owned())
        .collect();
    let anchor = components.iter().rposition(|part| part == "recipes")?;
    let tail = &components[anchor + 1..];
    if tail.is_empty() {
        None
    } else {
        Some(tail.to_vec())
    }
}
