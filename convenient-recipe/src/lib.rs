//! Blade recipe parsing
//!
//! Provides the recipe data model and YAML decoding:
//! - Tolerant decoding of `.blade.yaml` files (omitted blocks become defaults)
//! - Argument table with command-line flag override semantics
//! - File checksum tracking for the recipe cache
//! - `${name}` command templating (see [`template`])

pub mod template;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Conventional filename suffix for recipe files.
pub const RECIPE_SUFFIX: &str = ".blade.yaml";

/// Reserved filename; never exposed as a subcommand.
pub const GLOBAL_RECIPE_NAME: &str = "global.blade.yaml";

/// Error types for recipe loading
#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    /// Failed to read the recipe file
    #[error("failed to read {0}: {1}")]
    Io(PathBuf, String),
    /// Failed to decode the recipe file
    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, String),
}

/// Result type for recipe loading
pub type RecipeResult<T> = Result<T, RecipeError>;

/// One remote operation: hosts, commands, arguments and policy.
///
/// Decoded from a `.blade.yaml` file. `name` and `filename` are assigned by
/// the command tree builder after decoding; everything else is immutable
/// once loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Recipe {
    /// Dotted recipe name derived from its path below the recipes root
    /// (e.g. "infra-a.mail-server.restart")
    #[serde(skip)]
    pub name: String,
    /// Absolute path of the source file
    #[serde(skip)]
    pub filename: PathBuf,
    /// SHA-256 of the file content, for cache invalidation
    #[serde(skip)]
    pub checksum: String,

    /// Hardcoded host list; may be empty when `host_lookup` is set
    pub hosts: Vec<String>,
    /// Shell command whose stdout lists hosts, comma-separated
    pub host_lookup: String,
    /// Command templates executed in order on every host
    pub exec: Vec<String>,
    /// Argument table, keyed by the `${name}` variable name
    pub args: BTreeMap<String, RecipeArg>,
    /// Help text for the generated subcommand
    pub help: RecipeHelp,
    /// Session defaults a command-line flag may override
    pub overrides: RecipeOverrides,
    /// Retry and backoff policy
    pub resilience: RecipeResilience,
}

impl Recipe {
    /// Load and decode a recipe file, recording its content checksum.
    pub async fn load(path: impl AsRef<Path>) -> RecipeResult<Recipe> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RecipeError::Io(path.to_path_buf(), e.to_string()))?;

        let mut recipe = Self::from_yaml(&content)
            .map_err(|e| RecipeError::Parse(path.to_path_buf(), e.to_string()))?;
        recipe.filename = path.to_path_buf();
        recipe.checksum = checksum(&content);
        Ok(recipe)
    }

    /// Decode a recipe from YAML text.
    ///
    /// Omitted blocks decode to empty defaults. Each argument entry learns
    /// its own name from its map key so the templater and the flag builder
    /// can read it.
    pub fn from_yaml(content: &str) -> Result<Recipe, serde_yaml::Error> {
        let mut recipe: Recipe = serde_yaml::from_str(content)?;
        for (name, arg) in recipe.args.iter_mut() {
            arg.name = name.clone();
        }
        Ok(recipe)
    }

    /// A recipe can only execute with a host list or a lookup command.
    pub fn has_host_source(&self) -> bool {
        !self.hosts.is_empty() || !self.host_lookup.trim().is_empty()
    }
}

/// A named variable substitutable in commands via `${name}`,
/// overridable by a per-recipe command-line flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RecipeArg {
    /// Variable name; populated from the map key after decoding
    #[serde(skip)]
    pub name: String,
    /// Default value used when no flag override is given
    pub value: String,
    /// Help text shown on the generated flag
    pub help: String,
}

impl RecipeArg {
    /// The applied value: the flag override when it was provided non-empty,
    /// otherwise the recipe default. An empty default is a legal value.
    pub fn effective_value<'a>(&'a self, flag: Option<&'a str>) -> &'a str {
        match flag {
            Some(v) if !v.is_empty() => v,
            _ => &self.value,
        }
    }
}

/// Help text for the generated subcommand
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RecipeHelp {
    /// One-line description
    pub short: String,
    /// Long description
    pub long: String,
    /// Usage string
    pub usage: String,
}

/// Session defaults; zero/empty means unset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RecipeOverrides {
    /// Worker pool size (0: fall back to 1)
    pub concurrency: u32,
    /// SSH port (0: fall back to 22)
    pub port: u16,
    /// Login user (empty: fall back to ssh config, then root)
    pub user: String,
}

/// Retry and backoff policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RecipeResilience {
    /// Pause between commands on one host, e.g. "5s" (empty: none)
    pub wait_duration: String,
    /// Attempt cap per host (0: fall back to the --retries flag default)
    pub retries: u32,
    /// "constant" or "exponential" (default exponential)
    pub retry_backoff_strategy: String,
    /// Base delay between attempts, e.g. "500ms"
    pub retry_backoff_multiplier: String,
    /// Stop dispatching queued hosts after the first host failure
    pub fail_batch: bool,
}

/// Whether `name` looks like a recipe file that should become a command.
pub fn is_recipe_file(name: &str) -> bool {
    name.ends_with(RECIPE_SUFFIX) && name != GLOBAL_RECIPE_NAME
}

/// Strip the recipe suffix from a path segment, if present.
pub fn trim_recipe_suffix(segment: &str) -> &str {
    segment.strip_suffix(RECIPE_SUFFIX).unwrap_or(segment)
}

/// Dot-join path segments into a recipe name, stripping the suffix from the
/// last segment: `["infra-a", "mail", "restart.blade.yaml"]` becomes
/// `"infra-a.mail.restart"`.
pub fn dotted_name(segments: &[String]) -> String {
    let mut parts: Vec<&str> = segments.iter().map(String::as_str).collect();
    if let Some(last) = parts.last_mut() {
        *last = trim_recipe_suffix(last);
    }
    parts.join(".")
}

fn checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_helpers() {
        assert!(is_recipe_file("restart.blade.yaml"));
        assert!(!is_recipe_file("global.blade.yaml"));
        assert!(!is_recipe_file("notes.yaml"));
        assert_eq!(trim_recipe_suffix("restart.blade.yaml"), "restart");
        assert_eq!(trim_recipe_suffix("mail-server"), "mail-server");
    }

    #[test]
    fn dotted_name_strips_suffix_from_last_segment() {
        let segments = vec![
            "infra-a".to_string(),
            "mail-server".to_string(),
            "restart.blade.yaml".to_string(),
        ];
        assert_eq!(dotted_name(&segments), "infra-a.mail-server.restart");
    }

    #[test]
    fn effective_value_prefers_non_empty_flag() {
        let arg = RecipeArg {
            name: "name".into(),
            value: "world".into(),
            help: "who".into(),
        };
        assert_eq!(arg.effective_value(Some("Alice")), "Alice");
        assert_eq!(arg.effective_value(Some("")), "world");
        assert_eq!(arg.effective_value(None), "world");
    }

    #[test]
    fn empty_default_is_a_legal_effective_value() {
        let arg = RecipeArg::default();
        assert_eq!(arg.effective_value(None), "");
    }
}
