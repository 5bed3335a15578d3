//! Host resolution and normalization
//!
//! The effective host list comes from, in precedence order: the `--servers`
//! flag, the recipe's embedded host list, or the stdout of the recipe's
//! host-lookup shell command (comma-separated). Every entry is normalized
//! to `host:port`, with an optional inline `user@` prefix peeled off as a
//! per-host login override.

use convenient_recipe::Recipe;
use tokio::process::Command;
use tracing::{debug, warn};

/// One normalized target host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    /// Login user from an inline `user@host` prefix, if any
    pub user: Option<String>,
    /// Bare hostname, used for log line prefixes
    pub host: String,
    /// Port to dial
    pub port: u16,
}

impl HostSpec {
    /// Parse one raw entry. Returns `None` for entries that cannot be
    /// normalized to `host:port` (the caller logs and drops those).
    pub fn parse(raw: &str, default_port: u16) -> Option<HostSpec> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let (user, rest) = match trimmed.split_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
            Some(_) => return None,
            None => (None, trimmed),
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().ok()?),
            None => (rest, default_port),
        };
        if host.is_empty() {
            return None;
        }

        Some(HostSpec {
            user,
            host: host.to_string(),
            port,
        })
    }

    /// The `host:port` dial address.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// What a dynamic host lookup produced, kept so the caller can record it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupOutcome {
    /// The shell command that ran
    pub command: String,
    /// Raw comma-split hosts from its stdout
    pub hosts: Vec<String>,
}

/// Resolve the raw host list for a recipe.
///
/// A lookup process failure is logged and yields the empty list; deciding
/// whether an empty list is fatal is the executor's call.
pub async fn effective_hosts(
    recipe: &Recipe,
    servers_flag: &str,
) -> (Vec<String>, Option<LookupOutcome>) {
    if !servers_flag.trim().is_empty() {
        return (split_hosts(servers_flag), None);
    }

    if !recipe.hosts.is_empty() {
        return (recipe.hosts.clone(), None);
    }

    let lookup = recipe.host_lookup.trim();
    if lookup.is_empty() {
        return (Vec::new(), None);
    }

    match run_lookup(lookup).await {
        Ok(hosts) => {
            debug!("host lookup returned {} entries", hosts.len());
            let outcome = LookupOutcome {
                command: lookup.to_string(),
                hosts: hosts.clone(),
            };
            (hosts, Some(outcome))
        }
        Err(err) => {
            warn!("host lookup failed: {err}");
            (Vec::new(), None)
        }
    }
}

/// Normalize raw entries, logging and dropping anything unparseable.
pub fn normalize_hosts(raw: &[String], default_port: u16) -> Vec<HostSpec> {
    raw.iter()
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| match HostSpec::parse(entry, default_port) {
            Some(spec) => Some(spec),
            None => {
                warn!("couldn't parse host entry {:?}, dropping it", entry.trim());
                None
            }
        })
        .collect()
}

/// Run the lookup command through the platform shell, inheriting the
/// environment, and comma-split its stdout.
async fn run_lookup(command: &str) -> std::io::Result<Vec<String>> {
    let output = shell_command(command).output().await?;
    if !output.status.success() {
        return Err(std::io::Error::other(format!(
            "{command:?} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(split_hosts(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

fn split_hosts(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
