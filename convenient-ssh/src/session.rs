//! Fan-out session executor
//!
//! One session run executes a recipe's materialized command list against
//! every resolved host. Hosts move through a queue into a dispatcher that
//! holds a semaphore sized to the effective concurrency; each host gets a
//! worker task that dials, runs every command serially, and retries the
//! whole connect-and-run attempt under the recipe's backoff policy.
//! Success and failure tallies are atomic; after all workers join, one
//! summary line reports the run.

use crate::backoff::RetryPolicy;
use crate::hosts::{self, HostSpec, LookupOutcome};
use crate::output::OutputLog;
use crate::ssh_config;
use crate::transport::{ClientSettings, Connection, Connector};
use crate::{SshError, SshResult};
use convenient_recipe::{Recipe, template};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::debug;

/// Fallback login user when nothing else names one.
pub const DEFAULT_USER: &str = "root";

/// Command-line overrides applied on top of a recipe.
/// Zero/empty/`None` means "unset".
#[derive(Debug, Clone, Default)]
pub struct SessionOverrides {
    /// Comma-delimited host list replacing the recipe's host source
    pub servers: String,
    /// Worker pool size (0: use the recipe's, then 1)
    pub concurrency: u32,
    /// SSH port (0: use the recipe's, then 22)
    pub port: u16,
    /// Login user; `Some` only when the flag was explicitly passed
    pub user: Option<String>,
    /// Retry cap; `Some` only when the flag was explicitly passed
    pub retries: Option<u32>,
    /// Suppress non-error output
    pub quiet: bool,
    /// Per-recipe argument flag values, keyed by argument name
    pub arg_flags: HashMap<String, String>,
}

/// Outcome of one session run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Hosts whose attempt ultimately succeeded
    pub success: u32,
    /// Hosts whose retries were exhausted (or were skipped by fail-batch)
    pub failed: u32,
    /// All resolved hosts
    pub total: u32,
    /// Set when a dynamic host lookup ran
    pub lookup: Option<LookupOutcome>,
}

struct Counters {
    success: AtomicU32,
    failed: AtomicU32,
}

/// One unit of work: a host, the commands to run on it, and its settings.
struct HostWork {
    spec: HostSpec,
    settings: ClientSettings,
    commands: Arc<Vec<String>>,
}

/// Executes recipes against their host sets.
pub struct SessionRunner<C: Connector> {
    connector: Arc<C>,
    dial_timeout: Duration,
}

impl<C: Connector> SessionRunner<C> {
    /// Create a runner over the given transport.
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            dial_timeout: Duration::from_secs(10),
        }
    }

    /// Override the dial timeout applied to every connection attempt.
    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    /// Run `recipe` across its resolved hosts.
    ///
    /// Configuration, templating and resolution errors fail here before
    /// any dial. Per-host transport failures are retried, then tallied;
    /// they never fail the run itself. The outcome is also reported as a
    /// final summary log line.
    pub async fn run(
        &self,
        recipe: &Recipe,
        overrides: &SessionOverrides,
    ) -> SshResult<SessionSummary> {
        let commands = Arc::new(template::render_commands(recipe, &overrides.arg_flags)?);
        let concurrency = effective_concurrency(overrides.concurrency, recipe.overrides.concurrency);
        let port = effective_port(overrides.port, recipe.overrides.port);
        let policy = RetryPolicy::from_recipe(&recipe.resilience, overrides.retries);

        // Without a --servers override the recipe itself must name a host
        // source; a lookup that fails or returns nothing parseable is
        // caught by the emptiness check below.
        if overrides.servers.trim().is_empty() && !recipe.has_host_source() {
            return Err(SshError::NoHosts(recipe.name.clone()));
        }

        let (raw_hosts, lookup) = hosts::effective_hosts(recipe, &overrides.servers).await;
        let specs = hosts::normalize_hosts(&raw_hosts, port);
        if specs.is_empty() {
            return Err(SshError::NoHosts(recipe.name.clone()));
        }
        let total = specs.len() as u32;

        let (log, log_task) = OutputLog::start(overrides.quiet);
        log.notice(format!("Starting recipe: {}", recipe.name));

        let counters = Arc::new(Counters {
            success: AtomicU32::new(0),
            failed: AtomicU32::new(0),
        });

        let (tx, rx) = mpsc::channel::<HostWork>(1);
        let dispatcher = tokio::spawn(dispatch(
            rx,
            Arc::new(Semaphore::new(concurrency as usize)),
            Arc::clone(&self.connector),
            Arc::clone(&counters),
            log.clone(),
            policy,
            recipe.resilience.fail_batch,
        ));

        for spec in specs {
            let settings = ClientSettings {
                user: effective_user(&spec, overrides, recipe),
                dial_timeout: self.dial_timeout,
            };
            let work = HostWork {
                spec,
                settings,
                commands: Arc::clone(&commands),
            };
            if tx.send(work).await.is_err() {
                break;
            }
        }
        drop(tx);
        let _ = dispatcher.await;

        let success = counters.success.load(Ordering::SeqCst);
        let failed = counters.failed.load(Ordering::SeqCst);
        log.summary(format!(
            "Recipe done: {} - {} success | {} failed | {} total",
            recipe.name, success, failed, total
        ));
        drop(log);
        let _ = log_task.await;

        Ok(SessionSummary {
            success,
            failed,
            total,
            lookup,
        })
    }
}

/// Consume queued hosts, launching one worker per host while the semaphore
/// has permits. With fail-batch set, hosts arriving after the first
/// recorded failure are tallied as failed without being dialed.
async fn dispatch<C: Connector>(
    mut rx: mpsc::Receiver<HostWork>,
    semaphore: Arc<Semaphore>,
    connector: Arc<C>,
    counters: Arc<Counters>,
    log: OutputLog,
    policy: RetryPolicy,
    fail_batch: bool,
) {
    let mut workers = JoinSet::new();

    while let Some(work) = rx.recv().await {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        if fail_batch && counters.failed.load(Ordering::SeqCst) > 0 {
            counters.failed.fetch_add(1, Ordering::SeqCst);
            log.error(Some(&work.spec.host), "skipped: batch failed");
            drop(permit);
            continue;
        }

        let connector = Arc::clone(&connector);
        let counters = Arc::clone(&counters);
        let log = log.clone();
        let policy = policy.clone();
        workers.spawn(async move {
            // Permit is held for the worker's whole life; dropped on every
            // exit path, panics included.
            let _permit = permit;
            run_host(connector.as_ref(), work, &policy, &counters, &log).await;
        });
    }

    while workers.join_next().await.is_some() {}
}

/// Execute all commands on one host, retrying the whole connect-and-run
/// attempt under the backoff policy.
async fn run_host<C: Connector>(
    connector: &C,
    work: HostWork,
    policy: &RetryPolicy,
    counters: &Counters,
    log: &OutputLog,
) {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match attempt_host(connector, &work, attempt, policy.pause, log).await {
            Ok(()) => {
                counters.success.fetch_add(1, Ordering::SeqCst);
                return;
            }
            Err(err) if attempt < policy.max_attempts => {
                let delay = policy.delay(attempt);
                log.error(
                    Some(&work.spec.host),
                    &format!(
                        "attempt {attempt} failed, retrying in {}: {err}",
                        humantime::format_duration(delay)
                    ),
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                log.error(Some(&work.spec.host), &format!("error {err}"));
                return;
            }
        }
    }
}

/// One attempt: fresh connection, every command in list order, each in its
/// own session. A failing command is recorded but later commands still run;
/// the attempt fails if any command failed.
async fn attempt_host<C: Connector>(
    connector: &C,
    work: &HostWork,
    attempt: u32,
    pause: Duration,
    log: &OutputLog,
) -> SshResult<()> {
    let mut conn = connector
        .connect(&work.spec.host, work.spec.port, &work.settings)
        .await?;

    let mut first_failure = None;
    for (index, command) in work.commands.iter().enumerate() {
        if let Err(err) = conn.exec(command, &work.spec.host, attempt, log).await {
            debug!(
                host = %work.spec.host,
                "command {} of {} failed: {err}",
                index + 1,
                work.commands.len()
            );
            if first_failure.is_none() {
                first_failure = Some(err);
            }
        }
        if index + 1 < work.commands.len() && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
    conn.close().await;

    match first_failure {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

fn effective_concurrency(flag: u32, recipe: u32) -> u32 {
    if flag > 0 {
        flag
    } else if recipe > 0 {
        recipe
    } else {
        1
    }
}

fn effective_port(flag: u16, recipe: u16) -> u16 {
    if flag > 0 {
        flag
    } else if recipe > 0 {
        recipe
    } else {
        22
    }
}

/// Per-host login user: inline `user@host`, then the explicit --user flag,
/// then the recipe override, then the host's ~/.ssh/config entry, then
/// [`DEFAULT_USER`].
fn effective_user(spec: &HostSpec, overrides: &SessionOverrides, recipe: &Recipe) -> String {
    if let Some(user) = &spec.user {
        return user.clone();
    }
    if let Some(user) = &overrides.user {
        return user.clone();
    }
    if !recipe.overrides.user.is_empty() {
        return recipe.overrides.user.clone();
    }
    if let Some(user) = ssh_config::config_user(&spec.host) {
        return user;
    }
    DEFAULT_USER.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_falls_back_through_recipe_to_one() {
        assert_eq!(effective_concurrency(4, 2), 4);
        assert_eq!(effective_concurrency(0, 2), 2);
        assert_eq!(effective_concurrency(0, 0), 1);
    }

    #[test]
    fn port_falls_back_through_recipe_to_22() {
        assert_eq!(effective_port(2222, 2200), 2222);
        assert_eq!(effective_port(0, 2200), 2200);
        assert_eq!(effective_port(0, 0), 22);
    }

    #[test]
    fn user_prefers_inline_then_flag_then_recipe() {
        let mut recipe = Recipe::default();
        recipe.overrides.user = "recipe-user".to_string();

        let inline = HostSpec::parse("deploy@h1", 22).unwrap();
        let plain = HostSpec::parse("h1", 22).unwrap();

        let with_flag = SessionOverrides {
            user: Some("flag-user".to_string()),
            ..Default::default()
        };
        let without_flag = SessionOverrides::default();

        assert_eq!(effective_user(&inline, &with_flag, &recipe), "deploy");
        assert_eq!(effective_user(&plain, &with_flag, &recipe), "flag-user");
        assert_eq!(effective_user(&plain, &without_flag, &recipe), "recipe-user");
    }
}
