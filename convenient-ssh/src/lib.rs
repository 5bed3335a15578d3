//! Concurrent SSH fan-out for Blade
//!
//! Executes a recipe's command list against every resolved host under a
//! concurrency ceiling, with per-host retries and serialized streaming
//! output:
//!
//! 1. [`hosts`] resolves and normalizes the effective host list
//! 2. [`session`] dispatches one worker per host through a bounded pool
//! 3. [`transport`] opens SSH connections (agent-authenticated) and runs
//!    each command in a fresh session
//! 4. [`output`] serializes every line so hosts never interleave mid-line
//!
//! The executor is generic over [`transport::Connector`], so tests can
//! drive the whole engine against a mock transport.

pub mod backoff;
pub mod hosts;
pub mod output;
pub mod session;
pub mod ssh_config;
pub mod transport;

pub use backoff::{BackoffStrategy, RetryPolicy};
pub use hosts::{HostSpec, LookupOutcome};
pub use output::OutputLog;
pub use session::{SessionOverrides, SessionRunner, SessionSummary};
pub use transport::{ClientSettings, Connection, Connector, SshConnector};

/// Error types for session execution
#[derive(Debug, thiserror::Error)]
pub enum SshError {
    /// Recipe resolved to an empty host list
    #[error("no hosts resolved for recipe {0}")]
    NoHosts(String),

    /// Command templating failed before any dial
    #[error(transparent)]
    Template(#[from] convenient_recipe::template::TemplateError),

    /// TCP or SSH handshake failure
    #[error("failed to dial {host}: {reason}")]
    Dial {
        /// Target host
        host: String,
        /// Underlying cause
        reason: String,
    },

    /// No agent identity was accepted by the remote
    #[error("authentication failed for {user}@{host}")]
    Auth {
        /// Login user
        user: String,
        /// Target host
        host: String,
    },

    /// The ssh agent socket could not be used
    #[error("ssh agent unavailable: {0}")]
    Agent(String),

    /// Opening a session channel failed
    #[error("failed to open session on {host}: {reason}")]
    Session {
        /// Target host
        host: String,
        /// Underlying cause
        reason: String,
    },

    /// A remote command exited nonzero
    #[error("command exited with status {status}: {command}")]
    CommandFailed {
        /// The command that failed
        command: String,
        /// Remote exit status
        status: u32,
    },
}

/// Result type for session execution
pub type SshResult<T> = Result<T, SshError>;
