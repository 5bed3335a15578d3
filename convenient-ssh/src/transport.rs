//! SSH transport
//!
//! [`SshConnector`] dials hosts with russh and authenticates through the
//! user's ssh agent (`SSH_AUTH_SOCK`). Each remote command runs in a fresh
//! session channel on the shared connection; stdout and stderr arrive as
//! data events on the channel stream and are re-assembled into lines
//! before they reach the serialized log.
//!
//! The [`Connector`] / [`Connection`] traits are the seam the session
//! executor is generic over; tests substitute a mock transport here.

use crate::output::OutputLog;
use crate::{SshError, SshResult};
use async_trait::async_trait;
use russh::keys::agent::client::AgentClient;
use russh::keys::ssh_key;
use russh::{ChannelMsg, Disconnect, client};
use std::sync::Arc;
use std::time::Duration;

/// Connection settings shared by every host of a session run; the session
/// executor hands each worker a per-host copy carrying the effective user.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Login user for this host
    pub user: String,
    /// TCP/SSH dial timeout
    pub dial_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            dial_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens connections to hosts. The executor's transport seam.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced by this connector
    type Conn: Connection;

    /// Dial and authenticate one host.
    async fn connect(
        &self,
        host: &str,
        port: u16,
        settings: &ClientSettings,
    ) -> SshResult<Self::Conn>;
}

/// One live connection to a host.
#[async_trait]
pub trait Connection: Send {
    /// Run one command in a fresh session, streaming its output through
    /// `log`; returns after the remote command finishes.
    async fn exec(
        &mut self,
        command: &str,
        host: &str,
        attempt: u32,
        log: &OutputLog,
    ) -> SshResult<()>;

    /// Close the connection.
    async fn close(&mut self);
}

/// russh-backed connector using ssh-agent public key authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host keys are not pinned; trust rests on the agent-backed login.
        Ok(true)
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Conn = SshConnection;

    async fn connect(
        &self,
        host: &str,
        port: u16,
        settings: &ClientSettings,
    ) -> SshResult<SshConnection> {
        let config = Arc::new(client::Config::default());

        let dial = client::connect(config, (host, port), ClientHandler);
        let mut handle = tokio::time::timeout(settings.dial_timeout, dial)
            .await
            .map_err(|_| SshError::Dial {
                host: host.to_string(),
                reason: format!(
                    "timed out after {}",
                    humantime::format_duration(settings.dial_timeout)
                ),
            })?
            .map_err(|err| SshError::Dial {
                host: host.to_string(),
                reason: err.to_string(),
            })?;

        authenticate(&mut handle, &settings.user, host).await?;
        Ok(SshConnection { handle })
    }
}

/// Try every agent identity until the remote accepts one.
async fn authenticate(
    handle: &mut client::Handle<ClientHandler>,
    user: &str,
    host: &str,
) -> SshResult<()> {
    let mut agent = AgentClient::connect_env()
        .await
        .map_err(|err| SshError::Agent(err.to_string()))?;
    let identities = agent
        .request_identities()
        .await
        .map_err(|err| SshError::Agent(err.to_string()))?;

    for key in identities {
        let auth = handle
            .authenticate_publickey_with(user, key, None, &mut agent)
            .await
            .map_err(|err| SshError::Session {
                host: host.to_string(),
                reason: err.to_string(),
            })?;
        if auth.success() {
            return Ok(());
        }
    }

    Err(SshError::Auth {
        user: user.to_string(),
        host: host.to_string(),
    })
}

/// Live russh connection; each [`Connection::exec`] opens its own channel.
pub struct SshConnection {
    handle: client::Handle<ClientHandler>,
}

#[async_trait]
impl Connection for SshConnection {
    async fn exec(
        &mut self,
        command: &str,
        host: &str,
        attempt: u32,
        log: &OutputLog,
    ) -> SshResult<()> {
        let mut channel =
            self.handle
                .channel_open_session()
                .await
                .map_err(|err| SshError::Session {
                    host: host.to_string(),
                    reason: err.to_string(),
                })?;
        channel
            .exec(true, command)
            .await
            .map_err(|err| SshError::Session {
                host: host.to_string(),
                reason: err.to_string(),
            })?;

        let mut stdout = LineBuffer::default();
        let mut stderr = LineBuffer::default();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => {
                    for line in stdout.push(data) {
                        log.stdout_line(host, &line);
                    }
                }
                ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                    for line in stderr.push(data) {
                        log.stderr_line(host, attempt, &line);
                    }
                }
                ChannelMsg::ExitStatus { exit_status: code } => {
                    exit_status = Some(code);
                }
                _ => {}
            }
        }

        for line in stdout.finish() {
            log.stdout_line(host, &line);
        }
        for line in stderr.finish() {
            log.stderr_line(host, attempt, &line);
        }

        match exit_status {
            Some(0) | None => Ok(()),
            Some(status) => Err(SshError::CommandFailed {
                command: command.to_string(),
                status,
            }),
        }
    }

    async fn close(&mut self) {
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
    }
}

/// Re-assembles byte chunks into whole lines. A trailing fragment without a
/// newline is held back until [`LineBuffer::finish`].
#[derive(Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    fn finish(&mut self) -> Vec<String> {
        if self.buf.is_empty() {
            return Vec::new();
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        vec![line]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_at_newlines() {
        let mut buf = LineBuffer::default();
        assert_eq!(buf.push(b"hello\nwor"), vec!["hello"]);
        assert_eq!(buf.push(b"ld\n"), vec!["world"]);
        assert!(buf.finish().is_empty());
    }

    #[test]
    fn crlf_is_stripped() {
        let mut buf = LineBuffer::default();
        assert_eq!(buf.push(b"one\r\ntwo\r\n"), vec!["one", "two"]);
    }

    #[test]
    fn trailing_fragment_surfaces_on_finish() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"no newline").is_empty());
        assert_eq!(buf.finish(), vec!["no newline"]);
    }

    #[test]
    fn empty_lines_are_preserved() {
        let mut buf = LineBuffer::default();
        assert_eq!(buf.push(b"\n\n"), vec!["", ""]);
    }
}
