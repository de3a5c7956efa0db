//! Remote SSH execution backend.
//!
//! One authenticated session is established per remote host and reused
//! for every command in the fault-injection session. Each command is
//! serialized to a single shell line, prefixed with a privilege-elevation
//! token, and executed on a one-shot exec channel; a failed command never
//! tears the session down, so subsequent commands keep working.

use std::io::Read;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ssh2::Session;
use tracing::{debug, info, warn};

use crate::backend::{first_stderr_fragment, qdisc_already_absent, CommandBackend, SUDO};
use crate::endpoint::NetworkState;
use crate::error::{BarricadeError, Result};

/// Default per-command deadline for remote execution.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials and address of a remote execution target.
///
/// The host is treated as pre-existing and reachable; provisioning it is
/// out of scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteHost {
    /// Hostname or IP address.
    pub host: String,

    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// User to authenticate as.
    pub user: String,

    /// Path to the private key file.
    pub private_key: PathBuf,
}

fn default_port() -> u16 {
    22
}

impl RemoteHost {
    /// Creates a remote host description with the default SSH port.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        private_key: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: user.into(),
            private_key: private_key.into(),
        }
    }

    /// Sets the SSH port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Captured result of one remote command.
struct Exchange {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

/// Backend that executes commands over a persistent SSH session.
pub struct SshBackend {
    session: Arc<Mutex<Session>>,
    host: RemoteHost,
    command_timeout: Duration,
}

impl SshBackend {
    /// Connects and authenticates to the remote host.
    pub async fn connect(host: RemoteHost) -> Result<Self> {
        Self::connect_with_timeout(host, DEFAULT_COMMAND_TIMEOUT).await
    }

    /// Connects with a custom per-command deadline.
    pub async fn connect_with_timeout(host: RemoteHost, timeout: Duration) -> Result<Self> {
        let target = host.clone();
        let session = tokio::task::spawn_blocking(move || -> Result<Session> {
            let tcp = TcpStream::connect(target.address())?;
            let mut session = Session::new().map_err(|e| ssh_failure(&target, e))?;
            session.set_tcp_stream(tcp);
            session.handshake().map_err(|e| ssh_failure(&target, e))?;
            session
                .userauth_pubkey_file(&target.user, None, &target.private_key, None)
                .map_err(|e| ssh_failure(&target, e))?;
            // Bound every channel exchange so a hung remote command cannot
            // pin the blocking worker forever.
            session.set_timeout(timeout_millis(timeout));
            Ok(session)
        })
        .await
        .map_err(|e| BarricadeError::command_failed("ssh connect", e.to_string()))??;

        info!(host = %host.host, port = host.port, user = %host.user, "connected to remote host");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            host,
            command_timeout: timeout,
        })
    }

    /// Executes one shell line on a fresh exec channel of the persistent
    /// session and captures the full exchange.
    async fn exec(&self, line: String) -> Result<Exchange> {
        debug!(host = %self.host.host, command = %line, "executing remote command");

        let session = Arc::clone(&self.session);
        let command = line.clone();
        let task = tokio::task::spawn_blocking(move || -> Result<Exchange> {
            // A poisoned lock still holds a usable session.
            let session = session.lock().unwrap_or_else(|p| p.into_inner());
            let mut channel = session
                .channel_session()
                .map_err(|e| BarricadeError::command_failed(&command, e.to_string()))?;
            channel
                .exec(&command)
                .map_err(|e| BarricadeError::command_failed(&command, e.to_string()))?;

            let mut stdout = String::new();
            channel.read_to_string(&mut stdout)?;
            let mut stderr = String::new();
            channel.stderr().read_to_string(&mut stderr)?;

            channel
                .wait_close()
                .map_err(|e| BarricadeError::command_failed(&command, e.to_string()))?;
            let exit_code = channel
                .exit_status()
                .map_err(|e| BarricadeError::command_failed(&command, e.to_string()))?;

            Ok(Exchange {
                stdout,
                stderr,
                exit_code,
            })
        });

        tokio::time::timeout(self.command_timeout, task)
            .await
            .map_err(|_| BarricadeError::timeout(&line))?
            .map_err(|e| BarricadeError::command_failed(&line, e.to_string()))?
    }

    /// Executes one shell line and maps non-zero exit to `CommandFailed`.
    async fn exec_checked(&self, line: String) -> Result<Exchange> {
        let exchange = self.exec(line.clone()).await?;
        if exchange.exit_code != 0 {
            return Err(BarricadeError::command_failed(
                line,
                first_stderr_fragment(&exchange.stderr),
            ));
        }
        Ok(exchange)
    }
}

fn ssh_failure(host: &RemoteHost, err: ssh2::Error) -> BarricadeError {
    BarricadeError::command_failed(
        format!("ssh {}@{}", host.user, host.address()),
        err.to_string(),
    )
}

/// Converts a deadline to the millisecond resolution the session-level
/// timeout takes, saturating instead of truncating oversized durations.
fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

/// Serializes a command to one sudo-prefixed shell line.
fn shell_line(words: &[&str]) -> String {
    let mut line = String::from(SUDO);
    for word in words {
        line.push(' ');
        line.push_str(word);
    }
    line
}

#[async_trait]
impl CommandBackend for SshBackend {
    async fn iptables_output(&self, args: &[&str]) -> Result<Vec<String>> {
        let mut words = vec!["iptables", "-n"];
        words.extend_from_slice(args);
        let exchange = self.exec_checked(shell_line(&words)).await?;
        Ok(exchange.stdout.split('\n').map(str::to_string).collect())
    }

    async fn iptables(&self, args: &[&str]) -> Result<()> {
        let mut words = vec!["iptables"];
        words.extend_from_slice(args);
        self.exec_checked(shell_line(&words)).await?;
        Ok(())
    }

    async fn qdisc_replace(&self, device: &str, params: &[&str]) -> Result<()> {
        let mut words = vec!["tc", "qdisc", "replace", "dev", device, "root", "netem"];
        words.extend_from_slice(params);
        self.exec_checked(shell_line(&words)).await?;
        Ok(())
    }

    async fn qdisc_remove(&self, device: &str) -> Result<()> {
        let line = shell_line(&["tc", "qdisc", "del", "dev", device, "root"]);
        let exchange = self.exec(line.clone()).await?;
        if exchange.exit_code == 0 {
            return Ok(());
        }
        if qdisc_already_absent(&exchange.stderr) {
            debug!(device, "no discipline present, nothing to remove");
            return Ok(());
        }
        Err(BarricadeError::command_failed(
            line,
            first_stderr_fragment(&exchange.stderr),
        ))
    }

    async fn qdisc_state(&self, device: &str) -> NetworkState {
        let line = shell_line(&["tc", "qdisc", "show", "dev", device]);
        match self.exec(line).await {
            Ok(exchange) if exchange.exit_code == 0 => {
                NetworkState::from_qdisc_output(&exchange.stdout)
            }
            Ok(_) | Err(_) => {
                warn!(host = %self.host.host, device, "failed to query device state");
                NetworkState::Unknown
            }
        }
    }
}
