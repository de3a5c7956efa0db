//! Local process execution backend.
//!
//! Runs the iptables / traffic-control vocabulary as direct child
//! processes on the host the engine runs on.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::backend::{first_stderr_fragment, qdisc_already_absent, CommandBackend};
use crate::endpoint::NetworkState;
use crate::error::{BarricadeError, Result};

/// Default per-command deadline.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Backend that executes commands as local child processes.
///
/// # Example
///
/// ```ignore
/// use barricade::backend::LocalBackend;
///
/// let backend = LocalBackend::new();
/// let lines = backend.iptables_output(&["-L", "FORWARD"]).await?;
/// ```
#[derive(Debug, Clone)]
pub struct LocalBackend {
    /// Deadline applied to every dispatched command.
    command_timeout: Duration,
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBackend {
    /// Creates a local backend with the default command timeout.
    pub fn new() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Sets the per-command deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Runs a command to completion, capturing stdout and stderr.
    async fn run(&self, program: &str, args: &[&str]) -> Result<std::process::Output> {
        let rendered = render_command(program, args);
        debug!(command = %rendered, "executing command");

        // kill_on_drop reaps the child when the deadline abandons it.
        let output = tokio::time::timeout(
            self.command_timeout,
            Command::new(program).args(args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| BarricadeError::timeout(&rendered))??;

        Ok(output)
    }

    /// Runs a command and maps non-zero exit to `CommandFailed`.
    async fn run_checked(&self, program: &str, args: &[&str]) -> Result<std::process::Output> {
        let output = self.run(program, args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BarricadeError::command_failed(
                render_command(program, args),
                first_stderr_fragment(&stderr),
            ));
        }
        Ok(output)
    }
}

/// Renders a command line for diagnostics.
fn render_command(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

#[async_trait]
impl CommandBackend for LocalBackend {
    async fn iptables_output(&self, args: &[&str]) -> Result<Vec<String>> {
        // -n keeps listings numeric so source columns are plain addresses.
        let mut full = vec!["-n"];
        full.extend_from_slice(args);
        let output = self.run_checked("iptables", &full).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.split('\n').map(str::to_string).collect())
    }

    async fn iptables(&self, args: &[&str]) -> Result<()> {
        self.run_checked("iptables", args).await?;
        Ok(())
    }

    async fn qdisc_replace(&self, device: &str, params: &[&str]) -> Result<()> {
        let mut args = vec!["qdisc", "replace", "dev", device, "root", "netem"];
        args.extend_from_slice(params);
        self.run_checked("tc", &args).await?;
        Ok(())
    }

    async fn qdisc_remove(&self, device: &str) -> Result<()> {
        let args = ["qdisc", "del", "dev", device, "root"];
        let output = self.run("tc", &args).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if qdisc_already_absent(&stderr) {
            debug!(device, "no discipline present, nothing to remove");
            return Ok(());
        }
        Err(BarricadeError::command_failed(
            render_command("tc", &args),
            first_stderr_fragment(&stderr),
        ))
    }

    async fn qdisc_state(&self, device: &str) -> NetworkState {
        let args = ["qdisc", "show", "dev", device];
        match self.run_checked("tc", &args).await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                NetworkState::from_qdisc_output(&stdout)
            }
            Err(error) => {
                warn!(device, %error, "failed to query device state");
                NetworkState::Unknown
            }
        }
    }
}
