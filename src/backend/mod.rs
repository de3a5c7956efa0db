//! Command-execution backends.
//!
//! A [`CommandBackend`] executes the iptables / traffic-control command
//! vocabulary against a target and reports captured output or a
//! structured failure. It has no knowledge of partitioning semantics, so
//! identical fault-injection logic runs against either implementation:
//!
//! - [`LocalBackend`]: direct process execution on the local host
//! - [`SshBackend`]: one-shot invocations over a persistent SSH session

mod local;
mod remote;

pub use local::LocalBackend;
pub use remote::{RemoteHost, SshBackend};

use std::sync::Arc;

use async_trait::async_trait;

use crate::endpoint::NetworkState;
use crate::error::Result;

/// Privilege-elevation prefix for remote command lines.
pub(crate) const SUDO: &str = "sudo";

/// Capability set for executing fault-injection commands on a target.
///
/// All operations are side-effecting on kernel networking state and block
/// until the underlying process or channel exchange completes. One command
/// is in flight at a time per engine instance.
#[async_trait]
pub trait CommandBackend: Send + Sync {
    /// Runs a firewall sub-command and returns its captured standard
    /// output as lines.
    ///
    /// Non-zero exit raises [`CommandFailed`] carrying the command and the
    /// first stderr fragment.
    ///
    /// [`CommandFailed`]: crate::BarricadeError::CommandFailed
    async fn iptables_output(&self, args: &[&str]) -> Result<Vec<String>>;

    /// Runs a firewall sub-command for its exit status only.
    async fn iptables(&self, args: &[&str]) -> Result<()>;

    /// Replaces the root queueing discipline on a device with a netem
    /// discipline built from `params`.
    ///
    /// Replacement semantics make repeated calls idempotent overwrites,
    /// never additive.
    async fn qdisc_replace(&self, device: &str, params: &[&str]) -> Result<()>;

    /// Removes the root queueing discipline from a device.
    ///
    /// Succeeds whether or not a discipline was present: a failure whose
    /// stderr matches [`qdisc_already_absent`] is treated as success.
    async fn qdisc_remove(&self, device: &str) -> Result<()>;

    /// Queries the current shaping state of a device.
    ///
    /// Never errors; any backend failure degrades to
    /// [`NetworkState::Unknown`].
    async fn qdisc_state(&self, device: &str) -> NetworkState;
}

/// A shared backend for dynamic dispatch.
pub type SharedBackend = Arc<dyn CommandBackend>;

/// Classifies a failed `qdisc del` as "the device already had no
/// discipline" from its stderr.
///
/// Removing shaping from an already-normal device is idempotent, not an
/// error. The kernel reports the absent discipline with one of two
/// fragments depending on whether the qdisc or the device itself is
/// missing; anything else is a real failure.
pub fn qdisc_already_absent(stderr: &str) -> bool {
    stderr.contains("No such file or directory") || stderr.contains("Cannot find device")
}

/// Extracts the first non-empty stderr line for error diagnostics.
pub(crate) fn first_stderr_fragment(stderr: &str) -> String {
    stderr
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("(no stderr)")
        .trim()
        .to_string()
}
