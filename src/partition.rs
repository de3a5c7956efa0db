//! Partitioning engine.
//!
//! Translates an ordered grouping of endpoints into iptables chains and
//! rules: traffic from any partition member destined to any non-member is
//! dropped, traffic to fellow members or to addresses outside all
//! partitions falls through unaffected.
//!
//! Every chain the engine creates is named `<session-id>-p<index>` and
//! deletion only ever targets names matching that pattern, so concurrent
//! sessions and the host's own firewall configuration are never disturbed.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::backend::SharedBackend;
use crate::endpoint::Partition;
use crate::error::{BarricadeError, Result};

/// The chain evaluated for traffic routed through the host.
pub const FORWARD_CHAIN: &str = "FORWARD";

/// Builds the chain name for a 1-based partition index.
pub fn partition_chain_name(session_id: &str, index: usize) -> String {
    format!("{session_id}-p{index}")
}

/// Extracts the partition index from a session-owned chain name.
///
/// Returns `None` for chains belonging to other sessions or to the host.
pub fn parse_partition_index(session_id: &str, chain: &str) -> Option<usize> {
    let prefix = format!("{session_id}-p");
    chain.strip_prefix(&prefix)?.parse().ok()
}

/// Computes and applies the firewall rule sets that realize a desired
/// grouping of endpoints into isolated partitions.
///
/// The engine holds no state beyond the backend: current membership is
/// always re-derivable by inspecting the forwarding chain with
/// [`read_partitions`](PartitionEngine::read_partitions).
pub struct PartitionEngine {
    backend: SharedBackend,
}

impl PartitionEngine {
    /// Creates an engine over the given backend.
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Removes every rule and chain owned by the session.
    ///
    /// Session rules are deleted from the forwarding chain first; only
    /// then are the session chains flushed and deleted, since a chain
    /// referenced by any remaining rule cannot be deleted. Both steps are
    /// no-ops when nothing matches.
    ///
    /// The forwarding chain is re-listed before every single deletion and
    /// only the last matching rule is removed, so rules inserted or
    /// removed by other processes between commands cannot misdirect a
    /// deletion. The window between one listing and one delete remains:
    /// the kernel firewall offers no positional compare-and-delete.
    pub async fn clear(&self, session_id: &str) -> Result<()> {
        require_session_id(session_id)?;
        self.delete_session_rules(session_id).await?;
        self.delete_session_chains(session_id).await?;
        info!(session_id, "partition state cleared");
        Ok(())
    }

    /// Installs chains and rules realizing the given partitions.
    ///
    /// Callers always `clear` first; this engine does not guard against a
    /// bare `apply`. Fewer than two partitions is a no-op (nothing to
    /// isolate). Endpoints without a known IP address are silently
    /// excluded from both rule roles.
    pub async fn apply(&self, session_id: &str, partitions: &[Partition]) -> Result<()> {
        require_session_id(session_id)?;
        if partitions.len() < 2 {
            debug!(session_id, "fewer than two partitions, nothing to isolate");
            return Ok(());
        }

        for (i, partition) in partitions.iter().enumerate() {
            let index = i + 1;
            let chain = partition_chain_name(session_id, index);

            // The new chain blocks everything this partition may not reach.
            self.create_chain(&chain).await?;
            for (j, other) in partitions.iter().enumerate() {
                if i == j {
                    continue;
                }
                for endpoint in other {
                    if let Some(ip) = endpoint.ip_address {
                        self.insert_rule(&chain, None, Some(&ip.to_string()), "DROP")
                            .await?;
                    }
                }
            }

            // Route traffic sourced from each member into the new chain.
            for endpoint in partition {
                if let Some(ip) = endpoint.ip_address {
                    self.insert_rule(FORWARD_CHAIN, Some(&ip.to_string()), None, &chain)
                        .await?;
                }
            }

            info!(session_id, chain = %chain, members = partition.len(), "partition chain installed");
        }

        Ok(())
    }

    /// Reconstructs partition membership from the forwarding chain.
    ///
    /// Returns a map from source address to 1-based partition index, one
    /// entry per endpoint that was given a rule. Malformed or foreign rule
    /// lines are skipped.
    pub async fn read_partitions(&self, session_id: &str) -> Result<HashMap<String, usize>> {
        require_session_id(session_id)?;
        let rules = self.chain_rules(FORWARD_CHAIN).await?;

        let mut members = HashMap::new();
        for line in &rules {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                continue;
            }
            let Some(index) = parse_partition_index(session_id, parts[0]) else {
                continue;
            };
            members.insert(parts[3].to_string(), index);
        }
        Ok(members)
    }

    /// Lists a chain's rules, validating the two-line listing header.
    async fn chain_rules(&self, chain: &str) -> Result<Vec<String>> {
        if chain.is_empty() {
            return Err(BarricadeError::invalid_argument("invalid chain"));
        }
        let lines = self.backend.iptables_output(&["-L", chain]).await?;
        if lines.len() < 2 {
            return Err(BarricadeError::unexpected_output(&lines));
        }

        let (chain_line, header_line) = (&lines[0], &lines[1]);
        if !(chain_line.starts_with(&format!("Chain {chain}")) && header_line.starts_with("target"))
        {
            return Err(BarricadeError::unexpected_output(&lines));
        }
        Ok(lines[2..].to_vec())
    }

    /// Deletes session-owned rules from the forwarding chain, one at a
    /// time, re-listing before each positional delete.
    async fn delete_session_rules(&self, session_id: &str) -> Result<()> {
        loop {
            let rules = self.chain_rules(FORWARD_CHAIN).await?;
            let position = rules.iter().enumerate().rev().find_map(|(idx, line)| {
                let target = line.split_whitespace().next()?;
                parse_partition_index(session_id, target)?;
                Some(idx + 1)
            });

            let Some(position) = position else {
                return Ok(());
            };
            debug!(session_id, position, "deleting forwarding rule");
            self.backend
                .iptables(&["-D", FORWARD_CHAIN, &position.to_string()])
                .await?;
        }
    }

    /// Flushes and deletes every session-owned chain.
    async fn delete_session_chains(&self, session_id: &str) -> Result<()> {
        let lines = self.backend.iptables_output(&["-L"]).await?;
        for line in &lines {
            let mut parts = line.split_whitespace();
            if parts.next() != Some("Chain") {
                continue;
            }
            let Some(chain) = parts.next() else {
                continue;
            };
            if parse_partition_index(session_id, chain).is_none() {
                continue;
            }
            debug!(session_id, chain, "deleting partition chain");
            self.backend.iptables(&["-F", chain]).await?;
            self.backend.iptables(&["-X", chain]).await?;
        }
        Ok(())
    }

    /// Creates a new chain.
    async fn create_chain(&self, chain: &str) -> Result<()> {
        if chain.is_empty() {
            return Err(BarricadeError::invalid_argument("invalid chain"));
        }
        self.backend.iptables(&["-N", chain]).await
    }

    /// Inserts a rule at the head of a chain.
    async fn insert_rule(
        &self,
        chain: &str,
        src: Option<&str>,
        dest: Option<&str>,
        target: &str,
    ) -> Result<()> {
        if chain.is_empty() {
            return Err(BarricadeError::invalid_argument("invalid chain"));
        }
        if target.is_empty() {
            return Err(BarricadeError::invalid_argument("invalid target"));
        }
        if src.is_none() && dest.is_none() {
            return Err(BarricadeError::invalid_argument("need src, dest, or both"));
        }

        let mut args = vec!["-I", chain];
        if let Some(src) = src {
            args.extend_from_slice(&["-s", src]);
        }
        if let Some(dest) = dest {
            args.extend_from_slice(&["-d", dest]);
        }
        args.extend_from_slice(&["-j", target]);
        self.backend.iptables(&args).await
    }
}

fn require_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() {
        return Err(BarricadeError::invalid_argument("invalid session id"));
    }
    Ok(())
}
