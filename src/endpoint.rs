//! Endpoint and partition value types.
//!
//! Endpoints are owned by the surrounding container-lifecycle layer; the
//! engine treats them as read-mostly values passed in per call and only
//! reads their IP addresses for rule targets.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Observed network quality of an endpoint's device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NetworkState {
    /// No shaping discipline is installed.
    Normal,
    /// A delay (latency) discipline is installed.
    Slow,
    /// A loss discipline is installed.
    Flaky,
    /// The device state could not be determined.
    Unknown,
}

impl NetworkState {
    /// Classifies a `tc qdisc show dev <device>` output.
    ///
    /// The delay marker is checked before the loss marker so a discipline
    /// combining both resolves deterministically toward [`Slow`].
    ///
    /// [`Slow`]: NetworkState::Slow
    pub fn from_qdisc_output(output: &str) -> Self {
        if output.contains(" delay ") {
            NetworkState::Slow
        } else if output.contains(" loss ") {
            NetworkState::Flaky
        } else {
            NetworkState::Normal
        }
    }
}

impl std::fmt::Display for NetworkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NetworkState::Normal => "NORMAL",
            NetworkState::Slow => "SLOW",
            NetworkState::Flaky => "FLAKY",
            NetworkState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// One addressable fault-injection target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique, caller-assigned name.
    pub name: String,

    /// IP address, if known. Endpoints without an address are skipped by
    /// partitioning and shaping, never errored on.
    pub ip_address: Option<IpAddr>,

    /// Last observed shaping state.
    #[serde(default = "default_network_state")]
    pub network_state: NetworkState,

    /// Current 1-based partition index, `None` when unpartitioned.
    #[serde(default)]
    pub partition: Option<usize>,
}

fn default_network_state() -> NetworkState {
    NetworkState::Normal
}

impl Endpoint {
    /// Creates an endpoint with no known address.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip_address: None,
            network_state: NetworkState::Normal,
            partition: None,
        }
    }

    /// Creates an endpoint with a known address.
    pub fn with_ip(name: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            ip_address: Some(ip),
            ..Self::new(name)
        }
    }

    /// Sets the partition index.
    pub fn with_partition(mut self, index: usize) -> Self {
        self.partition = Some(index);
        self
    }
}

/// An ordered group of endpoints that may communicate with each other but
/// not with endpoints outside the group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    endpoints: Vec<Endpoint>,
}

impl Partition {
    /// Creates a partition from the given endpoints.
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints }
    }

    /// Iterates the member endpoints in order.
    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    /// Returns the number of member endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Returns true if the partition has no members.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl From<Vec<Endpoint>> for Partition {
    fn from(endpoints: Vec<Endpoint>) -> Self {
        Self::new(endpoints)
    }
}

impl<'a> IntoIterator for &'a Partition {
    type Item = &'a Endpoint;
    type IntoIter = std::slice::Iter<'a, Endpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.endpoints.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_classify_delay_before_loss() {
        let combined = "qdisc netem 8001: root refcnt 2 limit 1000 delay 75ms loss 30%";
        assert_eq!(
            NetworkState::from_qdisc_output(combined),
            NetworkState::Slow
        );
    }

    #[test]
    fn test_classify_loss() {
        let output = "qdisc netem 8001: root refcnt 2 limit 1000 loss 30%";
        assert_eq!(NetworkState::from_qdisc_output(output), NetworkState::Flaky);
    }

    #[test]
    fn test_classify_normal() {
        let output = "qdisc pfifo_fast 0: root refcnt 2 bands 3";
        assert_eq!(
            NetworkState::from_qdisc_output(output),
            NetworkState::Normal
        );
    }

    #[test]
    fn test_markers_require_surrounding_spaces() {
        // A device or qdisc name containing the bare word must not match.
        let output = "qdisc fq_codel 0: root refcnt 2 target 5ms interval 100ms memory_limit 32Mb";
        assert_eq!(
            NetworkState::from_qdisc_output(output),
            NetworkState::Normal
        );
    }

    #[test]
    fn test_endpoint_constructors() {
        let e = Endpoint::new("c1");
        assert!(e.ip_address.is_none());
        assert_eq!(e.network_state, NetworkState::Normal);
        assert!(e.partition.is_none());

        let e = Endpoint::with_ip("c2", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
            .with_partition(2);
        assert_eq!(e.ip_address, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert_eq!(e.partition, Some(2));
    }

    #[test]
    fn test_network_state_display() {
        assert_eq!(NetworkState::Normal.to_string(), "NORMAL");
        assert_eq!(NetworkState::Unknown.to_string(), "UNKNOWN");
    }

    #[test]
    fn test_partition_from_vec() {
        let p: Partition = vec![Endpoint::new("a"), Endpoint::new("b")].into();
        assert_eq!(p.len(), 2);
        assert!(!p.is_empty());
        assert_eq!(p.iter().count(), 2);
    }
}
