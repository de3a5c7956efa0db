//! In-memory command backend modeling iptables chain/rule state and
//! per-device queueing disciplines, with bit-exact listing shapes.

// Each integration test binary compiles its own copy and uses a subset.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use barricade::{BarricadeError, CommandBackend, NetworkState, Result};

#[derive(Debug, Clone)]
pub struct Rule {
    pub target: String,
    pub source: String,
    pub dest: String,
}

#[derive(Debug)]
struct Chain {
    name: String,
    builtin: bool,
    rules: Vec<Rule>,
}

#[derive(Debug, Default)]
struct FirewallState {
    chains: Vec<Chain>,
    qdiscs: HashMap<String, String>,
}

/// Fake backend: a small model of the kernel's firewall and traffic
/// control state that speaks the same command vocabulary and output
/// shapes as the real tools.
pub struct FakeBackend {
    state: Mutex<FirewallState>,
    tc_failing: AtomicBool,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        let state = FirewallState {
            chains: vec![Chain {
                name: "FORWARD".to_string(),
                builtin: true,
                rules: Vec::new(),
            }],
            qdiscs: HashMap::new(),
        };
        Self {
            state: Mutex::new(state),
            tc_failing: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent tc query fail, for UNKNOWN-state tests.
    pub fn set_tc_failing(&self, failing: bool) {
        self.tc_failing.store(failing, Ordering::SeqCst);
    }

    pub fn has_chain(&self, name: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.chains.iter().any(|c| c.name == name)
    }

    pub fn rules_of(&self, chain: &str) -> Vec<Rule> {
        let state = self.state.lock().unwrap();
        state
            .chains
            .iter()
            .find(|c| c.name == chain)
            .map(|c| c.rules.clone())
            .unwrap_or_default()
    }

    pub fn qdisc_of(&self, device: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.qdiscs.get(device).cloned()
    }

    fn failed(args: &[&str], reason: &str) -> BarricadeError {
        BarricadeError::command_failed(format!("iptables {}", args.join(" ")), reason)
    }
}

impl FirewallState {
    fn chain(&self, name: &str) -> Option<&Chain> {
        self.chains.iter().find(|c| c.name == name)
    }

    fn chain_mut(&mut self, name: &str) -> Option<&mut Chain> {
        self.chains.iter_mut().find(|c| c.name == name)
    }

    fn references_to(&self, name: &str) -> usize {
        self.chains
            .iter()
            .flat_map(|c| &c.rules)
            .filter(|r| r.target == name)
            .count()
    }

    fn render_chain(&self, chain: &Chain) -> Vec<String> {
        let heading = if chain.builtin {
            format!("Chain {} (policy ACCEPT)", chain.name)
        } else {
            format!(
                "Chain {} ({} references)",
                chain.name,
                self.references_to(&chain.name)
            )
        };

        let mut lines = vec![
            heading,
            "target     prot opt source               destination".to_string(),
        ];
        for rule in &chain.rules {
            lines.push(format!(
                "{:<10} {:<4} {:<3} {:<20} {}",
                rule.target, "all", "--", rule.source, rule.dest
            ));
        }
        lines
    }
}

#[async_trait]
impl CommandBackend for FakeBackend {
    async fn iptables_output(&self, args: &[&str]) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        match args {
            ["-L"] => {
                let mut lines = Vec::new();
                for chain in &state.chains {
                    lines.extend(state.render_chain(chain));
                    lines.push(String::new());
                }
                Ok(lines)
            }
            ["-L", name] => {
                let chain = state
                    .chain(name)
                    .ok_or_else(|| Self::failed(args, "No chain/target/match by that name."))?;
                let mut lines = state.render_chain(chain);
                lines.push(String::new());
                Ok(lines)
            }
            _ => Err(Self::failed(args, "unsupported listing")),
        }
    }

    async fn iptables(&self, args: &[&str]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match args {
            ["-N", name] => {
                if state.chain(name).is_some() {
                    return Err(Self::failed(args, "Chain already exists."));
                }
                state.chains.push(Chain {
                    name: (*name).to_string(),
                    builtin: false,
                    rules: Vec::new(),
                });
                Ok(())
            }
            ["-D", name, position] => {
                let position: usize = position
                    .parse()
                    .map_err(|_| Self::failed(args, "Bad rule number"))?;
                let chain = state
                    .chain_mut(name)
                    .ok_or_else(|| Self::failed(args, "No chain/target/match by that name."))?;
                if position == 0 || position > chain.rules.len() {
                    return Err(Self::failed(args, "Index of deletion too big."));
                }
                chain.rules.remove(position - 1);
                Ok(())
            }
            ["-F", name] => {
                let chain = state
                    .chain_mut(name)
                    .ok_or_else(|| Self::failed(args, "No chain/target/match by that name."))?;
                chain.rules.clear();
                Ok(())
            }
            ["-X", name] => {
                let chain = state
                    .chain(name)
                    .ok_or_else(|| Self::failed(args, "No chain/target/match by that name."))?;
                if chain.builtin {
                    return Err(Self::failed(args, "Can't delete built-in chain."));
                }
                if !chain.rules.is_empty() {
                    return Err(Self::failed(args, "Directory not empty."));
                }
                if state.references_to(name) > 0 {
                    return Err(Self::failed(args, "Too many links."));
                }
                state.chains.retain(|c| c.name != *name);
                Ok(())
            }
            ["-I", name, rest @ ..] => {
                let mut source = None;
                let mut dest = None;
                let mut target = None;
                let mut words = rest.iter();
                while let Some(flag) = words.next() {
                    let value = words
                        .next()
                        .ok_or_else(|| Self::failed(args, "option requires an argument"))?;
                    match *flag {
                        "-s" => source = Some((*value).to_string()),
                        "-d" => dest = Some((*value).to_string()),
                        "-j" => target = Some((*value).to_string()),
                        _ => return Err(Self::failed(args, "unknown option")),
                    }
                }
                let target =
                    target.ok_or_else(|| Self::failed(args, "-j is required"))?;
                if target != "DROP"
                    && target != "ACCEPT"
                    && state.chain(&target).is_none()
                {
                    return Err(Self::failed(args, "No chain/target/match by that name."));
                }
                let rule = Rule {
                    target,
                    source: source.unwrap_or_else(|| "0.0.0.0/0".to_string()),
                    dest: dest.unwrap_or_else(|| "0.0.0.0/0".to_string()),
                };
                let chain = state
                    .chain_mut(name)
                    .ok_or_else(|| Self::failed(args, "No chain/target/match by that name."))?;
                // -I without a position inserts at the head.
                chain.rules.insert(0, rule);
                Ok(())
            }
            _ => Err(Self::failed(args, "unsupported command")),
        }
    }

    async fn qdisc_replace(&self, device: &str, params: &[&str]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.qdiscs.insert(device.to_string(), params.join(" "));
        Ok(())
    }

    async fn qdisc_remove(&self, device: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        // Removal of an absent discipline is already idempotent success
        // at the trait contract level.
        state.qdiscs.remove(device);
        Ok(())
    }

    async fn qdisc_state(&self, device: &str) -> NetworkState {
        if self.tc_failing.load(Ordering::SeqCst) {
            return NetworkState::Unknown;
        }
        let state = self.state.lock().unwrap();
        let output = match state.qdiscs.get(device) {
            Some(params) => format!("qdisc netem 8001: root refcnt 2 limit 1000 {params} "),
            None => "qdisc pfifo_fast 0: root refcnt 2 bands 3".to_string(),
        };
        NetworkState::from_qdisc_output(&output)
    }
}
