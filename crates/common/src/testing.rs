//! In-memory host for tests
//!
//! [`FakeHost`] implements [`CommandRunner`] by interpreting the `ip`, `wg`
//! and `iptables` invocations the command backend issues, keeping interface,
//! peer and chain state the way the kernel would report it back.

use crate::crypto::{generate_keypair, public_key_from_private};
use crate::runner::{command_line, CommandRunner};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
struct FakePeer {
    public_key: String,
    allowed_ips: Vec<String>,
    rx_bytes: u64,
    tx_bytes: u64,
    latest_handshake: i64,
}

#[derive(Debug, Clone)]
struct FakeInterface {
    up: bool,
    address: Option<String>,
    mtu: u32,
    listen_port: u32,
    private_key: Option<String>,
    public_key: Option<String>,
    peers: Vec<FakePeer>,
}

impl Default for FakeInterface {
    fn default() -> Self {
        Self {
            up: false,
            address: None,
            mtu: 1420,
            listen_port: 0,
            private_key: None,
            public_key: None,
            peers: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct HostState {
    interfaces: BTreeMap<String, FakeInterface>,
    /// Chain name to `-A` rules in `iptables -S` form
    chains: BTreeMap<String, Vec<String>>,
    log: Vec<String>,
    failures: Vec<String>,
}

impl Default for HostState {
    fn default() -> Self {
        let mut chains = BTreeMap::new();
        for builtin in ["INPUT", "FORWARD", "OUTPUT"] {
            chains.insert(builtin.to_string(), Vec::new());
        }
        Self {
            interfaces: BTreeMap::new(),
            chains,
            log: Vec::new(),
            failures: Vec::new(),
        }
    }
}

/// Scripted stand-in for the host's network tooling
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command line run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub fn clear_commands(&self) {
        self.state.lock().log.clear();
    }

    /// Fail every later command whose line starts with `prefix`.
    pub fn fail_on(&self, prefix: &str) {
        self.state.lock().failures.push(prefix.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Add a configured, running interface that no store knows about.
    pub fn add_interface(&self, name: &str, address: &str, listen_port: u32) {
        let keys = generate_keypair();
        self.state.lock().interfaces.insert(
            name.to_string(),
            FakeInterface {
                up: true,
                address: Some(address.to_string()),
                listen_port,
                private_key: Some(keys.private_key),
                public_key: Some(keys.public_key),
                ..Default::default()
            },
        );
    }

    /// Add a peer directly to a live interface.
    pub fn add_peer(&self, interface: &str, public_key: &str, allowed_ips: &[&str]) {
        if let Some(iface) = self.state.lock().interfaces.get_mut(interface) {
            iface.peers.push(FakePeer {
                public_key: public_key.to_string(),
                allowed_ips: allowed_ips.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            });
        }
    }

    pub fn interface_names(&self) -> Vec<String> {
        self.state.lock().interfaces.keys().cloned().collect()
    }

    pub fn is_up(&self, interface: &str) -> Option<bool> {
        self.state.lock().interfaces.get(interface).map(|i| i.up)
    }

    pub fn public_key(&self, interface: &str) -> Option<String> {
        self.state
            .lock()
            .interfaces
            .get(interface)
            .and_then(|i| i.public_key.clone())
    }

    pub fn peer_ids(&self, interface: &str) -> Vec<String> {
        self.state
            .lock()
            .interfaces
            .get(interface)
            .map(|i| i.peers.iter().map(|p| p.public_key.clone()).collect())
            .unwrap_or_default()
    }

    pub fn peer_allowed_ips(&self, interface: &str, peer: &str) -> Option<Vec<String>> {
        let state = self.state.lock();
        let iface = state.interfaces.get(interface)?;
        iface
            .peers
            .iter()
            .find(|p| p.public_key == peer)
            .map(|p| p.allowed_ips.clone())
    }

    pub fn set_peer_counters(&self, interface: &str, peer: &str, rx_bytes: u64, tx_bytes: u64, handshake: i64) {
        let mut state = self.state.lock();
        let Some(iface) = state.interfaces.get_mut(interface) else {
            return;
        };
        if let Some(p) = iface.peers.iter_mut().find(|p| p.public_key == peer) {
            p.rx_bytes = rx_bytes;
            p.tx_bytes = tx_bytes;
            p.latest_handshake = handshake;
        }
    }

    /// `-A` rules of a chain; empty when the chain does not exist.
    pub fn chain_rules(&self, chain: &str) -> Vec<String> {
        self.state.lock().chains.get(chain).cloned().unwrap_or_default()
    }

    pub fn has_chain(&self, chain: &str) -> bool {
        self.state.lock().chains.contains_key(chain)
    }

    fn execute(&self, cancel: &CancellationToken, input: Option<&str>, program: &str, args: &[&str]) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let line = command_line(program, args);
        let mut state = self.state.lock();
        state.log.push(line.clone());

        if state.failures.iter().any(|prefix| line.starts_with(prefix.as_str())) {
            return Err(failure(&line, "injected failure"));
        }

        let outcome = match program {
            "ip" => ip(&mut state, args),
            "wg" => wg(&mut state, input, args),
            "iptables" => iptables(&mut state, args),
            _ => Err(format!("{}: command not found", program)),
        };
        outcome.map_err(|message| failure(&line, &message))
    }
}

fn failure(line: &str, message: &str) -> Error {
    Error::Command {
        command: line.to_string(),
        message: format!("exit status: 1: {}", message),
    }
}

type Outcome = std::result::Result<String, String>;

fn device<'a>(state: &'a mut HostState, name: &str) -> std::result::Result<&'a mut FakeInterface, String> {
    state
        .interfaces
        .get_mut(name)
        .ok_or_else(|| format!("Device \"{}\" does not exist.", name))
}

/// Value following `key` in `args`
fn arg<'a>(args: &[&'a str], key: &str) -> Option<&'a str> {
    args.iter().position(|a| *a == key).and_then(|i| args.get(i + 1).copied())
}

// ============================================================================
// ip
// ============================================================================

fn ip(state: &mut HostState, args: &[&str]) -> Outcome {
    match args {
        ["link", "add", "dev", name, "type", "wireguard"] => {
            if state.interfaces.contains_key(*name) {
                return Err("RTNETLINK answers: File exists".to_string());
            }
            state.interfaces.insert(name.to_string(), FakeInterface::default());
            Ok(String::new())
        }
        ["link", "delete", "dev", name] => {
            state
                .interfaces
                .remove(*name)
                .map(|_| String::new())
                .ok_or_else(|| format!("Cannot find device \"{}\"", name))
        }
        ["link", "set", "up", "dev", name] => {
            device(state, name)?.up = true;
            Ok(String::new())
        }
        ["link", "set", "down", "dev", name] => {
            device(state, name)?.up = false;
            Ok(String::new())
        }
        ["link", "set", "mtu", mtu, "dev", name] => {
            let mtu = mtu.parse().map_err(|_| format!("Error: invalid mtu \"{}\"", mtu))?;
            device(state, name)?.mtu = mtu;
            Ok(String::new())
        }
        ["address", "add", address, "dev", name] => {
            let iface = device(state, name)?;
            if iface.address.as_deref() == Some(*address) {
                return Err("RTNETLINK answers: File exists".to_string());
            }
            iface.address = Some(address.to_string());
            Ok(String::new())
        }
        ["address", "replace", address, "dev", name] => {
            device(state, name)?.address = Some(address.to_string());
            Ok(String::new())
        }
        ["-4", "addr", "show", "dev", name] => {
            let iface = device(state, name)?;
            let mut out = format!(
                "7: {}: <POINTOPOINT,NOARP{}> mtu {} qdisc noqueue state UNKNOWN group default qlen 1000",
                name,
                if iface.up { ",UP,LOWER_UP" } else { "" },
                iface.mtu
            );
            if let Some(address) = &iface.address {
                out.push_str(&format!(
                    "\n    inet {} scope global {}\n       valid_lft forever preferred_lft forever",
                    address, name
                ));
            }
            Ok(out)
        }
        ["link", "show", "dev", name] => {
            let iface = device(state, name)?;
            Ok(format!(
                "7: {}: <POINTOPOINT,NOARP{}> mtu {} qdisc noqueue state UNKNOWN mode DEFAULT group default qlen 1000\n    link/none",
                name,
                if iface.up { ",UP,LOWER_UP" } else { "" },
                iface.mtu
            ))
        }
        _ => Err(format!("unsupported ip invocation: {}", args.join(" "))),
    }
}

// ============================================================================
// wg
// ============================================================================

fn wg(state: &mut HostState, input: Option<&str>, args: &[&str]) -> Outcome {
    match args {
        ["genkey"] => Ok(generate_keypair().private_key),
        ["pubkey"] => public_key_from_private(input.unwrap_or_default()).map_err(|e| e.to_string()),
        ["show", "interfaces"] => Ok(state.interfaces.keys().cloned().collect::<Vec<_>>().join(" ")),
        ["show", name, what] => wg_show(state, name, what),
        ["showconf", name] => {
            let iface = wg_device(state, name)?;
            let mut out = String::from("[Interface]\n");
            if iface.listen_port != 0 {
                out.push_str(&format!("ListenPort = {}\n", iface.listen_port));
            }
            if let Some(key) = &iface.private_key {
                out.push_str(&format!("PrivateKey = {}\n", key));
            }
            for peer in &iface.peers {
                out.push_str(&format!(
                    "\n[Peer]\nPublicKey = {}\nAllowedIPs = {}\n",
                    peer.public_key,
                    peer.allowed_ips.join(", ")
                ));
            }
            Ok(out.trim_end().to_string())
        }
        ["set", name, rest @ ..] => wg_set(state, input, name, rest),
        _ => Err(format!("unsupported wg invocation: {}", args.join(" "))),
    }
}

fn wg_device<'a>(state: &'a mut HostState, name: &str) -> std::result::Result<&'a mut FakeInterface, String> {
    state
        .interfaces
        .get_mut(name)
        .ok_or_else(|| "Unable to access interface: No such device".to_string())
}

fn wg_show(state: &mut HostState, name: &str, what: &str) -> Outcome {
    let iface = wg_device(state, name)?;
    let out = match what {
        "public-key" => iface.public_key.clone().unwrap_or_else(|| "(none)".to_string()),
        "listen-port" => iface.listen_port.to_string(),
        "peers" => iface
            .peers
            .iter()
            .map(|p| p.public_key.clone())
            .collect::<Vec<_>>()
            .join("\n"),
        "allowed-ips" => iface
            .peers
            .iter()
            .map(|p| {
                let ips = if p.allowed_ips.is_empty() {
                    "(none)".to_string()
                } else {
                    p.allowed_ips.join(" ")
                };
                format!("{}\t{}", p.public_key, ips)
            })
            .collect::<Vec<_>>()
            .join("\n"),
        "transfer" => iface
            .peers
            .iter()
            .map(|p| format!("{}\t{}\t{}", p.public_key, p.rx_bytes, p.tx_bytes))
            .collect::<Vec<_>>()
            .join("\n"),
        "latest-handshakes" => iface
            .peers
            .iter()
            .map(|p| format!("{}\t{}", p.public_key, p.latest_handshake))
            .collect::<Vec<_>>()
            .join("\n"),
        other => return Err(format!("Invalid show command: `{}'", other)),
    };
    Ok(out)
}

fn wg_set(state: &mut HostState, input: Option<&str>, name: &str, mut rest: &[&str]) -> Outcome {
    let iface = wg_device(state, name)?;
    while let [key, tail @ ..] = rest {
        match (*key, tail) {
            ("private-key", [_path, more @ ..]) => {
                let private = input.unwrap_or_default().trim().to_string();
                let public = public_key_from_private(&private).map_err(|e| e.to_string())?;
                iface.private_key = Some(private);
                iface.public_key = Some(public);
                rest = more;
            }
            ("listen-port", [port, more @ ..]) => {
                iface.listen_port = port.parse().map_err(|_| format!("Invalid port: `{}'", port))?;
                rest = more;
            }
            ("peer", [public_key, more @ ..]) => {
                match more {
                    ["remove", ..] => {
                        iface.peers.retain(|p| p.public_key != *public_key);
                    }
                    _ => {
                        let allowed: Vec<String> = arg(more, "allowed-ips")
                            .map(|list| {
                                list.split(',')
                                    .map(|s| s.trim().to_string())
                                    .filter(|s| !s.is_empty())
                                    .collect()
                            })
                            .unwrap_or_default();
                        match iface.peers.iter_mut().find(|p| p.public_key == *public_key) {
                            Some(peer) => peer.allowed_ips = allowed,
                            None => iface.peers.push(FakePeer {
                                public_key: public_key.to_string(),
                                allowed_ips: allowed,
                                ..Default::default()
                            }),
                        }
                    }
                }
                return Ok(String::new());
            }
            _ => return Err(format!("Invalid argument: {}", key)),
        }
    }
    Ok(String::new())
}

// ============================================================================
// iptables
// ============================================================================

const RULE_ORDER: [&str; 6] = ["-s", "-d", "-i", "-o", "-p", "-j"];

/// Render a rule spec the way `iptables -S` prints it.
fn canonical_rule(chain: &str, spec: &[&str]) -> std::result::Result<String, String> {
    let mut options: Vec<(&str, String)> = Vec::new();
    for pair in spec.chunks(2) {
        let [flag, value] = pair else {
            return Err("Bad argument".to_string());
        };
        let value = match *flag {
            "-s" | "-d" if !value.contains('/') => format!("{}/32", value),
            _ => value.to_string(),
        };
        options.push((*flag, value));
    }
    options.sort_by_key(|(flag, _)| RULE_ORDER.iter().position(|f| f == flag).unwrap_or(RULE_ORDER.len()));

    let mut rule = format!("-A {}", chain);
    for (flag, value) in options {
        rule.push_str(&format!(" {} {}", flag, value));
    }
    Ok(rule)
}

fn no_chain() -> String {
    "iptables: No chain/target/match by that name.".to_string()
}

fn iptables(state: &mut HostState, args: &[&str]) -> Outcome {
    match args {
        ["-L", chain, "-n"] => {
            let rules = state.chains.get(*chain).ok_or_else(no_chain)?;
            Ok(format!("Chain {} ({} rules)", chain, rules.len()))
        }
        ["-N", chain] => {
            if state.chains.contains_key(*chain) {
                return Err("iptables: Chain already exists.".to_string());
            }
            state.chains.insert(chain.to_string(), Vec::new());
            Ok(String::new())
        }
        ["-S", chain] => {
            let rules = state.chains.get(*chain).ok_or_else(no_chain)?;
            let header = if matches!(*chain, "INPUT" | "FORWARD" | "OUTPUT") {
                format!("-P {} ACCEPT", chain)
            } else {
                format!("-N {}", chain)
            };
            Ok(std::iter::once(header)
                .chain(rules.iter().cloned())
                .collect::<Vec<_>>()
                .join("\n"))
        }
        ["-F", chain] => {
            state.chains.get_mut(*chain).ok_or_else(no_chain)?.clear();
            Ok(String::new())
        }
        ["-I", chain, "1", spec @ ..] => {
            let rule = canonical_rule(chain, spec)?;
            state.chains.get_mut(*chain).ok_or_else(no_chain)?.insert(0, rule);
            Ok(String::new())
        }
        ["-A", chain, spec @ ..] => {
            let rule = canonical_rule(chain, spec)?;
            state.chains.get_mut(*chain).ok_or_else(no_chain)?.push(rule);
            Ok(String::new())
        }
        ["-D", chain, spec @ ..] => {
            let rule = canonical_rule(chain, spec)?;
            let rules = state.chains.get_mut(*chain).ok_or_else(no_chain)?;
            let index = rules
                .iter()
                .position(|r| *r == rule)
                .ok_or_else(|| "iptables: Bad rule (does a matching rule exist in that chain?).".to_string())?;
            rules.remove(index);
            Ok(String::new())
        }
        _ => Err(format!("unsupported iptables invocation: {}", args.join(" "))),
    }
}

#[async_trait]
impl CommandRunner for FakeHost {
    async fn run(&self, cancel: &CancellationToken, program: &str, args: &[&str]) -> Result<String> {
        self.execute(cancel, None, program, args)
    }

    async fn run_with_input(
        &self,
        cancel: &CancellationToken,
        input: &str,
        program: &str,
        args: &[&str],
    ) -> Result<String> {
        self.execute(cancel, Some(input), program, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rules_print_in_iptables_order() {
        let host = FakeHost::new();
        let cancel = CancellationToken::new();
        host.run(&cancel, "iptables", &["-N", "T"]).await.unwrap();
        host.run(
            &cancel,
            "iptables",
            &["-A", "T", "-i", "wg0", "-s", "10.0.0.2", "-d", "10.8.0.0/16", "-j", "ACCEPT"],
        )
        .await
        .unwrap();

        let out = host.run(&cancel, "iptables", &["-S", "T"]).await.unwrap();
        assert_eq!(out, "-N T\n-A T -s 10.0.0.2/32 -d 10.8.0.0/16 -i wg0 -j ACCEPT");

        host.run(
            &cancel,
            "iptables",
            &["-D", "T", "-s", "10.0.0.2/32", "-d", "10.8.0.0/16", "-i", "wg0", "-j", "ACCEPT"],
        )
        .await
        .unwrap();
        assert!(host.chain_rules("T").is_empty());
    }

    #[tokio::test]
    async fn test_missing_device_message() {
        let host = FakeHost::new();
        let cancel = CancellationToken::new();
        let err = host
            .run(&cancel, "ip", &["-4", "addr", "show", "dev", "wg9"])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_keys_pair_up() {
        let host = FakeHost::new();
        let cancel = CancellationToken::new();
        let private = host.run(&cancel, "wg", &["genkey"]).await.unwrap();
        let public = host
            .run_with_input(&cancel, &format!("{}\n", private), "wg", &["pubkey"])
            .await
            .unwrap();
        assert_eq!(public, public_key_from_private(&private).unwrap());
    }
}
