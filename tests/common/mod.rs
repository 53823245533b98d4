//! Simulated host for driving the reconciler without touching kernel state.
//!
//! `FakeHost` understands the subset of `ip` the driver issues and keeps an
//! in-memory link table plus a log of every command it was given.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use vnm_vlan::config::VxlanConfig;
use vnm_vlan::host::LinkRunner;
use vnm_vlan::lock::InvocationLock;
use vnm_vlan::tagging::{Dot1Q, Vxlan};
use vnm_vlan::tproxy::{NoProxy, ProxyHooks};
use vnm_vlan::{NicDescriptor, Result, VlanDriver, VnmError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeLink {
    pub kind: Option<String>,
    pub master: Option<String>,
    pub parent: Option<String>,
    pub tag: Option<u32>,
    pub group: Option<String>,
    pub mtu: u32,
    pub up: bool,
}

#[derive(Default)]
struct HostState {
    links: BTreeMap<String, FakeLink>,
    log: Vec<String>,
    failures: Vec<(String, String)>,
}

#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

fn failed(command: &str, output: impl Into<String>) -> VnmError {
    VnmError::CommandFailed {
        command: format!("ip {}", command),
        exit_code: 2,
        output: output.into(),
    }
}

fn cannot_find(device: &str) -> String {
    format!("Cannot find device \"{}\"", device)
}

impl HostState {
    fn dump(&self, only: Option<&str>) -> String {
        let links: Vec<serde_json::Value> = self
            .links
            .iter()
            .filter(|(name, _)| only.map_or(true, |o| o == name.as_str()))
            .map(|(name, link)| {
                let mut entry = serde_json::json!({
                    "ifname": name,
                    "mtu": link.mtu,
                    "operstate": if link.up { "UP" } else { "DOWN" },
                });
                if let Some(master) = &link.master {
                    entry["master"] = serde_json::json!(master);
                }
                if let Some(kind) = &link.kind {
                    let info_data = match link.tag {
                        Some(id) => serde_json::json!({ "id": id }),
                        None => serde_json::json!({}),
                    };
                    entry["linkinfo"] = serde_json::json!({
                        "info_kind": kind,
                        "info_data": info_data,
                    });
                }
                entry
            })
            .collect();

        serde_json::Value::Array(links).to_string()
    }

    fn add(&mut self, command: &str, rest: &[&str]) -> Result<String> {
        let mut opts = BTreeMap::new();
        for pair in rest.chunks(2) {
            if let [key, value] = pair {
                opts.insert(*key, *value);
            }
        }

        let Some(name) = opts.get("name").copied() else {
            return Err(failed(command, "Not enough information: \"dev\" argument is required."));
        };
        if self.links.contains_key(name) {
            return Err(failed(command, "RTNETLINK answers: File exists"));
        }

        let parent = opts.get("link").or_else(|| opts.get("dev")).copied();
        if let Some(parent) = parent {
            if !self.links.contains_key(parent) {
                return Err(failed(command, cannot_find(parent)));
            }
        }

        let mtu = match opts.get("mtu") {
            Some(mtu) => mtu.parse::<u32>().map_err(|_| failed(command, "invalid MTU"))?,
            None => 1500,
        };
        let tag = match opts.get("id") {
            Some(id) => Some(id.parse::<u32>().map_err(|_| failed(command, "invalid id"))?),
            None => None,
        };

        self.links.insert(
            name.to_string(),
            FakeLink {
                kind: opts.get("type").map(|k| k.to_string()),
                parent: parent.map(str::to_string),
                tag,
                group: opts.get("group").map(|g| g.to_string()),
                mtu,
                ..Default::default()
            },
        );
        Ok(String::new())
    }

    fn set(&mut self, command: &str, device: &str, rest: &[&str]) -> Result<String> {
        if !self.links.contains_key(device) {
            return Err(failed(command, cannot_find(device)));
        }

        match rest {
            ["up"] => self.link_mut(device).up = true,
            ["down"] => self.link_mut(device).up = false,
            ["nomaster"] => self.link_mut(device).master = None,
            ["master", bridge] => {
                let is_bridge = self
                    .links
                    .get(*bridge)
                    .is_some_and(|l| l.kind.as_deref() == Some("bridge"));
                if !is_bridge {
                    return Err(failed(command, cannot_find(bridge)));
                }
                self.link_mut(device).master = Some(bridge.to_string());
            }
            ["mtu", mtu] => {
                let mtu = mtu
                    .parse::<u32>()
                    .map_err(|_| failed(command, "invalid MTU"))?;
                self.link_mut(device).mtu = mtu;
            }
            _ => return Err(failed(command, "Command line is not complete.")),
        }
        Ok(String::new())
    }

    fn delete(&mut self, command: &str, device: &str) -> Result<String> {
        if self.links.remove(device).is_none() {
            return Err(failed(command, cannot_find(device)));
        }

        for link in self.links.values_mut() {
            if link.master.as_deref() == Some(device) {
                link.master = None;
            }
        }
        Ok(String::new())
    }

    fn link_mut(&mut self, device: &str) -> &mut FakeLink {
        self.links.entry(device.to_string()).or_default()
    }
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add an uplink such as `eth0`
    pub fn with_physical(&self, name: &str) -> &Self {
        self.insert(name, FakeLink { mtu: 1500, up: true, ..Default::default() })
    }

    pub fn with_bridge(&self, name: &str) -> &Self {
        self.insert(
            name,
            FakeLink {
                kind: Some("bridge".to_string()),
                mtu: 1500,
                up: true,
                ..Default::default()
            },
        )
    }

    /// Add an 802.1Q device, optionally enslaved to a bridge
    pub fn with_vlan(&self, parent: &str, id: u32, bridge: Option<&str>) -> &Self {
        self.insert(
            &format!("{}.{}", parent, id),
            FakeLink {
                kind: Some("vlan".to_string()),
                parent: Some(parent.to_string()),
                master: bridge.map(str::to_string),
                tag: Some(id),
                mtu: 1500,
                up: true,
                ..Default::default()
            },
        )
    }

    /// Add an untagged device enslaved to a bridge, like another VM's tap
    pub fn with_port(&self, name: &str, bridge: &str) -> &Self {
        self.insert(
            name,
            FakeLink {
                kind: Some("tun".to_string()),
                master: Some(bridge.to_string()),
                mtu: 1500,
                up: true,
                ..Default::default()
            },
        )
    }

    fn insert(&self, name: &str, link: FakeLink) -> &Self {
        self.state.lock().unwrap().links.insert(name.to_string(), link);
        self
    }

    pub fn link(&self, name: &str) -> Option<FakeLink> {
        self.state.lock().unwrap().links.get(name).cloned()
    }

    pub fn has_link(&self, name: &str) -> bool {
        self.link(name).is_some()
    }

    pub fn links(&self) -> BTreeMap<String, FakeLink> {
        self.state.lock().unwrap().links.clone()
    }

    /// Every command issued, without the leading `ip`
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    /// Issued commands that change host state
    pub fn mutations(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| !c.starts_with("-d -j link show"))
            .collect()
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }

    /// Make every command starting with `prefix` fail with `output`
    pub fn fail_on(&self, prefix: &str, output: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((prefix.to_string(), output.to_string()));
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }
}

impl LinkRunner for FakeHost {
    fn run(&self, args: &[&str]) -> Result<String> {
        let command = args.join(" ");
        let mut state = self.state.lock().unwrap();
        state.log.push(command.clone());

        if let Some((_, output)) = state
            .failures
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
        {
            return Err(failed(&command, output.clone()));
        }

        match args {
            ["-d", "-j", "link", "show"] => Ok(state.dump(None)),
            ["-d", "-j", "link", "show", "dev", device] => {
                if state.links.contains_key(*device) {
                    Ok(state.dump(Some(*device)))
                } else {
                    Err(failed(&command, format!("Device \"{}\" does not exist.", device)))
                }
            }
            ["link", "add", rest @ ..] => state.add(&command, rest),
            ["link", "set", device, rest @ ..] => state.set(&command, device, rest),
            ["link", "delete", device] => state.delete(&command, device),
            _ => Err(failed(&command, "Object is unknown, try \"ip help\".")),
        }
    }
}

/// Records proxy hook calls as `up:<bridge>` / `down:<bridge>`
#[derive(Clone, Default)]
pub struct RecordingProxy {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl RecordingProxy {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ProxyHooks for RecordingProxy {
    fn setup(&self, nic: &NicDescriptor) -> Result<()> {
        self.events.lock().unwrap().push(format!("up:{}", nic.bridge));
        Ok(())
    }

    fn teardown(&self, nic: &NicDescriptor) -> Result<()> {
        self.events.lock().unwrap().push(format!("down:{}", nic.bridge));
        Ok(())
    }
}

pub fn lock_in(dir: &Path) -> InvocationLock {
    InvocationLock::new(dir.join("vnm-vlan.lock"))
}

/// 802.1Q driver over `host`, locking inside `dir`
pub fn dot1q_driver(host: &Arc<FakeHost>, dir: &Path) -> VlanDriver {
    VlanDriver::new(Box::new(Dot1Q::new(host.clone())), Box::new(NoProxy), lock_in(dir))
}

pub fn vxlan_driver(host: &Arc<FakeHost>, dir: &Path) -> VlanDriver {
    VlanDriver::new(
        Box::new(Vxlan::new(host.clone(), VxlanConfig::default())),
        Box::new(NoProxy),
        lock_in(dir),
    )
}

pub fn nic(nic_id: u32, phydev: &str, bridge: &str, vlan_id: u32) -> NicDescriptor {
    let mut nic = NicDescriptor::new(1, Some(phydev), bridge, vlan_id);
    nic.nic_id = nic_id;
    nic
}
