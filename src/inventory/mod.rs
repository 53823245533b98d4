//! Snapshot of bridge membership on the host.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::{Result, VnmError};
use crate::host::{is_missing_device, LinkRunner};

/// One entry of `ip -d -j link show`
#[derive(Debug, Clone, Deserialize)]
pub struct LinkRecord {
    pub ifname: String,
    #[serde(default)]
    pub master: Option<String>,
    #[serde(default)]
    pub linkinfo: Option<LinkInfo>,
}

/// The `linkinfo` object of a detailed link dump
#[derive(Debug, Clone, Deserialize)]
pub struct LinkInfo {
    #[serde(default)]
    pub info_kind: Option<String>,
    #[serde(default)]
    pub info_data: Option<serde_json::Value>,
}

impl LinkRecord {
    /// Link kind (`bridge`, `vlan`, `vxlan`...), if any
    pub fn kind(&self) -> Option<&str> {
        self.linkinfo.as_ref()?.info_kind.as_deref()
    }

    pub fn is_bridge(&self) -> bool {
        self.kind() == Some("bridge")
    }

    /// The `id` carried in the link's kind-specific data, for links of `kind`
    pub fn tag_for(&self, kind: &str) -> Option<u32> {
        if self.kind() != Some(kind) {
            return None;
        }
        self.linkinfo
            .as_ref()?
            .info_data
            .as_ref()?
            .get("id")?
            .as_u64()
            .and_then(|id| u32::try_from(id).ok())
    }
}

/// Parse the JSON output of `ip -d -j link show`
pub fn parse_links(json: &str) -> serde_json::Result<Vec<LinkRecord>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json)
}

/// Look up a single link, `None` if the host has no such device
pub fn query_link(runner: &dyn LinkRunner, device: &str) -> Result<Option<LinkRecord>> {
    let output = match runner.run(&["-d", "-j", "link", "show", "dev", device]) {
        Ok(output) => output,
        Err(e) if is_missing_device(&e) => return Ok(None),
        Err(e) => return Err(e),
    };

    let links = parse_links(&output)
        .map_err(|e| VnmError::inventory(format!("unparsable link data for {}: {}", device, e)))?;

    Ok(links.into_iter().find(|link| link.ifname == device))
}

/// Bridge name -> member device names, as seen at snapshot time.
///
/// The reconciler keeps it current as it adds and removes devices, so it
/// is only meaningful while the invocation lock is held.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgeInventory {
    bridges: BTreeMap<String, BTreeSet<String>>,
}

impl BridgeInventory {
    /// Read bridge membership from the host
    pub fn snapshot(runner: &dyn LinkRunner) -> Result<Self> {
        let output = runner
            .run(&["-d", "-j", "link", "show"])
            .map_err(|e| VnmError::inventory(e.to_string()))?;

        let links = parse_links(&output)
            .map_err(|e| VnmError::inventory(format!("unparsable link data: {}", e)))?;

        let inventory = Self::from_links(&links);
        debug!("Bridge inventory: {:?}", inventory.bridges);
        Ok(inventory)
    }

    /// Build an inventory from already parsed link records
    pub fn from_links(links: &[LinkRecord]) -> Self {
        let mut bridges: BTreeMap<String, BTreeSet<String>> = links
            .iter()
            .filter(|link| link.is_bridge())
            .map(|link| (link.ifname.clone(), BTreeSet::new()))
            .collect();

        for link in links {
            if let Some(master) = &link.master {
                if let Some(members) = bridges.get_mut(master) {
                    members.insert(link.ifname.clone());
                }
            }
        }

        Self { bridges }
    }

    pub fn contains_bridge(&self, bridge: &str) -> bool {
        self.bridges.contains_key(bridge)
    }

    pub fn members(&self, bridge: &str) -> Option<&BTreeSet<String>> {
        self.bridges.get(bridge)
    }

    pub fn has_member(&self, bridge: &str, device: &str) -> bool {
        self.bridges
            .get(bridge)
            .map(|members| members.contains(device))
            .unwrap_or(false)
    }

    /// Record a newly created bridge with no members
    pub fn add_bridge(&mut self, bridge: &str) {
        self.bridges.entry(bridge.to_string()).or_default();
    }

    pub fn remove_bridge(&mut self, bridge: &str) {
        self.bridges.remove(bridge);
    }

    pub fn add_member(&mut self, bridge: &str, device: &str) {
        self.bridges
            .entry(bridge.to_string())
            .or_default()
            .insert(device.to_string());
    }

    pub fn remove_member(&mut self, bridge: &str, device: &str) {
        if let Some(members) = self.bridges.get_mut(bridge) {
            members.remove(device);
        }
    }

    pub fn bridges(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.bridges.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }
}
