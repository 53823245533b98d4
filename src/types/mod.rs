use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{Result, VnmError};

/// Per-NIC policy flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicConf {
    /// Refuse to join a bridge that already carries another VLAN tag
    #[serde(default)]
    pub validate_vlan_id: bool,
    /// Leave the bridge in place when its last guest goes away
    #[serde(default)]
    pub keep_empty_bridge: bool,
}

/// A VM network interface as declared by the NIC-list provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicDescriptor {
    /// NIC index within the VM
    #[serde(default)]
    pub nic_id: u32,
    /// Virtual network the NIC belongs to
    pub network_id: u32,
    /// Physical (parent) device carrying the tagged traffic
    #[serde(default)]
    pub phydev: Option<String>,
    /// Bridge the tagging device is attached to
    pub bridge: String,
    /// VLAN identifier (VNI for VXLAN), unused without a physical device
    #[serde(default)]
    pub vlan_id: u32,
    /// MTU for the tagging device
    #[serde(default)]
    pub mtu: Option<u32>,
    /// Policy flags
    #[serde(default)]
    pub conf: NicConf,
    /// Set on the NIC being hot-attached or hot-detached
    #[serde(default)]
    pub attach: bool,
    /// Alias NICs share another NIC's attachment
    #[serde(default)]
    pub alias: bool,
}

impl NicDescriptor {
    /// Create a descriptor with default policy flags
    pub fn new(network_id: u32, phydev: Option<&str>, bridge: &str, vlan_id: u32) -> Self {
        Self {
            nic_id: 0,
            network_id,
            phydev: phydev.map(str::to_string),
            bridge: bridge.to_string(),
            vlan_id,
            mtu: None,
            conf: NicConf::default(),
            attach: false,
            alias: false,
        }
    }

    /// Name of the tagging device for this NIC, if it has a physical device
    pub fn vlan_dev(&self) -> Option<String> {
        self.phydev
            .as_deref()
            .map(|phydev| vlan_device_name(phydev, self.vlan_id))
    }

    /// Name of the auxiliary device the host may create next to the bridge
    pub fn companion_dev(&self, suffix: &str) -> String {
        format!("{}{}", self.bridge, suffix)
    }

    /// Check the fields every driver relies on
    pub fn validate(&self) -> Result<()> {
        if self.bridge.is_empty() {
            return Err(VnmError::invalid_nic(self.nic_id, "bridge name is required"));
        }

        // Untagged NICs are skipped by every operation
        let Some(phydev) = &self.phydev else {
            return Ok(());
        };

        if phydev.is_empty() {
            return Err(VnmError::invalid_nic(
                self.nic_id,
                "physical device name is empty",
            ));
        }

        if self.vlan_id == 0 {
            return Err(VnmError::invalid_nic(self.nic_id, "vlan_id must be non-zero"));
        }

        Ok(())
    }
}

/// Derive the tagging device name for a parent device and VLAN.
///
/// The same pair always yields the same name, which is what lets activate
/// and deactivate find devices created by earlier invocations.
pub fn vlan_device_name(phydev: &str, vlan_id: u32) -> String {
    format!("{}.{}", phydev, vlan_id)
}

/// NIC attributes that may change on a live update
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Attribute {
    VlanId,
    Mtu,
    Phydev,
}

impl Attribute {
    /// Attribute name as used in the change record
    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::VlanId => "vlan_id",
            Attribute::Mtu => "mtu",
            Attribute::Phydev => "phydev",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        match key {
            "vlan_id" => Some(Attribute::VlanId),
            "mtu" => Some(Attribute::Mtu),
            "phydev" => Some(Attribute::Phydev),
            _ => None,
        }
    }
}

/// Live-update change record, restricted to `vlan_id`, `mtu` and `phydev`.
///
/// Values are the ones the NIC had before the update; the NIC list itself
/// carries the new ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    vlan_id: Option<u32>,
    mtu: Option<u32>,
    phydev: Option<String>,
}

impl ChangeSet {
    /// Build a change set from the raw change record, dropping attributes
    /// that cannot be updated live
    pub fn from_record(record: &BTreeMap<String, serde_json::Value>) -> Result<Self> {
        let mut changes = ChangeSet::default();

        for (key, value) in record {
            let Some(attr) = Attribute::from_key(key) else {
                debug!("Ignoring change to unsupported attribute {}", key);
                continue;
            };

            if value.is_null() {
                continue;
            }

            match attr {
                Attribute::VlanId => changes.vlan_id = Some(parse_number(attr, value)?),
                Attribute::Mtu => changes.mtu = Some(parse_number(attr, value)?),
                Attribute::Phydev => {
                    let phydev = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    changes.phydev = Some(phydev);
                }
            }
        }

        Ok(changes)
    }

    /// Record a previous VLAN id
    pub fn with_vlan_id(mut self, vlan_id: u32) -> Self {
        self.vlan_id = Some(vlan_id);
        self
    }

    /// Record a previous MTU
    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// Record a previous physical device
    pub fn with_phydev(mut self, phydev: &str) -> Self {
        self.phydev = Some(phydev.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.vlan_id.is_none() && self.mtu.is_none() && self.phydev.is_none()
    }

    pub fn contains(&self, attr: Attribute) -> bool {
        match attr {
            Attribute::VlanId => self.vlan_id.is_some(),
            Attribute::Mtu => self.mtu.is_some(),
            Attribute::Phydev => self.phydev.is_some(),
        }
    }

    /// True when the tagging device has to be recreated
    pub fn renames_device(&self) -> bool {
        self.contains(Attribute::VlanId) || self.contains(Attribute::Phydev)
    }

    /// The NIC as it looked before the update
    pub fn previous(&self, nic: &NicDescriptor) -> NicDescriptor {
        let mut old = nic.clone();
        if let Some(vlan_id) = self.vlan_id {
            old.vlan_id = vlan_id;
        }
        if let Some(mtu) = self.mtu {
            old.mtu = Some(mtu);
        }
        if let Some(phydev) = &self.phydev {
            old.phydev = Some(phydev.clone());
        }
        old
    }
}

fn parse_number(attr: Attribute, value: &serde_json::Value) -> Result<u32> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| {
        VnmError::config(
            format!("changes.{}", attr.as_str()),
            format!("expected an unsigned integer, got {}", value),
        )
    })
}

/// Document read from stdin for one driver invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Invocation {
    /// NICs of the VM, in declaration order
    pub nics: Vec<NicDescriptor>,
    /// Change record for live updates
    #[serde(default)]
    pub changes: BTreeMap<String, serde_json::Value>,
}

impl Invocation {
    /// Parse and validate an invocation document
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let invocation: Invocation = serde_json::from_slice(bytes)
            .map_err(|e| VnmError::config("invocation", e.to_string()))?;

        for nic in &invocation.nics {
            nic.validate()?;
        }

        Ok(invocation)
    }

    /// The restricted change set for an update
    pub fn change_set(&self) -> Result<ChangeSet> {
        ChangeSet::from_record(&self.changes)
    }
}
