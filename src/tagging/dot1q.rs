//! IEEE 802.1Q VLAN sub-interfaces

use std::sync::Arc;
use tracing::{debug, info};

use super::{delete_link, TaggingDevice};
use crate::error::{Result, VnmError};
use crate::host::{is_already_exists, LinkRunner};
use crate::inventory::query_link;
use crate::types::NicDescriptor;

/// Highest usable 802.1Q VLAN id
pub const MAX_VLAN_ID: u32 = 4094;

/// 802.1Q tagging: one `type vlan` link per (phydev, vlan_id)
pub struct Dot1Q {
    runner: Arc<dyn LinkRunner>,
}

impl Dot1Q {
    pub fn new(runner: Arc<dyn LinkRunner>) -> Self {
        Self { runner }
    }
}

impl TaggingDevice for Dot1Q {
    fn kind(&self) -> &'static str {
        "802.1Q"
    }

    fn runner(&self) -> &dyn LinkRunner {
        self.runner.as_ref()
    }

    fn create(&self, nic: &NicDescriptor) -> Result<()> {
        let (phydev, vlan_dev) = match (&nic.phydev, nic.vlan_dev()) {
            (Some(phydev), Some(vlan_dev)) => (phydev.as_str(), vlan_dev),
            _ => return Err(VnmError::invalid_nic(nic.nic_id, "no physical device")),
        };

        if nic.vlan_id < 1 || nic.vlan_id > MAX_VLAN_ID {
            return Err(VnmError::DeviceCreation {
                device: vlan_dev,
                reason: format!(
                    "VLAN ID {} out of range (must be between 1 and {})",
                    nic.vlan_id, MAX_VLAN_ID
                ),
            });
        }

        let vlan_id = nic.vlan_id.to_string();
        let mtu = nic.mtu.map(|mtu| mtu.to_string());

        let mut args = vec!["link", "add", "link", phydev, "name", vlan_dev.as_str()];
        if let Some(mtu) = &mtu {
            args.extend(["mtu", mtu.as_str()]);
        }
        args.extend(["type", "vlan", "id", vlan_id.as_str()]);

        let creation_error = |e: VnmError| VnmError::DeviceCreation {
            device: vlan_dev.clone(),
            reason: e.to_string(),
        };

        match self.runner.run(&args) {
            Ok(_) => {}
            Err(e) if is_already_exists(&e) => {
                debug!("VLAN device {} already exists", vlan_dev);
            }
            Err(e) => return Err(creation_error(e)),
        }

        self.runner
            .run(&["link", "set", &vlan_dev, "up"])
            .map_err(creation_error)?;

        info!("Created VLAN device {} on {}", vlan_dev, phydev);
        Ok(())
    }

    fn delete(&self, nic: &NicDescriptor) -> Result<()> {
        let Some(vlan_dev) = nic.vlan_dev() else {
            return Ok(());
        };

        let removed = delete_link(self.runner.as_ref(), &vlan_dev).map_err(|e| {
            VnmError::DeviceDeletion {
                device: vlan_dev.clone(),
                reason: e.to_string(),
            }
        })?;

        if removed {
            info!("Deleted VLAN device {}", vlan_dev);
        } else {
            debug!("VLAN device {} already absent", vlan_dev);
        }
        Ok(())
    }

    fn device_tag(&self, device: &str) -> Result<Option<u32>> {
        Ok(query_link(self.runner.as_ref(), device)?.and_then(|link| link.tag_for("vlan")))
    }
}
