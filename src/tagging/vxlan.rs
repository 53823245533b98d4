//! VXLAN overlays using multicast groups derived from the VNI

use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info};

use super::{delete_link, TaggingDevice};
use crate::config::VxlanConfig;
use crate::error::{Result, VnmError};
use crate::host::{is_already_exists, LinkRunner};
use crate::inventory::query_link;
use crate::types::NicDescriptor;

/// Highest VXLAN network identifier (24 bits)
pub const MAX_VNI: u32 = 0x00ff_ffff;

/// VXLAN tagging: one `type vxlan` link per (phydev, vni)
pub struct Vxlan {
    runner: Arc<dyn LinkRunner>,
    config: VxlanConfig,
}

impl Vxlan {
    pub fn new(runner: Arc<dyn LinkRunner>, config: VxlanConfig) -> Self {
        Self { runner, config }
    }

    /// Multicast group for a VNI: the configured base address plus the VNI
    pub fn multicast_group(&self, vni: u32) -> Ipv4Addr {
        let base = u32::from(self.config.multicast_base);
        Ipv4Addr::from(base.wrapping_add(vni))
    }
}

impl TaggingDevice for Vxlan {
    fn kind(&self) -> &'static str {
        "vxlan"
    }

    fn runner(&self) -> &dyn LinkRunner {
        self.runner.as_ref()
    }

    fn create(&self, nic: &NicDescriptor) -> Result<()> {
        let (phydev, vxlan_dev) = match (&nic.phydev, nic.vlan_dev()) {
            (Some(phydev), Some(vxlan_dev)) => (phydev.as_str(), vxlan_dev),
            _ => return Err(VnmError::invalid_nic(nic.nic_id, "no physical device")),
        };

        if nic.vlan_id < 1 || nic.vlan_id > MAX_VNI {
            return Err(VnmError::DeviceCreation {
                device: vxlan_dev,
                reason: format!(
                    "VNI {} out of range (must be between 1 and {})",
                    nic.vlan_id, MAX_VNI
                ),
            });
        }

        let vni = nic.vlan_id.to_string();
        let group = self.multicast_group(nic.vlan_id).to_string();
        let dst_port = self.config.dst_port.to_string();
        let mtu = nic.mtu.map(|mtu| mtu.to_string());
        let ttl = self.config.ttl.map(|ttl| ttl.to_string());

        let mut args = vec!["link", "add", "name", vxlan_dev.as_str()];
        if let Some(mtu) = &mtu {
            args.extend(["mtu", mtu.as_str()]);
        }
        args.extend([
            "type",
            "vxlan",
            "id",
            vni.as_str(),
            "dev",
            phydev,
            "group",
            group.as_str(),
            "dstport",
            dst_port.as_str(),
        ]);
        if let Some(ttl) = &ttl {
            args.extend(["ttl", ttl.as_str()]);
        }

        let creation_error = |e: VnmError| VnmError::DeviceCreation {
            device: vxlan_dev.clone(),
            reason: e.to_string(),
        };

        match self.runner.run(&args) {
            Ok(_) => {}
            Err(e) if is_already_exists(&e) => {
                debug!("VXLAN device {} already exists", vxlan_dev);
            }
            Err(e) => return Err(creation_error(e)),
        }

        self.runner
            .run(&["link", "set", &vxlan_dev, "up"])
            .map_err(creation_error)?;

        info!("Created VXLAN device {} on {} (group {})", vxlan_dev, phydev, group);
        Ok(())
    }

    fn delete(&self, nic: &NicDescriptor) -> Result<()> {
        let Some(vxlan_dev) = nic.vlan_dev() else {
            return Ok(());
        };

        let removed = delete_link(self.runner.as_ref(), &vxlan_dev).map_err(|e| {
            VnmError::DeviceDeletion {
                device: vxlan_dev.clone(),
                reason: e.to_string(),
            }
        })?;

        if removed {
            info!("Deleted VXLAN device {}", vxlan_dev);
        }
        Ok(())
    }

    fn device_tag(&self, device: &str) -> Result<Option<u32>> {
        Ok(query_link(self.runner.as_ref(), device)?.and_then(|link| link.tag_for("vxlan")))
    }
}
