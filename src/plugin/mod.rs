use itertools::Itertools;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::DriverConfig;
use crate::error::Result;
use crate::host::LinkRunner;
use crate::inventory::BridgeInventory;
use crate::lock::InvocationLock;
use crate::tagging::{self, TaggingDevice};
use crate::tproxy::{self, ProxyHooks};
use crate::types::{Attribute, ChangeSet, NicDescriptor};
use crate::validate::check_vlan_consistency;

/// Bridge/VLAN reconciler for one VM's NICs.
///
/// Every operation holds the host-wide invocation lock from the inventory
/// snapshot to the last mutation, and releases it on every exit path.
pub struct VlanDriver {
    /// Tagging technology
    device: Box<dyn TaggingDevice>,
    /// Transparent-proxy hooks
    proxy: Box<dyn ProxyHooks>,
    /// Host-wide invocation lock
    lock: InvocationLock,
    /// Suffix of the auxiliary device that never counts as a guest
    companion_suffix: String,
}

impl VlanDriver {
    /// Create a new driver
    pub fn new(
        device: Box<dyn TaggingDevice>,
        proxy: Box<dyn ProxyHooks>,
        lock: InvocationLock,
    ) -> Self {
        Self {
            device,
            proxy,
            lock,
            companion_suffix: "b".to_string(),
        }
    }

    /// Build a driver from the configuration file settings
    pub fn from_config(config: &DriverConfig, runner: Arc<dyn LinkRunner>) -> Self {
        Self::new(
            tagging::from_config(config, runner),
            tproxy::from_hook(config.tproxy_hook.as_ref()),
            InvocationLock::new(&config.lock_file),
        )
        .with_companion_suffix(&config.companion_suffix)
    }

    pub fn with_companion_suffix(mut self, suffix: &str) -> Self {
        self.companion_suffix = suffix.to_string();
        self
    }

    pub fn tagging(&self) -> &dyn TaggingDevice {
        self.device.as_ref()
    }

    pub fn lock(&self) -> &InvocationLock {
        &self.lock
    }

    /// Current bridge membership, read under the invocation lock
    pub fn inventory(&self) -> Result<BridgeInventory> {
        let _guard = self.lock.acquire()?;
        BridgeInventory::snapshot(self.device.runner())
    }

    /// Create bridges and tagging devices for the VM's NICs
    #[instrument(skip_all, fields(invocation = %Uuid::new_v4(), tagging = self.device.kind()))]
    pub fn activate(&self, nics: &[NicDescriptor]) -> Result<()> {
        let _guard = self.lock.acquire()?;
        let mut bridges = BridgeInventory::snapshot(self.device.runner())?;

        for nic in nics {
            let Some(vlan_dev) = nic.vlan_dev() else {
                debug!("NIC {} has no physical device, skipping", nic.nic_id);
                continue;
            };

            if !bridges.contains_bridge(&nic.bridge) {
                self.device.create_bridge(nic)?;
                bridges.add_bridge(&nic.bridge);
            }

            self.proxy.setup(nic)?;

            if nic.conf.validate_vlan_id {
                if let Some(members) = bridges.members(&nic.bridge) {
                    check_vlan_consistency(&nic.bridge, members, nic.vlan_id, |device| {
                        self.device.device_tag(device)
                    })?;
                }
            }

            if bridges.has_member(&nic.bridge, &vlan_dev) {
                debug!("{} already in bridge {}", vlan_dev, nic.bridge);
                continue;
            }

            self.device.create(nic)?;
            self.device.attach(&vlan_dev, &nic.bridge)?;
            bridges.add_member(&nic.bridge, &vlan_dev);

            info!("Activated NIC {}: {} -> {}", nic.nic_id, vlan_dev, nic.bridge);
        }

        Ok(())
    }

    /// Remove tagging devices and bridges no other guest is using
    #[instrument(skip_all, fields(invocation = %Uuid::new_v4(), tagging = self.device.kind()))]
    pub fn deactivate(&self, nics: &[NicDescriptor]) -> Result<()> {
        let _guard = self.lock.acquire()?;

        if nics.iter().any(|nic| nic.alias && nic.attach) {
            debug!("Detaching an alias NIC, nothing to tear down");
            return Ok(());
        }

        let mut bridges = BridgeInventory::snapshot(self.device.runner())?;

        // Hot detach only touches the NIC being detached
        let detach_nic_id = nics.iter().find(|nic| nic.attach).map(|nic| nic.nic_id);

        for nic in nics {
            if detach_nic_id.is_some_and(|id| id != nic.nic_id) {
                continue;
            }

            let (Some(phydev), Some(vlan_dev)) = (nic.phydev.as_deref(), nic.vlan_dev()) else {
                continue;
            };

            // Already deleted by an earlier NIC on the same bridge
            let Some(members) = bridges.members(&nic.bridge) else {
                continue;
            };

            let companion = nic.companion_dev(&self.companion_suffix);
            let guests = members
                .iter()
                .filter(|m| m.as_str() != phydev && **m != vlan_dev && **m != companion)
                .cloned()
                .collect_vec();

            if guests.is_empty() {
                self.proxy.teardown(nic)?;
            }

            if nic.conf.keep_empty_bridge || !guests.is_empty() {
                debug!(
                    "Keeping bridge {} (guests: [{}])",
                    nic.bridge,
                    guests.iter().join(", ")
                );
                continue;
            }

            self.device.delete(nic)?;
            bridges.remove_member(&nic.bridge, &vlan_dev);

            self.device.delete_bridge(&nic.bridge)?;
            bridges.remove_bridge(&nic.bridge);

            info!("Deactivated NIC {}: removed {} and {}", nic.nic_id, vlan_dev, nic.bridge);
        }

        Ok(())
    }

    /// Apply a live change of `vlan_id`, `phydev` or `mtu` to a network.
    ///
    /// Only the first NIC of the network is processed: the change is the
    /// same for every NIC on it, so one application converges them all.
    #[instrument(skip_all, fields(invocation = %Uuid::new_v4(), network_id = network_id))]
    pub fn update(
        &self,
        nics: &[NicDescriptor],
        network_id: u32,
        changes: &ChangeSet,
    ) -> Result<()> {
        let _guard = self.lock.acquire()?;

        if changes.is_empty() {
            debug!("No live-updatable attributes changed");
            return Ok(());
        }

        let mut bridges = BridgeInventory::snapshot(self.device.runner())?;

        for nic in nics {
            if nic.network_id != network_id {
                continue;
            }

            let Some(vlan_dev) = nic.vlan_dev() else {
                continue;
            };

            if !bridges.contains_bridge(&nic.bridge) {
                continue;
            }

            if changes.renames_device() {
                let old = changes.previous(nic);

                if let Some(old_dev) = old.vlan_dev() {
                    if bridges.has_member(&old.bridge, &old_dev) {
                        self.device.detach(&old_dev)?;
                        self.device.delete(&old)?;
                        bridges.remove_member(&old.bridge, &old_dev);
                    }
                }

                // create also applies the MTU
                self.device.create(nic)?;
                self.device.attach(&vlan_dev, &nic.bridge)?;
                bridges.add_member(&nic.bridge, &vlan_dev);

                info!("Updated network {}: {} -> {}", network_id, vlan_dev, nic.bridge);
            } else if changes.contains(Attribute::Mtu) {
                match nic.mtu {
                    Some(mtu) => self.device.set_mtu(&vlan_dev, mtu)?,
                    None => warn!("MTU changed but NIC {} has no MTU set", nic.nic_id),
                }
            }

            return Ok(());
        }

        Ok(())
    }
}
