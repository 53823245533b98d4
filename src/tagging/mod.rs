//! Tagging device capability.
//!
//! The reconciler only talks to [`TaggingDevice`]; each tagging technology
//! provides its own create/delete and tag lookup, and inherits the bridge
//! primitives which are the same for every technology.

mod dot1q;
mod vxlan;

pub use dot1q::Dot1Q;
pub use vxlan::Vxlan;

use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{DriverConfig, TaggingKind};
use crate::error::Result;
use crate::host::{is_already_exists, is_missing_device, LinkRunner};
use crate::types::NicDescriptor;

pub trait TaggingDevice: Send + Sync {
    /// Technology name used in logs
    fn kind(&self) -> &'static str;

    /// Command runner for this host
    fn runner(&self) -> &dyn LinkRunner;

    /// Create the tagging device for `nic`, administratively up
    fn create(&self, nic: &NicDescriptor) -> Result<()>;

    /// Remove the tagging device for `nic`; an absent device is not an error
    fn delete(&self, nic: &NicDescriptor) -> Result<()>;

    /// Tag carried by an existing device, `None` if it carries none of ours
    fn device_tag(&self, _device: &str) -> Result<Option<u32>> {
        Ok(None)
    }

    /// Create the bridge named by `nic` and bring it up
    fn create_bridge(&self, nic: &NicDescriptor) -> Result<()> {
        let runner = self.runner();
        match runner.run(&["link", "add", "name", &nic.bridge, "type", "bridge"]) {
            Ok(_) => {}
            Err(e) if is_already_exists(&e) => {
                debug!("Bridge {} already exists", nic.bridge);
            }
            Err(e) => return Err(e),
        }
        runner.run(&["link", "set", &nic.bridge, "up"])?;

        info!("Created bridge {}", nic.bridge);
        Ok(())
    }

    /// Delete a bridge by name; an absent bridge is not an error
    fn delete_bridge(&self, bridge: &str) -> Result<()> {
        match self.runner().run(&["link", "delete", bridge]) {
            Ok(_) => {
                info!("Deleted bridge {}", bridge);
                Ok(())
            }
            Err(e) if is_missing_device(&e) => {
                debug!("Bridge {} already gone", bridge);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn attach(&self, device: &str, bridge: &str) -> Result<()> {
        self.runner()
            .run(&["link", "set", device, "master", bridge])?;
        debug!("Attached {} to {}", device, bridge);
        Ok(())
    }

    fn detach(&self, device: &str) -> Result<()> {
        self.runner().run(&["link", "set", device, "nomaster"])?;
        debug!("Detached {}", device);
        Ok(())
    }

    fn set_mtu(&self, device: &str, mtu: u32) -> Result<()> {
        self.runner()
            .run(&["link", "set", device, "mtu", &mtu.to_string()])?;
        info!("Set MTU of {} to {}", device, mtu);
        Ok(())
    }
}

/// Build the tagging capability selected by the configuration
pub fn from_config(config: &DriverConfig, runner: Arc<dyn LinkRunner>) -> Box<dyn TaggingDevice> {
    match config.tagging {
        TaggingKind::Dot1Q => Box::new(Dot1Q::new(runner)),
        TaggingKind::Vxlan => Box::new(Vxlan::new(runner, config.vxlan.clone())),
    }
}

/// Delete `device`, treating an already absent device as success
pub(crate) fn delete_link(runner: &dyn LinkRunner, device: &str) -> Result<bool> {
    match runner.run(&["link", "delete", device]) {
        Ok(_) => Ok(true),
        Err(e) if is_missing_device(&e) => Ok(false),
        Err(e) => Err(e),
    }
}
