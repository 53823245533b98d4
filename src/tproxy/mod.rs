//! Transparent-proxy hooks run around bridge attach and teardown.

use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info};

use crate::error::{Result, VnmError};
use crate::types::NicDescriptor;

/// Hooks invoked by the reconciler at bridge setup and teardown
pub trait ProxyHooks: Send + Sync {
    /// Called before the tagging device is attached to the NIC's bridge
    fn setup(&self, nic: &NicDescriptor) -> Result<()>;

    /// Called when the NIC's bridge has no guests left
    fn teardown(&self, nic: &NicDescriptor) -> Result<()>;
}

/// No transparent proxies on this host
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProxy;

impl ProxyHooks for NoProxy {
    fn setup(&self, _nic: &NicDescriptor) -> Result<()> {
        Ok(())
    }

    fn teardown(&self, _nic: &NicDescriptor) -> Result<()> {
        Ok(())
    }
}

/// Runs an external executable as `<hook> up|down <bridge> <nic_id>`
#[derive(Debug, Clone)]
pub struct HookCommand {
    program: PathBuf,
}

impl HookCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, action: &'static str, nic: &NicDescriptor) -> Result<()> {
        let nic_id = nic.nic_id.to_string();
        debug!(
            "Running proxy hook {} {} {} {}",
            self.program.display(),
            action,
            nic.bridge,
            nic_id
        );

        let output = Command::new(&self.program)
            .args([action, nic.bridge.as_str(), nic_id.as_str()])
            .output()
            .map_err(|e| VnmError::Proxy {
                action,
                bridge: nic.bridge.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(VnmError::Proxy {
                action,
                bridge: nic.bridge.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!("Transparent proxy {} for bridge {}", action, nic.bridge);
        Ok(())
    }
}

impl ProxyHooks for HookCommand {
    fn setup(&self, nic: &NicDescriptor) -> Result<()> {
        self.run("up", nic)
    }

    fn teardown(&self, nic: &NicDescriptor) -> Result<()> {
        self.run("down", nic)
    }
}

/// Build the proxy hooks for an optional hook executable
pub fn from_hook(hook: Option<&PathBuf>) -> Box<dyn ProxyHooks> {
    match hook {
        Some(program) => Box::new(HookCommand::new(program.clone())),
        None => Box::new(NoProxy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_command_success() {
        let hook = HookCommand::new("true");
        let nic = NicDescriptor::new(1, Some("eth0"), "br0", 10);
        assert!(hook.setup(&nic).is_ok());
        assert!(hook.teardown(&nic).is_ok());
    }

    #[test]
    fn test_hook_command_failure() {
        let hook = HookCommand::new("false");
        let nic = NicDescriptor::new(1, Some("eth0"), "br0", 10);
        match hook.setup(&nic) {
            Err(VnmError::Proxy { action, bridge, .. }) => {
                assert_eq!(action, "up");
                assert_eq!(bridge, "br0");
            }
            other => panic!("Expected proxy error, got {:?}", other),
        }
    }
}
