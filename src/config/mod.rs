use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default location of the driver configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/vnm/vlan.json";

/// Tagging technology used to build devices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaggingKind {
    /// IEEE 802.1Q VLAN sub-interfaces
    #[default]
    #[serde(rename = "8021q")]
    Dot1Q,
    /// VXLAN overlay devices
    #[serde(rename = "vxlan")]
    Vxlan,
}

impl std::str::FromStr for TaggingKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "8021q" | "802.1q" | "dot1q" => Ok(TaggingKind::Dot1Q),
            "vxlan" => Ok(TaggingKind::Vxlan),
            other => anyhow::bail!("Unknown tagging technology: {}", other),
        }
    }
}

/// VXLAN specific settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VxlanConfig {
    /// Base multicast address; the VNI is added to it
    pub multicast_base: Ipv4Addr,
    /// Multicast TTL
    pub ttl: Option<u8>,
    /// UDP destination port, 0 keeps the kernel default
    pub dst_port: u16,
}

impl Default for VxlanConfig {
    fn default() -> Self {
        Self {
            multicast_base: Ipv4Addr::new(239, 0, 0, 0),
            ttl: None,
            dst_port: 0,
        }
    }
}

/// Configuration for the VLAN network driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// iproute2 binary
    pub ip_command: String,
    /// Host-wide lock serializing driver invocations
    pub lock_file: PathBuf,
    /// Tagging technology
    pub tagging: TaggingKind,
    /// VXLAN settings, used when `tagging` is vxlan
    pub vxlan: VxlanConfig,
    /// Suffix of the auxiliary device created next to a bridge
    pub companion_suffix: String,
    /// Executable invoked as `<hook> up|down <bridge> <nic_id>`
    pub tproxy_hook: Option<PathBuf>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            ip_command: "ip".to_string(),
            lock_file: PathBuf::from("/var/lock/vnm-vlan.lock"),
            tagging: TaggingKind::Dot1Q,
            vxlan: VxlanConfig::default(),
            companion_suffix: "b".to_string(),
            tproxy_hook: None,
        }
    }
}

impl DriverConfig {
    /// Parse a configuration document
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let config: DriverConfig =
            serde_json::from_slice(bytes).context("Failed to parse driver configuration")?;

        if config.ip_command.is_empty() {
            anyhow::bail!("ip_command must not be empty");
        }

        if config.lock_file.as_os_str().is_empty() {
            anyhow::bail!("lock_file must not be empty");
        }

        Ok(config)
    }

    /// Load the configuration file, falling back to defaults if it is absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        Self::parse(&bytes)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }
}
