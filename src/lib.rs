//! Bridge/VLAN network driver for hypervisor hosts
//!
//! This crate keeps host bridges and VLAN tagging devices in line with the
//! NICs a virtual machine declares:
//! - Creates bridges and tagging devices when NICs are activated
//! - Removes them again once no other guest uses the bridge
//! - Applies live VLAN, parent device and MTU changes
//! - Serializes concurrent driver processes with a host-wide lock

pub mod commands;
pub mod config;
pub mod error;
pub mod host;
pub mod inventory;
pub mod lock;
pub mod plugin;
pub mod tagging;
pub mod tproxy;
pub mod types;
pub mod validate;

// Re-export commonly used items
pub use config::DriverConfig;
pub use error::{Result, VnmError};
pub use inventory::BridgeInventory;
pub use lock::InvocationLock;
pub use plugin::VlanDriver;
pub use types::{vlan_device_name, ChangeSet, Invocation, NicDescriptor};
pub use commands::{run_driver, cmd_activate, cmd_deactivate, cmd_update};
