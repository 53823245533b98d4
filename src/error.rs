//! Error types for driver invocations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for reconciler operations
pub type Result<T> = std::result::Result<T, VnmError>;

/// Errors raised while reconciling host networking for a VM.
///
/// Every variant aborts the running invocation: the reconciler has no
/// continue-on-error mode and never retries.
#[derive(Debug, Error)]
pub enum VnmError {
    /// Live bridge membership could not be read from the host.
    #[error("Bridge inventory unavailable: {reason}")]
    InventoryUnavailable { reason: String },

    /// A bridge member already carries a different VLAN tag.
    #[error(
        "The interface {device} has vlan_id = {found} but the network is configured with vlan_id = {expected}"
    )]
    VlanConflict {
        bridge: String,
        device: String,
        found: u32,
        expected: u32,
    },

    /// The command could not be spawned at all.
    #[error("Failed to execute '{command}': {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The command ran and returned a non-zero exit code.
    #[error("Command failed: '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    /// A tagging device could not be created.
    #[error("Failed to create tagging device {device}: {reason}")]
    DeviceCreation { device: String, reason: String },

    /// A tagging device could not be removed.
    #[error("Failed to delete tagging device {device}: {reason}")]
    DeviceDeletion { device: String, reason: String },

    /// The NIC descriptor is unusable for this driver.
    #[error("Invalid NIC {nic_id}: {message}")]
    InvalidNic { nic_id: u32, message: String },

    /// The host-wide invocation lock could not be taken.
    #[error("Failed to lock {}: {message}", .path.display())]
    Lock { path: PathBuf, message: String },

    /// The transparent-proxy collaborator failed.
    #[error("Transparent proxy {action} failed for bridge {bridge}: {message}")]
    Proxy {
        action: &'static str,
        bridge: String,
        message: String,
    },

    /// Driver configuration is invalid.
    #[error("Invalid configuration for {field}: {message}")]
    Config { field: String, message: String },
}

impl VnmError {
    /// Creates an inventory error.
    pub fn inventory(reason: impl Into<String>) -> Self {
        Self::InventoryUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates an invalid NIC error.
    pub fn invalid_nic(nic_id: u32, message: impl Into<String>) -> Self {
        Self::InvalidNic {
            nic_id,
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns the combined command output when the error came from a
    /// command that ran to completion.
    pub fn command_output(&self) -> Option<&str> {
        match self {
            VnmError::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}
