use anyhow::{Context, Result};
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::{DriverConfig, TaggingKind};
use crate::host::IpCommand;
use crate::plugin::VlanDriver;
use crate::types::Invocation;

/// Lifecycle event the driver was invoked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Activate,
    Deactivate,
    Update { network_id: u32 },
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Activate => "activate",
            Action::Deactivate => "deactivate",
            Action::Update { .. } => "update",
        }
    }
}

/// Settings given on the command line, applied over the configuration file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub lock_file: Option<PathBuf>,
    pub tagging: Option<TaggingKind>,
}

/// Load the configuration file and apply command-line overrides
pub fn load_config(path: &std::path::Path, overrides: &Overrides) -> Result<DriverConfig> {
    let mut config = DriverConfig::load(path)?;

    if let Some(lock_file) = &overrides.lock_file {
        config.lock_file = lock_file.clone();
    }
    if let Some(tagging) = overrides.tagging {
        config.tagging = tagging;
    }

    Ok(config)
}

/// Read the invocation document from stdin
pub fn read_invocation() -> Result<Invocation> {
    let mut stdin_data = Vec::new();
    io::stdin()
        .read_to_end(&mut stdin_data)
        .context("Failed to read from stdin")?;

    Invocation::parse(&stdin_data).context("Failed to parse invocation document")
}

/// Execute the activate command
pub fn cmd_activate(driver: &VlanDriver, invocation: &Invocation) -> Result<()> {
    driver.activate(&invocation.nics)?;
    Ok(())
}

/// Execute the deactivate command
pub fn cmd_deactivate(driver: &VlanDriver, invocation: &Invocation) -> Result<()> {
    driver.deactivate(&invocation.nics)?;
    Ok(())
}

/// Execute the update command
pub fn cmd_update(driver: &VlanDriver, invocation: &Invocation, network_id: u32) -> Result<()> {
    let changes = invocation.change_set()?;
    driver.update(&invocation.nics, network_id, &changes)?;
    Ok(())
}

/// Run one action against an already built driver
pub fn dispatch(driver: &VlanDriver, action: Action, invocation: &Invocation) -> Result<()> {
    match action {
        Action::Activate => cmd_activate(driver, invocation),
        Action::Deactivate => cmd_deactivate(driver, invocation),
        Action::Update { network_id } => cmd_update(driver, invocation, network_id),
    }
}

/// Map the result of an invocation to the process outcome, reporting
/// failures through the log
pub fn outcome(action: Action, result: &Result<()>) -> i32 {
    match result {
        Ok(()) => {
            info!("{} completed", action.as_str());
            0
        }
        Err(err) => {
            error!("{} failed: {:#}", action.as_str(), err);
            1
        }
    }
}

/// Main entry point for the driver binary
pub fn run_driver(config_path: &std::path::Path, overrides: &Overrides, action: Action) -> i32 {
    let result = load_config(config_path, overrides).and_then(|config| {
        let invocation = read_invocation()?;
        let runner = Arc::new(IpCommand::new(config.ip_command.clone()));
        let driver = VlanDriver::from_config(&config, runner);
        dispatch(&driver, action, &invocation)
    });

    outcome(action, &result)
}
