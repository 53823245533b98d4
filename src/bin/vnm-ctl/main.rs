use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vnm_vlan::commands::{load_config, Overrides};
use vnm_vlan::config::DEFAULT_CONFIG_PATH;
use vnm_vlan::host::IpCommand;
use vnm_vlan::inventory::BridgeInventory;
use vnm_vlan::validate::check_vlan_consistency;
use vnm_vlan::{vlan_device_name, VlanDriver};

/// Inspect bridges and tagging devices managed by the VLAN driver
#[derive(Parser)]
#[clap(name = "vnm-ctl", author, version, about)]
struct Cli {
    /// Path to the driver configuration
    #[clap(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose output
    #[clap(short, long)]
    verbose: bool,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show bridges and their members
    Status {
        /// Only show this bridge
        #[clap(long)]
        bridge: Option<String>,

        /// Print the inventory as JSON
        #[clap(long)]
        json: bool,
    },

    /// Print the tagging device name for a parent device and VLAN
    Name {
        /// Parent device
        #[clap(long)]
        phydev: String,

        /// VLAN ID
        #[clap(long)]
        vlan_id: u32,
    },

    /// Check that a bridge carries no VLAN other than the given one
    Check {
        /// Bridge to check
        #[clap(long)]
        bridge: String,

        /// Expected VLAN ID
        #[clap(long)]
        vlan_id: u32,
    },
}

fn print_status(inventory: &BridgeInventory, bridge: Option<&str>, json: bool) -> Result<()> {
    let selected = inventory
        .bridges()
        .filter(|(name, _)| bridge.map_or(true, |b| b == name.as_str()))
        .collect_vec();

    if json {
        let map: serde_json::Map<String, serde_json::Value> = selected
            .iter()
            .map(|(name, members)| ((*name).clone(), serde_json::json!(members)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    if selected.is_empty() {
        match bridge {
            Some(b) => println!("No bridge named {} found", b),
            None => println!("No bridges found"),
        }
        return Ok(());
    }

    println!("Bridges:");
    for (name, members) in selected {
        if members.is_empty() {
            println!("  {} (no members)", name);
        } else {
            println!("  {}: {}", name, members.iter().join(", "));
        }
    }

    Ok(())
}

fn run_check(driver: &VlanDriver, bridge: &str, vlan_id: u32) -> Result<()> {
    let _guard = driver.lock().acquire()?;
    let inventory = BridgeInventory::snapshot(driver.tagging().runner())?;

    let Some(members) = inventory.members(bridge) else {
        anyhow::bail!("Bridge {} not found", bridge);
    };

    check_vlan_consistency(bridge, members, vlan_id, |device| {
        driver.tagging().device_tag(device)
    })
    .with_context(|| format!("Bridge {} is not consistent with VLAN {}", bridge, vlan_id))?;

    println!("Bridge {} is consistent with VLAN {}", bridge, vlan_id);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Configure logging based on verbosity
    let log_level = if cli.verbose { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set default subscriber")?;

    match cli.command {
        Commands::Name { phydev, vlan_id } => {
            println!("{}", vlan_device_name(&phydev, vlan_id));
        }

        Commands::Status { bridge, json } => {
            let config = load_config(&cli.config, &Overrides::default())?;
            let runner = Arc::new(IpCommand::new(config.ip_command.clone()));
            let driver = VlanDriver::from_config(&config, runner);

            let inventory = driver.inventory()?;
            print_status(&inventory, bridge.as_deref(), json)?;
        }

        Commands::Check { bridge, vlan_id } => {
            let config = load_config(&cli.config, &Overrides::default())?;
            let runner = Arc::new(IpCommand::new(config.ip_command.clone()));
            let driver = VlanDriver::from_config(&config, runner);

            run_check(&driver, &bridge, vlan_id)?;
        }
    }

    Ok(())
}
