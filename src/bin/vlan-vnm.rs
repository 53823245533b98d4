use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vnm_vlan::commands::{run_driver, Action, Overrides};
use vnm_vlan::config::{TaggingKind, DEFAULT_CONFIG_PATH};

/// Bridge/VLAN network driver, invoked by the VM lifecycle manager.
///
/// Reads `{"nics": [...], "changes": {...}}` from stdin.
#[derive(Parser)]
#[clap(name = "vlan-vnm", author, version, about)]
struct Cli {
    /// Path to the driver configuration
    #[clap(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the lock file path
    #[clap(long)]
    lock_file: Option<PathBuf>,

    /// Override the tagging technology (8021q or vxlan)
    #[clap(long)]
    tagging: Option<TaggingKind>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create bridges and tagging devices for a booting VM
    Activate,
    /// Tear down what a stopping VM no longer needs
    Deactivate,
    /// Apply a live change to a virtual network
    Update {
        /// Network the change applies to
        #[clap(long)]
        network_id: u32,
    },
}

fn main() {
    let cli = Cli::parse();

    // stdout belongs to the caller
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);

    let action = match cli.command {
        Commands::Activate => Action::Activate,
        Commands::Deactivate => Action::Deactivate,
        Commands::Update { network_id } => Action::Update { network_id },
    };

    let overrides = Overrides {
        lock_file: cli.lock_file,
        tagging: cli.tagging,
    };

    std::process::exit(run_driver(&cli.config, &overrides, action));
}
