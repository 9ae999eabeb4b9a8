use clap::{Parser, Subcommand, ValueEnum};

use crate::config::BaremetalConfig;

pub mod commands;

#[derive(Parser)]
#[command(name = "baremetal")]
#[command(about = "Manage bare metal nodes and drive them through provisioning")]
#[command(long_about = "Create, inspect and delete bare metal nodes and run provisioning actions \
                       on them, optionally waiting until the node settles. Configuration is read from \
                       baremetal.toml, .baremetal-rc and BAREMETAL__* environment variables.")]
pub struct Cli {
    /// Override the API endpoint from the configuration
    #[arg(long, global = true, env = "BAREMETAL_URL")]
    pub endpoint: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// The loaded configuration with command line overrides applied
    pub fn configure(&self, loaded: &BaremetalConfig) -> BaremetalConfig {
        let mut config = loaded.clone();
        if let Some(endpoint) = &self.endpoint {
            config.endpoint.url = endpoint.clone();
        }
        if self.json_logs {
            config.observability.json_logs = true;
        }
        config
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a node
    Create {
        /// Driver controlling the node, e.g. ipmi or fake-hardware
        #[arg(long)]
        driver: String,
        /// Unique node name
        #[arg(long)]
        name: Option<String>,
        /// State to leave the node in: enroll, manageable or available
        #[arg(long, default_value = "available")]
        provision_state: String,
        #[arg(long)]
        resource_class: Option<String>,
    },
    /// Show a node by UUID or name
    Show { node: String },
    /// Look up a node, printing null when it does not exist
    Find {
        node: String,
        /// Fail instead of printing null for a missing node
        #[arg(long)]
        strict: bool,
    },
    /// List nodes
    List {
        /// Fetch full node records
        #[arg(long)]
        details: bool,
        #[arg(long)]
        provision_state: Option<String>,
        #[arg(long)]
        maintenance: Option<bool>,
        #[arg(long)]
        driver: Option<String>,
        #[arg(long)]
        resource_class: Option<String>,
        /// Page size used when fetching
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Delete a node
    Delete {
        node: String,
        /// Succeed when the node does not exist
        #[arg(long)]
        ignore_missing: bool,
    },
    /// Run a provisioning action (manage, provide, inspect, clean, deploy, undeploy, ...)
    Provision {
        node: String,
        verb: String,
        /// Wait until the node reaches the resulting stable state
        #[arg(long)]
        wait: bool,
        /// Wait timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Config drive for deploy and rebuild
        #[arg(long)]
        config_drive: Option<String>,
        /// Clean steps as a JSON array, required for clean
        #[arg(long)]
        clean_steps: Option<String>,
        /// Rescue password, required for rescue
        #[arg(long)]
        rescue_password: Option<String>,
    },
    /// Change the power state of a node
    Power {
        node: String,
        /// on, off, reboot, soft-power-off or soft-reboot
        state: String,
        #[arg(long)]
        wait: bool,
        /// Wait timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Put a node into or take it out of maintenance mode
    Maintenance {
        node: String,
        action: MaintenanceAction,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MaintenanceAction {
    Set,
    Unset,
}
