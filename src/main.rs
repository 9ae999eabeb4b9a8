use anyhow::Result;
use clap::Parser;

use baremetal_nodes::cli::commands::maintenance::MaintenanceCommand;
use baremetal_nodes::cli::commands::node::{
    CreateCommand, DeleteCommand, FindCommand, ListCommand, ShowCommand,
};
use baremetal_nodes::cli::commands::power::PowerCommand;
use baremetal_nodes::cli::commands::provision::ProvisionCommand;
use baremetal_nodes::cli::commands::{connect, Command};
use baremetal_nodes::cli::{Cli, Commands};
use baremetal_nodes::config::config;
use baremetal_nodes::observability::baremetal_metrics;
use baremetal_nodes::telemetry::init_telemetry;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = cli.configure(config()?);
    init_telemetry(&config.observability)?;
    tracing::info!(endpoint = %config.endpoint.url, "Configuration loaded");

    tokio::runtime::Runtime::new()?.block_on(async {
        let baremetal = connect(&config)?;
        let result = match cli.command {
            Commands::Create {
                driver,
                name,
                provision_state,
                resource_class,
            } => {
                CreateCommand::new(driver, name, &provision_state, resource_class)?
                    .execute(&baremetal)
                    .await
            }
            Commands::Show { node } => ShowCommand { node }.execute(&baremetal).await,
            Commands::Find { node, strict } => FindCommand { node, strict }.execute(&baremetal).await,
            Commands::List {
                details,
                provision_state,
                maintenance,
                driver,
                resource_class,
                limit,
            } => {
                ListCommand::new(details, provision_state, maintenance, driver, resource_class, limit)
                    .execute(&baremetal)
                    .await
            }
            Commands::Delete { node, ignore_missing } => {
                DeleteCommand { node, ignore_missing }.execute(&baremetal).await
            }
            Commands::Provision {
                node,
                verb,
                wait,
                timeout,
                config_drive,
                clean_steps,
                rescue_password,
            } => {
                ProvisionCommand::new(node, &verb)?
                    .with_wait(wait, timeout)
                    .with_config_drive(config_drive)
                    .with_clean_steps(clean_steps.as_deref())?
                    .with_rescue_password(rescue_password)
                    .execute(&baremetal)
                    .await
            }
            Commands::Power {
                node,
                state,
                wait,
                timeout,
            } => {
                PowerCommand::new(node, &state, wait, timeout)?
                    .execute(&baremetal)
                    .await
            }
            Commands::Maintenance { node, action, reason } => {
                MaintenanceCommand { node, action, reason }
                    .execute(&baremetal)
                    .await
            }
        };
        baremetal_metrics().log_stats();
        result
    })
}
