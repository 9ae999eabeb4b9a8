use anyhow::Result;

use super::{print_json, Command};
use crate::baremetal::{Baremetal, BaremetalClient};
use crate::cli::MaintenanceAction;

pub struct MaintenanceCommand {
    pub node: String,
    pub action: MaintenanceAction,
    pub reason: Option<String>,
}

impl Command for MaintenanceCommand {
    async fn execute(&self, baremetal: &Baremetal<BaremetalClient>) -> Result<()> {
        let node = match self.action {
            MaintenanceAction::Set => {
                baremetal
                    .set_node_maintenance(&self.node, self.reason.as_deref())
                    .await?
            }
            MaintenanceAction::Unset => baremetal.unset_node_maintenance(&self.node).await?,
        };
        print_json(&node)
    }
}
