use anyhow::Result;
use std::time::Duration;

use super::{print_json, timeout_from_secs, until_interrupted, Command};
use crate::baremetal::{Baremetal, BaremetalClient, TargetPowerState};

pub struct PowerCommand {
    pub node: String,
    pub target: TargetPowerState,
    pub wait: bool,
    pub timeout: Option<Duration>,
}

impl PowerCommand {
    pub fn new(node: String, state: &str, wait: bool, timeout: Option<u64>) -> Result<Self> {
        Ok(Self {
            node,
            target: state.parse()?,
            wait,
            timeout: timeout_from_secs(timeout),
        })
    }
}

impl Command for PowerCommand {
    async fn execute(&self, baremetal: &Baremetal<BaremetalClient>) -> Result<()> {
        let node = until_interrupted(async {
            Ok(baremetal
                .set_node_power_state(&self.node, self.target, self.wait, self.timeout)
                .await?)
        })
        .await?;
        print_json(&node)
    }
}
