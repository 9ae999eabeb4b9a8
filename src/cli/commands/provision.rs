use anyhow::{Context, Result};
use serde_json::Value;

use super::{print_json, timeout_from_secs, until_interrupted, Command};
use crate::baremetal::{Baremetal, BaremetalClient, ProvisionOptions, ProvisionVerb};

pub struct ProvisionCommand {
    pub node: String,
    pub verb: ProvisionVerb,
    pub options: ProvisionOptions,
}

impl ProvisionCommand {
    pub fn new(node: String, verb: &str) -> Result<Self> {
        Ok(Self {
            node,
            verb: verb.parse()?,
            options: ProvisionOptions::default(),
        })
    }

    pub fn with_wait(mut self, wait: bool, timeout: Option<u64>) -> Self {
        self.options.wait = wait;
        self.options.timeout = timeout_from_secs(timeout);
        self
    }

    pub fn with_config_drive(mut self, config_drive: Option<String>) -> Self {
        self.options.config_drive = config_drive;
        self
    }

    pub fn with_clean_steps(mut self, clean_steps: Option<&str>) -> Result<Self> {
        if let Some(raw) = clean_steps {
            let steps: Vec<Value> =
                serde_json::from_str(raw).context("--clean-steps must be a JSON array")?;
            self.options.clean_steps = Some(steps);
        }
        Ok(self)
    }

    pub fn with_rescue_password(mut self, password: Option<String>) -> Self {
        self.options.rescue_password = password;
        self
    }
}

impl Command for ProvisionCommand {
    async fn execute(&self, baremetal: &Baremetal<BaremetalClient>) -> Result<()> {
        let node = until_interrupted(async {
            Ok(baremetal
                .set_node_provision_state(&self.node, self.verb, self.options.clone())
                .await?)
        })
        .await?;
        print_json(&node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_builds_options() {
        let command = ProvisionCommand::new("node-0".to_string(), "clean")
            .unwrap()
            .with_wait(true, Some(600))
            .with_clean_steps(Some(r#"[{"interface": "deploy", "step": "erase_devices"}]"#))
            .unwrap();

        assert_eq!(command.verb, ProvisionVerb::Clean);
        assert!(command.options.wait);
        assert_eq!(command.options.timeout, Some(Duration::from_secs(600)));
        assert_eq!(command.options.clean_steps.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(ProvisionCommand::new("node-0".to_string(), "explode").is_err());
        assert!(ProvisionCommand::new("node-0".to_string(), "clean")
            .unwrap()
            .with_clean_steps(Some("erase_devices"))
            .is_err());
    }
}
