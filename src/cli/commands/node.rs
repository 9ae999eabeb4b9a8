use anyhow::Result;

use super::{print_json, Command};
use crate::baremetal::{Baremetal, BaremetalClient, InitialProvisionState, NodeQuery, NodeSpec, ProvisionState};

pub struct CreateCommand {
    pub spec: NodeSpec,
}

impl CreateCommand {
    pub fn new(
        driver: String,
        name: Option<String>,
        provision_state: &str,
        resource_class: Option<String>,
    ) -> Result<Self> {
        let mut spec = NodeSpec::new(driver)
            .with_provision_state(provision_state.parse::<InitialProvisionState>()?);
        spec.name = name;
        spec.resource_class = resource_class;
        Ok(Self { spec })
    }
}

impl Command for CreateCommand {
    async fn execute(&self, baremetal: &Baremetal<BaremetalClient>) -> Result<()> {
        let node = super::until_interrupted(async { Ok(baremetal.create_node(&self.spec).await?) }).await?;
        print_json(&node)
    }
}

pub struct ShowCommand {
    pub node: String,
}

impl Command for ShowCommand {
    async fn execute(&self, baremetal: &Baremetal<BaremetalClient>) -> Result<()> {
        let node = baremetal.get_node(&self.node).await?;
        print_json(&node)
    }
}

pub struct FindCommand {
    pub node: String,
    pub strict: bool,
}

impl Command for FindCommand {
    async fn execute(&self, baremetal: &Baremetal<BaremetalClient>) -> Result<()> {
        let node = baremetal.find_node(&self.node, !self.strict).await?;
        print_json(&node)
    }
}

pub struct ListCommand {
    pub query: NodeQuery,
}

impl ListCommand {
    pub fn new(
        details: bool,
        provision_state: Option<String>,
        maintenance: Option<bool>,
        driver: Option<String>,
        resource_class: Option<String>,
        limit: Option<usize>,
    ) -> Self {
        Self {
            query: NodeQuery {
                details,
                provision_state: provision_state.map(ProvisionState::from),
                maintenance,
                driver,
                resource_class,
                limit,
            },
        }
    }
}

impl Command for ListCommand {
    async fn execute(&self, baremetal: &Baremetal<BaremetalClient>) -> Result<()> {
        let nodes = baremetal.nodes(&self.query).await?;
        print_json(&nodes)
    }
}

pub struct DeleteCommand {
    pub node: String,
    pub ignore_missing: bool,
}

impl Command for DeleteCommand {
    async fn execute(&self, baremetal: &Baremetal<BaremetalClient>) -> Result<()> {
        baremetal.delete_node(&self.node, self.ignore_missing).await?;
        eprintln!("Deleted node {}", self.node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_command_parses_initial_state() {
        let command = CreateCommand::new(
            "ipmi".to_string(),
            Some("rack1-u12".to_string()),
            "manageable",
            None,
        )
        .unwrap();
        assert_eq!(command.spec.initial_state(), InitialProvisionState::Manageable);
        assert_eq!(command.spec.name.as_deref(), Some("rack1-u12"));

        assert!(CreateCommand::new("ipmi".to_string(), None, "active", None).is_err());
    }

    #[test]
    fn test_list_command_builds_query() {
        let command = ListCommand::new(
            true,
            Some("clean failed".to_string()),
            Some(false),
            None,
            None,
            Some(50),
        );
        assert!(command.query.details);
        assert_eq!(command.query.provision_state, Some(ProvisionState::CleanFailed));
        assert_eq!(
            command.query.to_query_pairs(),
            vec![
                ("provision_state", "clean failed".to_string()),
                ("maintenance", "false".to_string()),
                ("limit", "50".to_string()),
            ]
        );
    }
}
