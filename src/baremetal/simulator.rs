//! In-memory bare metal service.
//!
//! Keeps nodes in memory and drives each one through the provisioning state
//! machine in [`super::state_machine`]. Asynchronous operations make progress
//! on every `refresh`, so tests control how long a transition takes through
//! [`SimulatedBaremetal::with_settle_after`].

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::accessor::{NodeAccessor, ProvisionTransport};
use super::errors::BaremetalError;
use super::state_machine::{ProvisioningMachine, SIMULATED_CONDUCTOR};
use super::types::{
    InitialProvisionState, Node, NodeQuery, NodeSpec, PatchOperation, PowerState,
    ProvisionState, ProvisionVerb, TargetPowerState, TransitionRequest,
};

/// Top level node fields a JSON patch may touch
const PATCHABLE_FIELDS: &[&str] = &[
    "name",
    "driver",
    "resource_class",
    "instance_uuid",
    "properties",
    "driver_info",
    "extra",
];

/// A request received by the simulated service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedCall {
    Create { name: Option<String> },
    Get(String),
    Delete(String),
    List,
    Update(String),
    SetMaintenance(String),
    UnsetMaintenance(String),
    Transition { node: String, verb: ProvisionVerb },
    Power { node: String, target: TargetPowerState },
    Refresh(String),
}

struct SimulatedNode {
    node: Node,
    provisioning: ProvisioningMachine,
    pending_power: Option<TargetPowerState>,
}

impl SimulatedNode {
    fn snapshot(&self) -> Node {
        let provisioning = self.provisioning.snapshot();
        Node {
            provision_state: provisioning.provision_state,
            target_provision_state: provisioning.target_provision_state,
            last_error: provisioning.last_error,
            reservation: provisioning.reservation,
            ..self.node.clone()
        }
    }

    fn advance(&mut self) {
        let before = self.provisioning.provision_state().clone();
        self.provisioning.tick();
        let after = self.provisioning.provision_state();
        if &before != after {
            self.node.provision_updated_at = Some(Utc::now());
        }
        // Verification populates the power state
        if after != &ProvisionState::Enroll && self.node.power_state.is_none() {
            self.node.power_state = Some(PowerState::PowerOff);
        }
        if let Some(target) = self.pending_power.take() {
            self.node.power_state = Some(target.expected_state());
            self.node.target_power_state = None;
        }
    }

    fn can_be_deleted(&self) -> bool {
        matches!(
            self.provisioning.provision_state(),
            ProvisionState::Enroll
                | ProvisionState::Manageable
                | ProvisionState::Available
                | ProvisionState::AdoptFailed
        )
    }
}

/// Simulated bare metal service implementing both collaborator traits
pub struct SimulatedBaremetal {
    nodes: Mutex<BTreeMap<String, SimulatedNode>>,
    calls: Mutex<Vec<SimulatedCall>>,
    settle_after: u32,
}

impl Default for SimulatedBaremetal {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBaremetal {
    pub fn new() -> Self {
        Self::with_settle_after(2)
    }

    /// Transient states last `refreshes` refreshes of the node
    pub fn with_settle_after(refreshes: u32) -> Self {
        Self {
            nodes: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            settle_after: refreshes.max(1),
        }
    }

    /// Make the next transition of the node that completes fail with `message`
    pub async fn fail_next_transition(&self, ident: &str, message: &str) -> Result<(), BaremetalError> {
        let mut nodes = self.nodes.lock().await;
        let id = resolve(&nodes, ident)?;
        if let Some(entry) = nodes.get_mut(&id) {
            entry.provisioning.inject_failure(message);
        }
        Ok(())
    }

    /// Remove a node behind the client's back, as another user would
    pub async fn remove_node(&self, ident: &str) -> bool {
        let mut nodes = self.nodes.lock().await;
        match resolve(&nodes, ident) {
            Ok(id) => nodes.remove(&id).is_some(),
            Err(_) => false,
        }
    }

    pub async fn node_count(&self) -> usize {
        self.nodes.lock().await.len()
    }

    /// Every request received so far, oldest first
    pub async fn calls(&self) -> Vec<SimulatedCall> {
        self.calls.lock().await.clone()
    }

    /// Number of refreshes received for `ident`
    pub async fn refresh_count(&self, ident: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| matches!(call, SimulatedCall::Refresh(node) if node == ident))
            .count()
    }

    async fn record(&self, call: SimulatedCall) {
        self.calls.lock().await.push(call);
    }
}

/// Find the UUID of a node given its UUID or name
fn resolve(nodes: &BTreeMap<String, SimulatedNode>, ident: &str) -> Result<String, BaremetalError> {
    if nodes.contains_key(ident) {
        return Ok(ident.to_string());
    }
    nodes
        .values()
        .find(|entry| entry.node.name.as_deref() == Some(ident))
        .map(|entry| entry.node.id.clone())
        .ok_or_else(|| BaremetalError::node_not_found(ident))
}

fn name_taken(nodes: &BTreeMap<String, SimulatedNode>, name: &str, except: Option<&str>) -> bool {
    nodes
        .values()
        .any(|entry| entry.node.name.as_deref() == Some(name) && Some(entry.node.id.as_str()) != except)
}

fn bad_request(message: impl Into<String>) -> BaremetalError {
    BaremetalError::Api {
        status: 400,
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> BaremetalError {
    BaremetalError::Api {
        status: 409,
        message: message.into(),
    }
}

fn pointer_segments(path: &str) -> Vec<String> {
    path.trim_start_matches('/')
        .split('/')
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect()
}

/// Apply a JSON patch to the wire representation of a node
fn apply_patch(node: &Node, patch: &[PatchOperation]) -> Result<Node, BaremetalError> {
    let mut document =
        serde_json::to_value(node).map_err(|e| BaremetalError::InvalidResponse(e.to_string()))?;

    for operation in patch {
        let segments = pointer_segments(operation.path());
        let field = segments.first().map(String::as_str).unwrap_or_default();
        if !PATCHABLE_FIELDS.contains(&field) {
            return Err(bad_request(format!(
                "'{}' is an internal attribute and can not be updated",
                operation.path()
            )));
        }

        let Some((last, parents)) = segments.split_last() else {
            return Err(bad_request("empty patch path"));
        };
        let mut target = &mut document;
        for segment in parents {
            if !target.is_object() {
                return Err(bad_request(format!("'{}' is not an object", operation.path())));
            }
            if target.get(segment).is_none_or(Value::is_null) {
                if matches!(operation, PatchOperation::Remove { .. }) {
                    return Err(bad_request(format!(
                        "can't remove non-existent object '{segment}'"
                    )));
                }
                target[segment.as_str()] = Value::Object(Default::default());
            }
            target = &mut target[segment.as_str()];
        }
        let Some(object) = target.as_object_mut() else {
            return Err(bad_request(format!("'{}' is not an object", operation.path())));
        };

        match operation {
            PatchOperation::Add { value, .. } | PatchOperation::Replace { value, .. } => {
                object.insert(last.clone(), value.clone());
            }
            PatchOperation::Remove { path } if parents.is_empty() => {
                // Top level attributes are reset rather than removed
                if object.insert(last.clone(), Value::Null).is_none() {
                    return Err(bad_request(format!("can't remove non-existent object '{path}'")));
                }
            }
            PatchOperation::Remove { path } => {
                if object.remove(last).is_none() {
                    return Err(bad_request(format!("can't remove non-existent object '{path}'")));
                }
            }
        }
    }

    serde_json::from_value(document).map_err(|e| bad_request(format!("invalid patch: {e}")))
}

#[async_trait]
impl NodeAccessor for SimulatedBaremetal {
    async fn create(&self, spec: &NodeSpec) -> Result<Node, BaremetalError> {
        self.record(SimulatedCall::Create {
            name: spec.name.clone(),
        })
        .await;

        if spec.driver.trim().is_empty() {
            return Err(bad_request("a driver is required to create a node"));
        }

        let mut nodes = self.nodes.lock().await;
        if let Some(name) = &spec.name {
            if name_taken(&nodes, name, None) {
                return Err(conflict(format!("A node with name {name} already exists.")));
            }
        }
        let id = spec.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        if nodes.contains_key(&id) {
            return Err(conflict(format!("A node with UUID {id} already exists.")));
        }

        let mut provisioning = ProvisioningMachine::new(self.settle_after);
        // Same rule as the service: only old microversions create available nodes
        if spec.initial_state() == InitialProvisionState::Available && spec.resource_class.is_none() {
            provisioning.legacy_enroll();
        }

        let now = Utc::now();
        let node = Node {
            id: id.clone(),
            name: spec.name.clone(),
            driver: spec.driver.clone(),
            provision_state: provisioning.provision_state().clone(),
            target_provision_state: None,
            power_state: None,
            target_power_state: None,
            is_maintenance: false,
            maintenance_reason: None,
            last_error: None,
            reservation: None,
            instance_id: None,
            resource_class: spec.resource_class.clone(),
            properties: Some(spec.properties.clone().unwrap_or_default()),
            driver_info: Some(spec.driver_info.clone().unwrap_or_default()),
            extra: Some(spec.extra.clone().unwrap_or_default()),
            created_at: Some(now),
            updated_at: None,
            provision_updated_at: None,
        };
        let entry = SimulatedNode {
            node,
            provisioning,
            pending_power: None,
        };
        let snapshot = entry.snapshot();
        nodes.insert(id, entry);

        info!(node = %snapshot.id, provision_state = %snapshot.provision_state, "Created simulated node");
        Ok(snapshot)
    }

    async fn get(&self, ident: &str) -> Result<Node, BaremetalError> {
        self.record(SimulatedCall::Get(ident.to_string())).await;
        let nodes = self.nodes.lock().await;
        let id = resolve(&nodes, ident)?;
        nodes
            .get(&id)
            .map(SimulatedNode::snapshot)
            .ok_or_else(|| BaremetalError::node_not_found(ident))
    }

    async fn delete(&self, ident: &str, ignore_missing: bool) -> Result<(), BaremetalError> {
        self.record(SimulatedCall::Delete(ident.to_string())).await;
        let mut nodes = self.nodes.lock().await;
        let id = match resolve(&nodes, ident) {
            Ok(id) => id,
            Err(err) if ignore_missing => {
                debug!(node = %ident, error = %err, "Node already gone, ignoring");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        // Maintenance mode allows deleting nodes in any state
        if let Some(entry) = nodes.get(&id).filter(|entry| !entry.node.is_maintenance) {
            if entry.provisioning.is_busy() {
                return Err(conflict(format!(
                    "Node {id} is locked by host {SIMULATED_CONDUCTOR}, please retry after the current operation is completed."
                )));
            }
            if !entry.can_be_deleted() {
                return Err(conflict(format!(
                    "Can not delete node {id} while it is in state \"{}\".",
                    entry.provisioning.provision_state()
                )));
            }
        }
        nodes.remove(&id);
        info!(node = %id, "Deleted simulated node");
        Ok(())
    }

    async fn list(&self, query: &NodeQuery) -> Result<Vec<Node>, BaremetalError> {
        self.record(SimulatedCall::List).await;
        let nodes = self.nodes.lock().await;
        Ok(nodes
            .values()
            .map(SimulatedNode::snapshot)
            .filter(|node| query.matches(node))
            .collect())
    }

    async fn update(&self, ident: &str, patch: Vec<PatchOperation>) -> Result<Node, BaremetalError> {
        self.record(SimulatedCall::Update(ident.to_string())).await;
        let mut nodes = self.nodes.lock().await;
        let id = resolve(&nodes, ident)?;
        let current = nodes
            .get(&id)
            .map(SimulatedNode::snapshot)
            .ok_or_else(|| BaremetalError::node_not_found(ident))?;

        let mut updated = apply_patch(&current, &patch)?;
        if let Some(name) = &updated.name {
            if name_taken(&nodes, name, Some(&id)) {
                return Err(conflict(format!("A node with name {name} already exists.")));
            }
        }
        updated.updated_at = Some(Utc::now());

        let entry = nodes
            .get_mut(&id)
            .ok_or_else(|| BaremetalError::node_not_found(ident))?;
        entry.node = updated;
        Ok(entry.snapshot())
    }

    async fn set_maintenance(&self, ident: &str, reason: Option<String>) -> Result<(), BaremetalError> {
        self.record(SimulatedCall::SetMaintenance(ident.to_string())).await;
        let mut nodes = self.nodes.lock().await;
        let id = resolve(&nodes, ident)?;
        if let Some(entry) = nodes.get_mut(&id) {
            entry.node.is_maintenance = true;
            entry.node.maintenance_reason = reason;
        }
        Ok(())
    }

    async fn unset_maintenance(&self, ident: &str) -> Result<(), BaremetalError> {
        self.record(SimulatedCall::UnsetMaintenance(ident.to_string())).await;
        let mut nodes = self.nodes.lock().await;
        let id = resolve(&nodes, ident)?;
        if let Some(entry) = nodes.get_mut(&id) {
            entry.node.is_maintenance = false;
            entry.node.maintenance_reason = None;
        }
        Ok(())
    }
}

#[async_trait]
impl ProvisionTransport for SimulatedBaremetal {
    async fn request_transition(&self, ident: &str, request: &TransitionRequest) -> Result<(), BaremetalError> {
        self.record(SimulatedCall::Transition {
            node: ident.to_string(),
            verb: request.target,
        })
        .await;
        request.validate()?;

        let mut nodes = self.nodes.lock().await;
        let id = resolve(&nodes, ident)?;
        let Some(entry) = nodes.get_mut(&id) else {
            return Err(BaremetalError::node_not_found(ident));
        };
        entry
            .provisioning
            .request(request.target)
            .map_err(|message| BaremetalError::Transition {
                node: id.clone(),
                state: Some(entry.provisioning.provision_state().to_string()),
                message,
            })?;
        entry.node.provision_updated_at = Some(Utc::now());
        debug!(
            node = %id,
            verb = %request.target,
            provision_state = %entry.provisioning.provision_state(),
            "Simulated transition accepted"
        );
        Ok(())
    }

    async fn request_power_state(&self, ident: &str, target: TargetPowerState) -> Result<(), BaremetalError> {
        self.record(SimulatedCall::Power {
            node: ident.to_string(),
            target,
        })
        .await;

        let mut nodes = self.nodes.lock().await;
        let id = resolve(&nodes, ident)?;
        let Some(entry) = nodes.get_mut(&id) else {
            return Err(BaremetalError::node_not_found(ident));
        };
        // The node stays locked for the whole operation, so a retry cannot succeed
        if entry.provisioning.is_busy() {
            return Err(BaremetalError::Transition {
                node: id.clone(),
                state: Some(entry.provisioning.provision_state().to_string()),
                message: format!(
                    "Node {id} is locked by host {SIMULATED_CONDUCTOR}, please retry after the current operation is completed."
                ),
            });
        }
        if entry.provisioning.provision_state() == &ProvisionState::Enroll {
            return Err(BaremetalError::Transition {
                node: id,
                state: Some(ProvisionState::Enroll.to_string()),
                message: "Power state changes are not allowed for nodes in enroll".to_string(),
            });
        }
        entry.node.target_power_state = Some(target.expected_state());
        entry.pending_power = Some(target);
        Ok(())
    }

    async fn refresh(&self, ident: &str) -> Result<Node, BaremetalError> {
        self.record(SimulatedCall::Refresh(ident.to_string())).await;
        let mut nodes = self.nodes.lock().await;
        let id = resolve(&nodes, ident)?;
        let Some(entry) = nodes.get_mut(&id) else {
            return Err(BaremetalError::node_not_found(ident));
        };
        entry.advance();
        Ok(entry.snapshot())
    }
}
