use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Instrument};

use super::accessor::{NodeAccessor, ProvisionTransport};
use super::client::BaremetalClient;
use super::errors::BaremetalError;
use super::provision::{NodesWaitOutcome, ProvisionController};
use super::types::{
    InitialProvisionState, Node, NodeIdentity, NodeQuery, NodeSpec, PatchOperation,
    ProvisionState, ProvisionVerb, TargetPowerState, TransitionRequest,
};
use crate::config::{BaremetalConfig, ProvisionConfig};
use crate::observability::OperationTimer;
use crate::telemetry::{create_node_span, generate_correlation_id};

/// Options of a provisioning state change
#[derive(Debug, Clone, Default)]
pub struct ProvisionOptions {
    /// Block until the node reaches the verb's stable state
    pub wait: bool,
    /// Wait timeout, the configured default when unset
    pub timeout: Option<Duration>,
    /// Config drive for `active` and `rebuild`
    pub config_drive: Option<String>,
    /// Clean steps, required for `clean`
    pub clean_steps: Option<Vec<Value>>,
    /// Rescue password, required for `rescue`
    pub rescue_password: Option<String>,
}

impl ProvisionOptions {
    pub fn waiting() -> Self {
        Self {
            wait: true,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_config_drive(mut self, config_drive: impl Into<String>) -> Self {
        self.config_drive = Some(config_drive.into());
        self
    }

    pub fn with_clean_steps(mut self, clean_steps: Vec<Value>) -> Self {
        self.clean_steps = Some(clean_steps);
        self
    }

    pub fn with_rescue_password(mut self, password: impl Into<String>) -> Self {
        self.rescue_password = Some(password.into());
        self
    }

    fn request_for(&self, verb: ProvisionVerb) -> TransitionRequest {
        TransitionRequest {
            target: verb,
            config_drive: self.config_drive.clone(),
            clean_steps: self.clean_steps.clone(),
            rescue_password: self.rescue_password.clone(),
        }
    }
}

/// Bare metal service proxy.
///
/// Every method taking a node accepts a [`Node`] or its UUID or name.
pub struct Baremetal<S: ?Sized> {
    service: Arc<S>,
    controller: ProvisionController<S>,
}

impl<S: ?Sized> Clone for Baremetal<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            controller: self.controller.clone(),
        }
    }
}

impl Baremetal<BaremetalClient> {
    /// Connect to the REST API described by `config`
    pub fn connect(config: &BaremetalConfig) -> Result<Self, BaremetalError> {
        let client = BaremetalClient::new(config)?;
        Ok(Self::new(Arc::new(client), config.provision.clone()))
    }
}

impl<S: NodeAccessor + ProvisionTransport + ?Sized> Baremetal<S> {
    pub fn new(service: Arc<S>, config: ProvisionConfig) -> Self {
        let controller = ProvisionController::new(Arc::clone(&service), config);
        Self {
            service,
            controller,
        }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    pub fn controller(&self) -> &ProvisionController<S> {
        &self.controller
    }

    /// Create a node and bring it to the requested initial state.
    ///
    /// Nodes requested in `manageable`, and `available` nodes the service
    /// enrolled because of a resource class, are driven there with waiting
    /// transitions before returning.
    pub async fn create_node(&self, spec: &NodeSpec) -> Result<Node, BaremetalError> {
        let span = create_node_span("create_node", spec.name.as_deref(), &generate_correlation_id());
        async {
            let node = self.service.create(spec).await?;
            let node = match spec.initial_state() {
                InitialProvisionState::Enroll => node,
                InitialProvisionState::Manageable if node.provision_state == ProvisionState::Enroll => {
                    self.drive(&node.id, &[ProvisionVerb::Manage]).await?
                }
                InitialProvisionState::Available if node.provision_state == ProvisionState::Enroll => {
                    self.drive(&node.id, &[ProvisionVerb::Manage, ProvisionVerb::Provide])
                        .await?
                }
                _ => node,
            };
            info!(node = %node.id, name = %node.display_name(), provision_state = %node.provision_state, "Node ready");
            Ok(node)
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, ident: &str, verbs: &[ProvisionVerb]) -> Result<Node, BaremetalError> {
        let mut node = None;
        for verb in verbs {
            node = Some(
                self.controller
                    .set_provision_state(ident, &TransitionRequest::new(*verb), true, None)
                    .await?,
            );
        }
        match node {
            Some(node) => Ok(node),
            None => self.service.get(ident).await,
        }
    }

    /// Get a node by UUID or name
    pub async fn get_node<N: NodeIdentity + ?Sized>(&self, node: &N) -> Result<Node, BaremetalError> {
        self.service.get(node.node_ident()).await
    }

    /// Find a node by UUID or name. A missing node yields `None` when
    /// `ignore_missing` is set and a not found error otherwise.
    pub async fn find_node<N: NodeIdentity + ?Sized>(
        &self,
        node: &N,
        ignore_missing: bool,
    ) -> Result<Option<Node>, BaremetalError> {
        self.service.find(node.node_ident(), ignore_missing).await
    }

    /// Delete a node. Deleting a missing node succeeds when `ignore_missing`
    /// is set.
    pub async fn delete_node<N: NodeIdentity + ?Sized>(
        &self,
        node: &N,
        ignore_missing: bool,
    ) -> Result<(), BaremetalError> {
        let ident = node.node_ident();
        let span = create_node_span("delete_node", Some(ident), &generate_correlation_id());
        self.service
            .delete(ident, ignore_missing)
            .instrument(span)
            .await
    }

    /// List nodes, following pagination
    pub async fn nodes(&self, query: &NodeQuery) -> Result<Vec<Node>, BaremetalError> {
        self.service.list(query).await
    }

    pub async fn update_node<N: NodeIdentity + ?Sized>(
        &self,
        node: &N,
        patch: Vec<PatchOperation>,
    ) -> Result<Node, BaremetalError> {
        self.service.update(node.node_ident(), patch).await
    }

    /// Put a node into maintenance mode and return the updated node
    pub async fn set_node_maintenance<N: NodeIdentity + ?Sized>(
        &self,
        node: &N,
        reason: Option<&str>,
    ) -> Result<Node, BaremetalError> {
        let ident = node.node_ident();
        self.service
            .set_maintenance(ident, reason.map(str::to_string))
            .await?;
        self.service.get(ident).await
    }

    pub async fn unset_node_maintenance<N: NodeIdentity + ?Sized>(&self, node: &N) -> Result<Node, BaremetalError> {
        let ident = node.node_ident();
        self.service.unset_maintenance(ident).await?;
        self.service.get(ident).await
    }

    /// Run a provisioning action on a node.
    ///
    /// With `options.wait` this returns once the node reached the verb's
    /// stable state and fails with a transition error if it lands in a
    /// failure state, or a timeout error once `options.timeout` passes.
    pub async fn set_node_provision_state<N: NodeIdentity + ?Sized>(
        &self,
        node: &N,
        verb: ProvisionVerb,
        options: ProvisionOptions,
    ) -> Result<Node, BaremetalError> {
        let ident = node.node_ident();
        let span = create_node_span("set_node_provision_state", Some(ident), &generate_correlation_id());
        let timer = OperationTimer::new(&format!("provision {verb}"));
        let result = self
            .controller
            .set_provision_state(ident, &options.request_for(verb), options.wait, options.timeout)
            .instrument(span)
            .await;
        timer.finish();
        result
    }

    /// Wait for several nodes to reach `expected`
    pub async fn wait_for_nodes_provision_state<N: NodeIdentity>(
        &self,
        nodes: &[N],
        expected: &ProvisionState,
        timeout: Option<Duration>,
        abort_on_failed_state: bool,
    ) -> Result<NodesWaitOutcome, BaremetalError> {
        let idents: Vec<String> = nodes.iter().map(|node| node.node_ident().to_string()).collect();
        let span = create_node_span("wait_for_nodes_provision_state", None, &generate_correlation_id());
        self.controller
            .wait_for_nodes_provision_state(&idents, expected, timeout, abort_on_failed_state)
            .instrument(span)
            .await
    }

    pub async fn set_node_power_state<N: NodeIdentity + ?Sized>(
        &self,
        node: &N,
        target: TargetPowerState,
        wait: bool,
        timeout: Option<Duration>,
    ) -> Result<Node, BaremetalError> {
        let ident = node.node_ident();
        let span = create_node_span("set_node_power_state", Some(ident), &generate_correlation_id());
        self.controller
            .set_power_state(ident, target, wait, timeout)
            .instrument(span)
            .await
    }

    /// Wait until no conductor holds a lock on the node
    pub async fn wait_for_node_reservation<N: NodeIdentity + ?Sized>(
        &self,
        node: &N,
        timeout: Option<Duration>,
    ) -> Result<Node, BaremetalError> {
        self.controller
            .wait_for_reservation(node.node_ident(), timeout)
            .await
    }
}
