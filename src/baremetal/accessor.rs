//! Collaborator interfaces of the provisioning controller.
//!
//! Both the REST client and the in-memory simulator implement these, which
//! lets every caller-facing operation run against either.

use async_trait::async_trait;

use super::errors::BaremetalError;
use super::types::{Node, NodeQuery, NodeSpec, PatchOperation, TargetPowerState, TransitionRequest};

/// Create, read, update and delete nodes
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait NodeAccessor: Send + Sync {
    /// Create a node. The service picks the initial provision state from
    /// `spec.provision_state`: `available` nodes are created directly in
    /// `available`, the others start in `enroll`.
    async fn create(&self, spec: &NodeSpec) -> Result<Node, BaremetalError>;

    /// Fetch a node by UUID or name
    async fn get(&self, ident: &str) -> Result<Node, BaremetalError>;

    /// Like `get`, returning `None` for a missing node when `ignore_missing` is set
    async fn find(&self, ident: &str, ignore_missing: bool) -> Result<Option<Node>, BaremetalError> {
        match self.get(ident).await {
            Ok(node) => Ok(Some(node)),
            Err(err) if ignore_missing && err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Delete a node. A missing node is an error unless `ignore_missing` is set.
    async fn delete(&self, ident: &str, ignore_missing: bool) -> Result<(), BaremetalError>;

    /// List nodes matching the query, following pagination
    async fn list(&self, query: &NodeQuery) -> Result<Vec<Node>, BaremetalError>;

    /// Apply a JSON patch to a node
    async fn update(&self, ident: &str, patch: Vec<PatchOperation>) -> Result<Node, BaremetalError>;

    async fn set_maintenance(&self, ident: &str, reason: Option<String>) -> Result<(), BaremetalError>;

    async fn unset_maintenance(&self, ident: &str) -> Result<(), BaremetalError>;
}

/// Issue asynchronous state changes and observe their progress
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ProvisionTransport: Send + Sync {
    /// Ask the service to start a provisioning transition. Returns once the
    /// request is acknowledged, not once the transition completes.
    async fn request_transition(&self, ident: &str, request: &TransitionRequest) -> Result<(), BaremetalError>;

    /// Ask the service to change the power state
    async fn request_power_state(&self, ident: &str, target: TargetPowerState) -> Result<(), BaremetalError>;

    /// Fetch a fresh snapshot of the node
    async fn refresh(&self, ident: &str) -> Result<Node, BaremetalError>;
}
