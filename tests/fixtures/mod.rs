//! Shared fixture for the functional tests: a simulated bare metal service
//! plus bookkeeping that deletes every node a test created, whether the test
//! passes, fails or panics.
#![allow(dead_code)]

use baremetal_nodes::baremetal::{
    Baremetal, BaremetalError, Node, NodeIdentity, NodeSpec, SimulatedBaremetal,
};
use baremetal_nodes::config::ProvisionConfig;
use std::future::Future;
use std::sync::{Arc, Mutex};

pub const TEST_DRIVER: &str = "fake-hardware";

/// Poll fast so that tests on the real clock finish quickly
pub fn fast_provision_config() -> ProvisionConfig {
    ProvisionConfig {
        poll_interval_ms: 10,
        jitter_ratio: 0.1,
        default_timeout_seconds: 30,
    }
}

pub struct NodeFixture {
    pub service: Arc<SimulatedBaremetal>,
    pub baremetal: Baremetal<SimulatedBaremetal>,
    created: Mutex<Vec<String>>,
}

impl NodeFixture {
    pub fn new() -> Self {
        Self::with_settle_after(2)
    }

    /// Transient states last `refreshes` polls
    pub fn with_settle_after(refreshes: u32) -> Self {
        Self::with_config(refreshes, fast_provision_config())
    }

    pub fn with_config(refreshes: u32, config: ProvisionConfig) -> Self {
        let service = Arc::new(SimulatedBaremetal::with_settle_after(refreshes));
        let baremetal = Baremetal::new(Arc::clone(&service), config);
        Self {
            service,
            baremetal,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Create a node through the proxy and remember it for cleanup
    pub async fn create_node(&self, spec: NodeSpec) -> Result<Node, BaremetalError> {
        let node = self.baremetal.create_node(&spec).await?;
        self.track(&node);
        Ok(node)
    }

    /// Create a node named `name` with the test driver
    pub async fn create_named(&self, name: &str) -> Node {
        self.create_node(NodeSpec::new(TEST_DRIVER).with_name(name))
            .await
            .expect("node creation should succeed")
    }

    pub fn track<N: NodeIdentity + ?Sized>(&self, node: &N) {
        self.created
            .lock()
            .expect("cleanup list poisoned")
            .push(node.node_ident().to_string());
    }

    /// Delete every tracked node, ignoring nodes that are already gone.
    /// Returns the number of nodes that could not be deleted.
    pub async fn cleanup(&self) -> usize {
        let idents: Vec<String> = std::mem::take(&mut *self.created.lock().expect("cleanup list poisoned"));
        let mut leaked = 0;
        for ident in idents {
            if self.baremetal.delete_node(&ident, true).await.is_ok() {
                continue;
            }
            // Busy or deployed nodes can still be removed in maintenance
            if let Err(err) = self.baremetal.set_node_maintenance(&ident, Some("test cleanup")).await {
                if !err.is_not_found() {
                    eprintln!("failed to put node {ident} into maintenance: {err}");
                }
            }
            if let Err(err) = self.baremetal.delete_node(&ident, true).await {
                eprintln!("failed to clean up node {ident}: {err}");
                leaked += 1;
            }
        }
        leaked
    }

    /// Run a test body and clean up afterwards, re-raising a panic from the
    /// body once the nodes are gone
    pub async fn run<F, Fut>(self, body: F)
    where
        F: FnOnce(Arc<NodeFixture>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fixture = Arc::new(self);
        let outcome = tokio::spawn(body(Arc::clone(&fixture))).await;
        let leaked = fixture.cleanup().await;
        match outcome {
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => panic!("test body did not finish: {err}"),
            Ok(()) => assert_eq!(leaked, 0, "nodes leaked by the test"),
        }
    }
}
