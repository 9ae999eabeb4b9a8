// Bare metal node client library
// Node CRUD and provisioning state control for an Ironic style bare metal API

pub mod baremetal;
pub mod cli;
pub mod config;
pub mod http;
pub mod observability;
pub mod telemetry;

// Re-export key types for easy access
pub use baremetal::{
    Baremetal, BaremetalClient, BaremetalError, Node, NodeQuery, NodeSpec, ProvisionOptions,
    ProvisionState, ProvisionVerb, SimulatedBaremetal,
};
pub use config::{config, BaremetalConfig};
pub use http::RateLimitedHttpClient;
pub use observability::{baremetal_metrics, BaremetalApiMetrics, OperationTimer};
pub use telemetry::{create_node_span, generate_correlation_id, init_telemetry};
