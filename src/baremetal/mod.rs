// Bare metal node API: node access, provisioning state control and the
// services implementing them

pub mod accessor;
pub mod client;
pub mod errors;
pub mod provision;
pub mod proxy;
pub mod retry;
pub mod simulator;
pub mod state_machine;
pub mod types;

pub use accessor::{NodeAccessor, ProvisionTransport};
#[cfg(any(test, feature = "testing"))]
pub use accessor::{MockNodeAccessor, MockProvisionTransport};
pub use client::BaremetalClient;
pub use errors::BaremetalError;
pub use provision::{NodesWaitOutcome, ProvisionController};
pub use proxy::{Baremetal, ProvisionOptions};
pub use retry::{RetryConfig, RetryHandler};
pub use simulator::{SimulatedBaremetal, SimulatedCall};
pub use types::{
    ApiVersion, InitialProvisionState, Node, NodeIdentity, NodeQuery, NodeSpec, PatchOperation,
    PowerState, ProvisionState, ProvisionVerb, TargetPowerState, TransitionRequest,
};
