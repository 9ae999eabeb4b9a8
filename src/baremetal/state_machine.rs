//! Provisioning state machine of a simulated node.
//!
//! Mirrors the transitions the bare metal service allows. Transient states
//! settle after a configurable number of ticks, one tick per refresh.

use statig::prelude::*;

use super::types::{ProvisionState, ProvisionVerb};

/// Conductor name reported in `reservation` while a transition runs
pub const SIMULATED_CONDUCTOR: &str = "simulated-conductor";

#[derive(Debug, Clone, PartialEq, Eq)]
enum ProvisionEvent {
    Request(ProvisionVerb),
    Tick,
    InjectFailure(String),
    LegacyEnroll,
}

struct NodeProvisioning {
    provision_state: ProvisionState,
    target_provision_state: Option<ProvisionState>,
    last_error: Option<String>,
    reservation: Option<String>,
    remaining_ticks: u32,
    settle_after: u32,
    injected_failure: Option<String>,
    rejection: Option<String>,
}

impl NodeProvisioning {
    fn new(settle_after: u32) -> Self {
        Self {
            provision_state: ProvisionState::Enroll,
            target_provision_state: None,
            last_error: None,
            reservation: None,
            remaining_ticks: 0,
            settle_after: settle_after.max(1),
            injected_failure: None,
            rejection: None,
        }
    }

    /// Every accepted request ends up here, which clears a previous rejection
    fn enter(&mut self, state: ProvisionState) -> Outcome<State> {
        tracing::debug!(from = %self.provision_state, to = %state, "Simulated provision state change");
        self.rejection = None;
        self.provision_state = state.clone();
        Transition(state_for(&state))
    }

    /// Start an asynchronous transition towards `target`
    fn begin(&mut self, transient: ProvisionState, target: ProvisionState) -> Outcome<State> {
        self.target_provision_state = Some(target);
        self.last_error = None;
        self.reservation = Some(SIMULATED_CONDUCTOR.to_string());
        self.remaining_ticks = self.settle_after;
        self.enter(transient)
    }

    /// Finish the current transition in a stable state
    fn settle(&mut self, state: ProvisionState) -> Outcome<State> {
        self.target_provision_state = None;
        self.reservation = None;
        self.remaining_ticks = 0;
        self.enter(state)
    }

    fn fail(&mut self, message: String) -> Outcome<State> {
        let failed = failure_state(&self.provision_state);
        tracing::debug!(state = %self.provision_state, error = %message, "Simulated transition failed");
        self.last_error = Some(message);
        self.settle(failed)
    }

    fn reject(&mut self, verb: ProvisionVerb) -> Outcome<State> {
        self.rejection = Some(format!(
            "The requested action \"{verb}\" can not be performed on node while it is in state \"{}\".",
            self.provision_state
        ));
        Handled
    }
}

/// Stable state a failed transition leaves the node in
fn failure_state(transient: &ProvisionState) -> ProvisionState {
    match transient {
        ProvisionState::Verifying => ProvisionState::Enroll,
        ProvisionState::Inspecting => ProvisionState::InspectFailed,
        ProvisionState::Cleaning => ProvisionState::CleanFailed,
        ProvisionState::Deploying => ProvisionState::DeployFailed,
        ProvisionState::Rescuing => ProvisionState::RescueFailed,
        ProvisionState::Unrescuing => ProvisionState::UnrescueFailed,
        ProvisionState::Adopting => ProvisionState::AdoptFailed,
        _ => ProvisionState::Error,
    }
}

fn state_for(state: &ProvisionState) -> State {
    match state {
        ProvisionState::Enroll => State::enroll(),
        ProvisionState::Verifying => State::verifying(),
        ProvisionState::Manageable => State::manageable(),
        ProvisionState::Inspecting | ProvisionState::InspectWait => State::inspecting(),
        ProvisionState::InspectFailed => State::inspect_failed(),
        ProvisionState::Cleaning | ProvisionState::CleanWait => State::cleaning(),
        ProvisionState::CleanFailed => State::clean_failed(),
        ProvisionState::Available => State::available(),
        ProvisionState::Deploying | ProvisionState::WaitCallBack => State::deploying(),
        ProvisionState::DeployFailed => State::deploy_failed(),
        ProvisionState::Active => State::active(),
        ProvisionState::Deleting => State::deleting(),
        ProvisionState::Rescuing | ProvisionState::RescueWait => State::rescuing(),
        ProvisionState::RescueFailed => State::rescue_failed(),
        ProvisionState::Rescue => State::rescue(),
        ProvisionState::Unrescuing => State::unrescuing(),
        ProvisionState::UnrescueFailed => State::unrescue_failed(),
        ProvisionState::Adopting => State::adopting(),
        ProvisionState::AdoptFailed => State::adopt_failed(),
        ProvisionState::Error | ProvisionState::Other(_) => State::error(),
    }
}

#[state_machine(initial = "State::enroll()")]
impl NodeProvisioning {
    #[superstate]
    fn provisioning(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Request(verb) => self.reject(*verb),
            ProvisionEvent::InjectFailure(message) => {
                self.injected_failure = Some(message.clone());
                Handled
            }
            ProvisionEvent::Tick | ProvisionEvent::LegacyEnroll => Handled,
        }
    }

    #[superstate(superstate = "provisioning")]
    fn in_progress(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Tick if self.remaining_ticks > 1 => {
                self.remaining_ticks -= 1;
                Handled
            }
            ProvisionEvent::Tick => match self.injected_failure.take() {
                Some(message) => self.fail(message),
                None => {
                    let target = self
                        .target_provision_state
                        .clone()
                        .unwrap_or(ProvisionState::Available);
                    self.settle(target)
                }
            },
            _ => Super,
        }
    }

    #[state(superstate = "provisioning")]
    fn enroll(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Request(ProvisionVerb::Manage) => {
                self.begin(ProvisionState::Verifying, ProvisionState::Manageable)
            }
            ProvisionEvent::LegacyEnroll => self.settle(ProvisionState::Available),
            _ => Super,
        }
    }

    /// A failed verification leaves the node in enroll
    #[state(superstate = "in_progress")]
    fn verifying() -> Outcome<State> {
        Super
    }

    #[state(superstate = "provisioning")]
    fn manageable(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Request(ProvisionVerb::Provide) => {
                self.begin(ProvisionState::Cleaning, ProvisionState::Available)
            }
            ProvisionEvent::Request(ProvisionVerb::Inspect) => {
                self.begin(ProvisionState::Inspecting, ProvisionState::Manageable)
            }
            ProvisionEvent::Request(ProvisionVerb::Clean) => {
                self.begin(ProvisionState::Cleaning, ProvisionState::Manageable)
            }
            ProvisionEvent::Request(ProvisionVerb::Adopt) => {
                self.begin(ProvisionState::Adopting, ProvisionState::Active)
            }
            _ => Super,
        }
    }

    #[state(superstate = "in_progress")]
    fn inspecting(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Request(ProvisionVerb::Abort) => {
                self.fail("Inspection was aborted by request.".to_string())
            }
            _ => Super,
        }
    }

    #[state(superstate = "provisioning")]
    fn inspect_failed(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Request(ProvisionVerb::Manage) => self.settle(ProvisionState::Manageable),
            ProvisionEvent::Request(ProvisionVerb::Inspect) => {
                self.begin(ProvisionState::Inspecting, ProvisionState::Manageable)
            }
            _ => Super,
        }
    }

    #[state(superstate = "in_progress")]
    fn cleaning(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Request(ProvisionVerb::Abort) => {
                self.fail("Cleaning was aborted by request.".to_string())
            }
            _ => Super,
        }
    }

    #[state(superstate = "provisioning")]
    fn clean_failed(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Request(ProvisionVerb::Manage) => self.settle(ProvisionState::Manageable),
            _ => Super,
        }
    }

    #[state(superstate = "provisioning")]
    fn available(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Request(ProvisionVerb::Manage) => self.settle(ProvisionState::Manageable),
            ProvisionEvent::Request(ProvisionVerb::Active) => {
                self.begin(ProvisionState::Deploying, ProvisionState::Active)
            }
            _ => Super,
        }
    }

    #[state(superstate = "in_progress")]
    fn deploying() -> Outcome<State> {
        Super
    }

    #[state(superstate = "provisioning")]
    fn deploy_failed(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Request(ProvisionVerb::Active | ProvisionVerb::Rebuild) => {
                self.begin(ProvisionState::Deploying, ProvisionState::Active)
            }
            ProvisionEvent::Request(ProvisionVerb::Deleted) => {
                self.begin(ProvisionState::Deleting, ProvisionState::Available)
            }
            _ => Super,
        }
    }

    #[state(superstate = "provisioning")]
    fn active(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Request(ProvisionVerb::Rebuild) => {
                self.begin(ProvisionState::Deploying, ProvisionState::Active)
            }
            ProvisionEvent::Request(ProvisionVerb::Deleted) => {
                self.begin(ProvisionState::Deleting, ProvisionState::Available)
            }
            ProvisionEvent::Request(ProvisionVerb::Rescue) => {
                self.begin(ProvisionState::Rescuing, ProvisionState::Rescue)
            }
            _ => Super,
        }
    }

    /// Tearing down an instance is followed by automated cleaning
    #[state(superstate = "in_progress")]
    fn deleting(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Tick if self.remaining_ticks <= 1 => {
                match self.injected_failure.take() {
                    Some(message) => self.fail(message),
                    None => {
                        self.remaining_ticks = self.settle_after;
                        self.enter(ProvisionState::Cleaning)
                    }
                }
            }
            _ => Super,
        }
    }

    #[state(superstate = "provisioning")]
    fn error(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Request(ProvisionVerb::Rebuild) => {
                self.begin(ProvisionState::Deploying, ProvisionState::Active)
            }
            ProvisionEvent::Request(ProvisionVerb::Deleted) => {
                self.begin(ProvisionState::Deleting, ProvisionState::Available)
            }
            _ => Super,
        }
    }

    #[state(superstate = "in_progress")]
    fn rescuing(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Request(ProvisionVerb::Abort) => {
                self.fail("Rescue was aborted by request.".to_string())
            }
            _ => Super,
        }
    }

    #[state(superstate = "provisioning")]
    fn rescue(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Request(ProvisionVerb::Unrescue) => {
                self.begin(ProvisionState::Unrescuing, ProvisionState::Active)
            }
            ProvisionEvent::Request(ProvisionVerb::Rescue) => {
                self.begin(ProvisionState::Rescuing, ProvisionState::Rescue)
            }
            ProvisionEvent::Request(ProvisionVerb::Deleted) => {
                self.begin(ProvisionState::Deleting, ProvisionState::Available)
            }
            _ => Super,
        }
    }

    #[state(superstate = "provisioning")]
    fn rescue_failed(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Request(ProvisionVerb::Rescue) => {
                self.begin(ProvisionState::Rescuing, ProvisionState::Rescue)
            }
            ProvisionEvent::Request(ProvisionVerb::Unrescue) => {
                self.begin(ProvisionState::Unrescuing, ProvisionState::Active)
            }
            ProvisionEvent::Request(ProvisionVerb::Deleted) => {
                self.begin(ProvisionState::Deleting, ProvisionState::Available)
            }
            _ => Super,
        }
    }

    #[state(superstate = "in_progress")]
    fn unrescuing() -> Outcome<State> {
        Super
    }

    #[state(superstate = "provisioning")]
    fn unrescue_failed(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Request(ProvisionVerb::Unrescue) => {
                self.begin(ProvisionState::Unrescuing, ProvisionState::Active)
            }
            ProvisionEvent::Request(ProvisionVerb::Rescue) => {
                self.begin(ProvisionState::Rescuing, ProvisionState::Rescue)
            }
            ProvisionEvent::Request(ProvisionVerb::Deleted) => {
                self.begin(ProvisionState::Deleting, ProvisionState::Available)
            }
            _ => Super,
        }
    }

    #[state(superstate = "in_progress")]
    fn adopting() -> Outcome<State> {
        Super
    }

    #[state(superstate = "provisioning")]
    fn adopt_failed(&mut self, event: &ProvisionEvent) -> Outcome<State> {
        match event {
            ProvisionEvent::Request(ProvisionVerb::Adopt) => {
                self.begin(ProvisionState::Adopting, ProvisionState::Active)
            }
            ProvisionEvent::Request(ProvisionVerb::Manage) => self.settle(ProvisionState::Manageable),
            _ => Super,
        }
    }
}

/// Provisioning fields of a node as seen by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningSnapshot {
    pub provision_state: ProvisionState,
    pub target_provision_state: Option<ProvisionState>,
    pub last_error: Option<String>,
    pub reservation: Option<String>,
}

/// Provisioning state machine of one simulated node
pub struct ProvisioningMachine {
    machine: StateMachine<NodeProvisioning>,
}

impl ProvisioningMachine {
    /// A machine in `enroll` whose transient states last `settle_after` ticks
    pub fn new(settle_after: u32) -> Self {
        let machine = NodeProvisioning::new(settle_after).state_machine();
        Self { machine }
    }

    /// Request a transition. Returns the service error message when the
    /// verb is not allowed in the current state.
    pub fn request(&mut self, verb: ProvisionVerb) -> Result<(), String> {
        self.machine.handle(&ProvisionEvent::Request(verb));
        match &self.machine.inner().rejection {
            Some(message) => Err(message.clone()),
            None => Ok(()),
        }
    }

    /// Advance a running transition by one step
    pub fn tick(&mut self) {
        self.machine.handle(&ProvisionEvent::Tick);
    }

    /// Make the next transition that completes fail with `message`
    pub fn inject_failure(&mut self, message: impl Into<String>) {
        self.machine.handle(&ProvisionEvent::InjectFailure(message.into()));
    }

    /// Move a freshly created node straight to `available`, as services
    /// do for clients speaking an old API version
    pub fn legacy_enroll(&mut self) {
        self.machine.handle(&ProvisionEvent::LegacyEnroll);
    }

    pub fn provision_state(&self) -> &ProvisionState {
        &self.machine.inner().provision_state
    }

    pub fn is_busy(&self) -> bool {
        self.machine.inner().reservation.is_some()
    }

    pub fn snapshot(&self) -> ProvisioningSnapshot {
        let inner = self.machine.inner();
        ProvisioningSnapshot {
            provision_state: inner.provision_state.clone(),
            target_provision_state: inner.target_provision_state.clone(),
            last_error: inner.last_error.clone(),
            reservation: inner.reservation.clone(),
        }
    }
}
