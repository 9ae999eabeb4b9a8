//! Provisioning state controller.
//!
//! Requests state changes through a [`ProvisionTransport`] and optionally
//! blocks until the node settles. Waiting polls the node, sleeping the
//! configured interval plus jitter between polls, and ends in one of three
//! ways: the expected state is reached, the node lands in a failure state, or
//! the deadline passes.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::accessor::ProvisionTransport;
use super::errors::BaremetalError;
use super::types::{Node, PowerState, ProvisionState, TargetPowerState, TransitionRequest};
use crate::config::ProvisionConfig;
use crate::observability::baremetal_metrics;

/// Result of waiting on several nodes without aborting on failures
#[derive(Debug, Clone, Default)]
pub struct NodesWaitOutcome {
    /// Nodes that reached the expected state
    pub reached: Vec<Node>,
    /// Nodes that ended up in a failure state
    pub failed: Vec<Node>,
}

pub struct ProvisionController<T: ?Sized> {
    transport: Arc<T>,
    config: ProvisionConfig,
}

impl<T: ?Sized> Clone for ProvisionController<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
        }
    }
}

enum PollState {
    Reached,
    Pending,
    Failed,
}

/// Classify a node snapshot while waiting for `expected`
fn provision_progress(node: &Node, expected: &ProvisionState) -> PollState {
    if &node.provision_state == expected {
        PollState::Reached
    } else if node.provision_state.is_failure() {
        PollState::Failed
    } else if expected == &ProvisionState::Manageable
        && node.provision_state == ProvisionState::Enroll
        && node.last_error.is_some()
    {
        // Verification failed and the service moved the node back to enroll
        PollState::Failed
    } else {
        PollState::Pending
    }
}

fn transition_failure(node: &Node) -> BaremetalError {
    BaremetalError::Transition {
        node: node.id.clone(),
        state: Some(node.provision_state.to_string()),
        message: node
            .last_error
            .clone()
            .unwrap_or_else(|| "no error reported by the service".to_string()),
    }
}

impl<T: ProvisionTransport + ?Sized> ProvisionController<T> {
    pub fn new(transport: Arc<T>, config: ProvisionConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Poll interval with a random extra of up to `jitter_ratio` of it
    fn next_delay(&self) -> Duration {
        let interval = self.config.poll_interval();
        if self.config.jitter_ratio <= 0.0 {
            return interval;
        }
        let jitter = rand::rng().random_range(0.0..=self.config.jitter_ratio);
        interval.mul_f64(1.0 + jitter)
    }

    fn deadline_passed(&self, deadline: Option<Instant>) -> bool {
        deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Next poll delay, clipped so the last poll lands on the deadline
    fn delay_before(&self, deadline: Option<Instant>) -> Duration {
        let delay = self.next_delay();
        match deadline {
            Some(deadline) => delay.min(deadline.saturating_duration_since(Instant::now())),
            None => delay,
        }
    }

    fn timeout_or_default(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or_else(|| self.config.default_timeout())
    }

    /// Refresh the node until `check` accepts it or the timeout elapses.
    ///
    /// Errors from `check` and from the transport end the wait immediately.
    async fn poll_until<F>(
        &self,
        ident: &str,
        operation: &str,
        timeout: Duration,
        mut check: F,
    ) -> Result<Node, BaremetalError>
    where
        F: FnMut(&Node) -> Result<bool, BaremetalError>,
    {
        let started = Instant::now();
        // A timeout past what the clock can represent never expires
        let deadline = started.checked_add(timeout);
        loop {
            let node = self.transport.refresh(ident).await?;
            baremetal_metrics().record_poll();
            if check(&node)? {
                debug!(node = %ident, operation, elapsed_ms = started.elapsed().as_millis(), "Wait finished");
                return Ok(node);
            }

            if self.deadline_passed(deadline) {
                baremetal_metrics().record_timeout();
                return Err(BaremetalError::Timeout {
                    node: ident.to_string(),
                    operation: operation.to_string(),
                    waited: timeout,
                });
            }
            sleep(self.delay_before(deadline)).await;
        }
    }

    /// Request a provisioning transition and, with `wait`, block until the
    /// node reaches the verb's stable state.
    ///
    /// Without `wait` the node is refreshed once and returned as is.
    pub async fn set_provision_state(
        &self,
        ident: &str,
        request: &TransitionRequest,
        wait: bool,
        timeout: Option<Duration>,
    ) -> Result<Node, BaremetalError> {
        let expected = match (wait, request.target.expected_state()) {
            (true, None) => {
                return Err(BaremetalError::InvalidArgument(format!(
                    "cannot wait for the {} action, it has no stable target state",
                    request.target
                )))
            }
            (_, expected) => expected,
        };

        request.validate()?;
        self.transport.request_transition(ident, request).await?;
        info!(node = %ident, verb = %request.target, wait, "Provision state change requested");

        match expected {
            Some(expected) if wait => {
                self.wait_for_provision_state(ident, &expected, timeout, true)
                    .await
            }
            _ => self.transport.refresh(ident).await,
        }
    }

    /// Wait for a node to reach `expected`.
    ///
    /// With `abort_on_failed_state` a failure state ends the wait with a
    /// transition error carrying the node's `last_error`; without it the
    /// wait continues until the deadline.
    pub async fn wait_for_provision_state(
        &self,
        ident: &str,
        expected: &ProvisionState,
        timeout: Option<Duration>,
        abort_on_failed_state: bool,
    ) -> Result<Node, BaremetalError> {
        let timeout = self.timeout_or_default(timeout);
        let operation = format!("reach provision state {expected}");
        self.poll_until(ident, &operation, timeout, |node| {
            match provision_progress(node, expected) {
                PollState::Reached => Ok(true),
                PollState::Failed if abort_on_failed_state => {
                    warn!(
                        node = %node.id,
                        provision_state = %node.provision_state,
                        last_error = node.last_error.as_deref().unwrap_or_default(),
                        "Node failed to reach {}",
                        expected
                    );
                    Err(transition_failure(node))
                }
                PollState::Failed | PollState::Pending => {
                    debug!(
                        node = %node.id,
                        provision_state = %node.provision_state,
                        target = ?node.target_provision_state,
                        "Still waiting for {}",
                        expected
                    );
                    Ok(false)
                }
            }
        })
        .await
    }

    /// Wait for several nodes to reach `expected`.
    ///
    /// With `abort_on_failed_state` the first failed node ends the wait with
    /// a transition error, otherwise failed nodes are collected in the
    /// outcome. Nodes still pending at the deadline yield a timeout error.
    pub async fn wait_for_nodes_provision_state(
        &self,
        idents: &[String],
        expected: &ProvisionState,
        timeout: Option<Duration>,
        abort_on_failed_state: bool,
    ) -> Result<NodesWaitOutcome, BaremetalError> {
        let timeout = self.timeout_or_default(timeout);
        let deadline = Instant::now().checked_add(timeout);
        let mut pending: Vec<&str> = idents.iter().map(String::as_str).collect();
        let mut outcome = NodesWaitOutcome::default();

        loop {
            let mut still_pending = Vec::with_capacity(pending.len());
            for ident in pending {
                let node = self.transport.refresh(ident).await?;
                baremetal_metrics().record_poll();
                match provision_progress(&node, expected) {
                    PollState::Reached => outcome.reached.push(node),
                    PollState::Failed if abort_on_failed_state => {
                        return Err(transition_failure(&node))
                    }
                    PollState::Failed => outcome.failed.push(node),
                    PollState::Pending => still_pending.push(ident),
                }
            }
            pending = still_pending;

            if pending.is_empty() {
                info!(
                    reached = outcome.reached.len(),
                    failed = outcome.failed.len(),
                    "Finished waiting for nodes to reach {}",
                    expected
                );
                return Ok(outcome);
            }

            if self.deadline_passed(deadline) {
                baremetal_metrics().record_timeout();
                return Err(BaremetalError::Timeout {
                    node: pending.join(", "),
                    operation: format!("reach provision state {expected}"),
                    waited: timeout,
                });
            }
            sleep(self.delay_before(deadline)).await;
        }
    }

    /// Request a power state change and, with `wait`, block until the node
    /// reports the resulting power state
    pub async fn set_power_state(
        &self,
        ident: &str,
        target: TargetPowerState,
        wait: bool,
        timeout: Option<Duration>,
    ) -> Result<Node, BaremetalError> {
        self.transport.request_power_state(ident, target).await?;
        info!(node = %ident, target = %target, wait, "Power state change requested");

        if wait {
            self.wait_for_power_state(ident, &target.expected_state(), timeout)
                .await
        } else {
            self.transport.refresh(ident).await
        }
    }

    pub async fn wait_for_power_state(
        &self,
        ident: &str,
        expected: &PowerState,
        timeout: Option<Duration>,
    ) -> Result<Node, BaremetalError> {
        let timeout = self.timeout_or_default(timeout);
        let operation = format!("reach power state {expected}");
        self.poll_until(ident, &operation, timeout, |node| {
            match &node.power_state {
                Some(state) if state == expected => Ok(true),
                Some(PowerState::Error) => Err(BaremetalError::Transition {
                    node: node.id.clone(),
                    state: Some(PowerState::Error.to_string()),
                    message: node
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "power state error".to_string()),
                }),
                _ => Ok(false),
            }
        })
        .await
    }

    /// Wait until no conductor holds the node lock
    pub async fn wait_for_reservation(&self, ident: &str, timeout: Option<Duration>) -> Result<Node, BaremetalError> {
        let timeout = self.timeout_or_default(timeout);
        self.poll_until(ident, "release its reservation", timeout, |node| {
            Ok(node.reservation.is_none())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baremetal::accessor::MockProvisionTransport;
    use crate::baremetal::types::ProvisionVerb;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::assert_err;

    fn node_in(state: ProvisionState) -> Node {
        serde_json::from_value(serde_json::json!({
            "uuid": "8a2c5f3e-9b1d-4f7a-a6e2-0c4d1b2e3f40",
            "name": "node-0",
            "driver": "fake-hardware",
            "provision_state": state.as_str(),
        }))
        .unwrap()
    }

    fn failed_node(state: ProvisionState, error: &str) -> Node {
        Node {
            last_error: Some(error.to_string()),
            ..node_in(state)
        }
    }

    fn controller(transport: MockProvisionTransport) -> ProvisionController<MockProvisionTransport> {
        ProvisionController::new(Arc::new(transport), ProvisionConfig::default())
    }

    /// Mock whose refreshes return `states` in order, repeating the last one
    fn refreshing(states: Vec<Node>, counter: Arc<AtomicUsize>) -> MockProvisionTransport {
        let mut transport = MockProvisionTransport::new();
        transport
            .expect_request_transition()
            .times(1)
            .returning(|_, _| Ok(()));
        transport.expect_refresh().returning(move |_| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            Ok(states[call.min(states.len() - 1)].clone())
        });
        transport
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_once_expected_state_is_reached() {
        let polls = Arc::new(AtomicUsize::new(0));
        let transport = refreshing(
            vec![
                node_in(ProvisionState::Deploying),
                node_in(ProvisionState::WaitCallBack),
                node_in(ProvisionState::Active),
            ],
            polls.clone(),
        );

        let node = controller(transport)
            .set_provision_state(
                "node-0",
                &TransitionRequest::new(ProvisionVerb::Active),
                true,
                Some(Duration::from_secs(60)),
            )
            .await
            .unwrap();

        assert_eq!(node.provision_state, ProvisionState::Active);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_state_surfaces_last_error() {
        let polls = Arc::new(AtomicUsize::new(0));
        let transport = refreshing(
            vec![
                node_in(ProvisionState::Deploying),
                failed_node(ProvisionState::DeployFailed, "Image checksum mismatch"),
            ],
            polls.clone(),
        );

        let err = controller(transport)
            .set_provision_state(
                "node-0",
                &TransitionRequest::new(ProvisionVerb::Active),
                true,
                None,
            )
            .await
            .unwrap_err();

        match err {
            BaremetalError::Transition { state, message, .. } => {
                assert_eq!(state.as_deref(), Some("deploy failed"));
                assert_eq!(message, "Image checksum mismatch");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verification_failure_while_waiting_for_manageable() {
        let transport = refreshing(
            vec![
                node_in(ProvisionState::Verifying),
                failed_node(ProvisionState::Enroll, "Failed to validate power driver interface"),
            ],
            Arc::new(AtomicUsize::new(0)),
        );

        let err = controller(transport)
            .set_provision_state(
                "node-0",
                &TransitionRequest::new(ProvisionVerb::Manage),
                true,
                None,
            )
            .await
            .unwrap_err();
        assert!(err.is_transition());
        assert!(err.to_string().contains("Failed to validate power driver interface"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_yields_timeout_without_further_polls() {
        let polls = Arc::new(AtomicUsize::new(0));
        let transport = refreshing(vec![node_in(ProvisionState::Cleaning)], polls.clone());
        let timeout = Duration::from_secs(10);

        let started = Instant::now();
        let err = controller(transport)
            .set_provision_state(
                "node-0",
                &TransitionRequest::new(ProvisionVerb::Provide),
                true,
                Some(timeout),
            )
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        let elapsed = started.elapsed();
        assert!(elapsed >= timeout, "returned early after {elapsed:?}");
        assert!(elapsed < timeout + Duration::from_secs(1), "overslept: {elapsed:?}");

        // 500ms to 625ms between polls over 10s, plus the final poll at the deadline
        let count = polls.load(Ordering::SeqCst);
        assert!((16..=22).contains(&count), "unexpected poll count {count}");

        sleep(Duration::from_secs(5)).await;
        assert_eq!(polls.load(Ordering::SeqCst), count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_waits_without_deadline() {
        let polls = Arc::new(AtomicUsize::new(0));
        let transport = refreshing(
            vec![
                node_in(ProvisionState::Verifying),
                node_in(ProvisionState::Verifying),
                node_in(ProvisionState::Manageable),
            ],
            polls.clone(),
        );

        let node = controller(transport)
            .set_provision_state(
                "node-0",
                &TransitionRequest::new(ProvisionVerb::Manage),
                true,
                Some(Duration::MAX),
            )
            .await
            .unwrap();
        assert_eq!(node.provision_state, ProvisionState::Manageable);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_for_several_nodes() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let mut transport = MockProvisionTransport::new();
        transport.expect_refresh().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(node_in(ProvisionState::Cleaning))
            } else {
                Ok(node_in(ProvisionState::Available))
            }
        });

        let outcome = controller(transport)
            .wait_for_nodes_provision_state(
                &["node-0".to_string()],
                &ProvisionState::Available,
                Some(Duration::from_secs(u64::MAX)),
                true,
            )
            .await
            .unwrap();
        assert_eq!(outcome.reached.len(), 1);
        assert!(outcome.failed.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_request_never_reaches_the_service() {
        let mut transport = MockProvisionTransport::new();
        transport.expect_request_transition().never();
        transport.expect_refresh().never();
        let controller = controller(transport);

        let err = controller
            .set_provision_state("node-0", &TransitionRequest::new(ProvisionVerb::Clean), true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BaremetalError::InvalidArgument(_)));

        let err = controller
            .set_provision_state("node-0", &TransitionRequest::new(ProvisionVerb::Rescue), true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BaremetalError::InvalidArgument(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_state_is_ignored_when_not_aborting() {
        let mut transport = MockProvisionTransport::new();
        transport
            .expect_refresh()
            .returning(|_| Ok(failed_node(ProvisionState::CleanFailed, "disk wipe failed")));

        let err = controller(transport)
            .wait_for_provision_state(
                "node-0",
                &ProvisionState::Available,
                Some(Duration::from_secs(2)),
                false,
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_vanishing_mid_wait_propagates_not_found() {
        let polls = Arc::new(AtomicUsize::new(0));
        let mut transport = MockProvisionTransport::new();
        transport.expect_request_transition().returning(|_, _| Ok(()));
        let counter = polls.clone();
        transport.expect_refresh().returning(move |ident| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(node_in(ProvisionState::Deleting))
            } else {
                Err(BaremetalError::node_not_found(ident))
            }
        });

        let result = controller(transport)
            .set_provision_state(
                "node-0",
                &TransitionRequest::new(ProvisionVerb::Deleted),
                true,
                None,
            )
            .await;
        let err = assert_err!(result);
        assert!(err.is_not_found());
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_abort_cannot_be_waited_on() {
        // No expectations: any transport call would panic
        let transport = MockProvisionTransport::new();
        let err = controller(transport)
            .set_provision_state("node-0", &TransitionRequest::new(ProvisionVerb::Abort), true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BaremetalError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_without_wait_refreshes_once() {
        let polls = Arc::new(AtomicUsize::new(0));
        let transport = refreshing(vec![node_in(ProvisionState::Deploying)], polls.clone());

        let node = controller(transport)
            .set_provision_state("node-0", &TransitionRequest::new(ProvisionVerb::Active), false, None)
            .await
            .unwrap();
        assert_eq!(node.provision_state, ProvisionState::Deploying);
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_request_is_not_polled() {
        let mut transport = MockProvisionTransport::new();
        transport.expect_request_transition().returning(|ident, request| {
            Err(BaremetalError::Transition {
                node: ident.to_string(),
                state: None,
                message: format!("cannot {} in enroll", request.target),
            })
        });
        transport.expect_refresh().never();

        let err = controller(transport)
            .set_provision_state("node-0", &TransitionRequest::new(ProvisionVerb::Provide), true, None)
            .await
            .unwrap_err();
        assert!(err.is_transition());
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_wait() {
        let mut transport = MockProvisionTransport::new();
        transport
            .expect_request_power_state()
            .withf(|ident, target| ident == "node-0" && *target == TargetPowerState::PowerOn)
            .times(1)
            .returning(|_, _| Ok(()));
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        transport.expect_refresh().returning(move |_| {
            let mut node = node_in(ProvisionState::Available);
            if counter.fetch_add(1, Ordering::SeqCst) > 0 {
                node.power_state = Some(PowerState::PowerOn);
            } else {
                node.power_state = Some(PowerState::PowerOff);
                node.target_power_state = Some(PowerState::PowerOn);
            }
            Ok(node)
        });

        let node = controller(transport)
            .set_power_state("node-0", TargetPowerState::PowerOn, true, None)
            .await
            .unwrap();
        assert_eq!(node.power_state, Some(PowerState::PowerOn));
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_reservation() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let mut transport = MockProvisionTransport::new();
        transport.expect_refresh().returning(move |_| {
            let mut node = node_in(ProvisionState::Cleaning);
            if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                node.reservation = Some("conductor-1".to_string());
            }
            Ok(node)
        });

        let node = controller(transport)
            .wait_for_reservation("node-0", Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(node.reservation, None);
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_delay_stays_within_jitter_bounds() {
        let controller = controller(MockProvisionTransport::new());
        for _ in 0..100 {
            let delay = controller.next_delay();
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(625));
        }

        let mut config = ProvisionConfig::default();
        config.jitter_ratio = 0.0;
        let fixed = ProvisionController::new(Arc::new(MockProvisionTransport::new()), config);
        assert_eq!(fixed.next_delay(), Duration::from_millis(500));
    }
}
