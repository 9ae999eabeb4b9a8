use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// Bare metal API usage metrics
#[derive(Debug, Default)]
pub struct BaremetalApiMetrics {
    pub total_requests: AtomicU64,
    pub errors: AtomicU64,
    pub not_found: AtomicU64,
    pub transitions_requested: AtomicU64,
    pub state_polls: AtomicU64,
    pub wait_timeouts: AtomicU64,
}

impl BaremetalApiMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transition(&self) {
        self.transitions_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll(&self) {
        self.state_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.wait_timeouts.fetch_add(1, Ordering::Relaxed);
        warn!("Bare metal wait timed out");
    }

    pub fn get_stats(&self) -> BaremetalApiStats {
        BaremetalApiStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            transitions_requested: self.transitions_requested.load(Ordering::Relaxed),
            state_polls: self.state_polls.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Bare metal API metrics: requests={}, errors={}, not_found={}, transitions={}, polls={}, timeouts={}",
            stats.total_requests,
            stats.errors,
            stats.not_found,
            stats.transitions_requested,
            stats.state_polls,
            stats.wait_timeouts
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaremetalApiStats {
    pub total_requests: u64,
    pub errors: u64,
    pub not_found: u64,
    pub transitions_requested: u64,
    pub state_polls: u64,
    pub wait_timeouts: u64,
}

/// Global metrics instance
static BAREMETAL_METRICS: std::sync::LazyLock<BaremetalApiMetrics> =
    std::sync::LazyLock::new(BaremetalApiMetrics::new);

pub fn baremetal_metrics() -> &'static BaremetalApiMetrics {
    &BAREMETAL_METRICS
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = BaremetalApiMetrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_poll();
        metrics.record_not_found();

        let stats = metrics.get_stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.state_polls, 1);
        assert_eq!(stats.not_found, 1);
        assert_eq!(stats.errors, 0);
    }
}
