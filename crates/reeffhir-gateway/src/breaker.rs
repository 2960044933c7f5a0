//! Process-wide circuit breaker shared by all tenants.
//!
//! State transitions:
//! - closed → open on a connectivity-class error;
//! - open → closed when a probe call succeeds after the reset timeout, or on
//!   a manual reset;
//! - while open and inside the timeout window, every admission is rejected
//!   without touching the database.
//!
//! Exactly one structured log line is emitted per transition
//! (OPEN / CLOSE / MANUAL_RESET); the failure path stays otherwise silent.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use time::OffsetDateTime;

use crate::error::ClusterError;

/// Decision for one call attempting to pass the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, call proceeds.
    Allowed,
    /// Circuit open but timed out; this call is the single probe.
    Probe,
    /// Circuit open, call must fail fast.
    Rejected,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    open: AtomicBool,
    /// Unix milliseconds of the last connectivity failure; 0 when none.
    last_failure_ms: AtomicI64,
    /// Gate so that exactly one post-timeout probe is in flight.
    probing: AtomicBool,
    reset_timeout: Duration,
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

impl CircuitBreaker {
    pub fn new(reset_timeout: Duration) -> Self {
        Self {
            open: AtomicBool::new(false),
            last_failure_ms: AtomicI64::new(0),
            probing: AtomicBool::new(false),
            reset_timeout,
        }
    }

    /// Decide whether a call may go to the database.
    pub fn admit(&self) -> Admission {
        if !self.open.load(Ordering::Acquire) {
            return Admission::Allowed;
        }
        let elapsed = now_ms() - self.last_failure_ms.load(Ordering::Acquire);
        if elapsed < self.reset_timeout.as_millis() as i64 {
            return Admission::Rejected;
        }
        // Timeout elapsed: let exactly one caller probe.
        if self
            .probing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Admission::Probe
        } else {
            Admission::Rejected
        }
    }

    /// Record a successful call; closes the circuit if it was open.
    pub fn on_success(&self) {
        self.probing.store(false, Ordering::Release);
        if self.open.swap(false, Ordering::AcqRel) {
            tracing::info!(transition = "CLOSE", "database circuit closed");
        }
    }

    /// Record a failed call. Only connectivity-class errors affect the state.
    pub fn on_failure(&self, err: &ClusterError) {
        if !err.is_connectivity() {
            self.probing.store(false, Ordering::Release);
            return;
        }
        self.last_failure_ms.store(now_ms(), Ordering::Release);
        self.probing.store(false, Ordering::Release);
        if !self.open.swap(true, Ordering::AcqRel) {
            tracing::warn!(transition = "OPEN", reason = %err, "database circuit opened");
        }
    }

    /// Operator-initiated transition to closed.
    pub fn reset(&self) {
        self.probing.store(false, Ordering::Release);
        if self.open.swap(false, Ordering::AcqRel) {
            tracing::info!(transition = "MANUAL_RESET", "database circuit reset");
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Unix milliseconds of the last connectivity failure, if any.
    pub fn last_failure_ms(&self) -> Option<i64> {
        match self.last_failure_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    #[cfg(test)]
    fn force_last_failure_ms(&self, ms: i64) {
        self.last_failure_ms.store(ms, Ordering::Release);
    }
}
