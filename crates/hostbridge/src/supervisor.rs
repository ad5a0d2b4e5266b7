//! Invocation supervisor - bounds how long a caller waits on the host thread.
//!
//! Separates waiting policy from transports, enabling:
//! - One timeout per server instance instead of per call site
//! - In-flight bookkeeping for health reporting via DashMap
//! - Abandonment without corrupting later invocations (each result slot is
//!   a fresh oneshot, so a late result has nowhere to land but the floor)

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::bridge::protocol::{ErrorKind, InvocationId, Outcome};
use crate::marshal::PendingInvocation;

/// Default bound on waiting for the host thread.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Snapshot of an invocation still waiting on the host thread.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub id: InvocationId,
    pub tool: String,
    pub submitted_at: Instant,
}

impl InFlight {
    pub fn elapsed(&self) -> Duration {
        self.submitted_at.elapsed()
    }
}

/// Removes the in-flight entry however the wait ends, including when the
/// waiting future itself is dropped (client disconnect).
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<InvocationId, InFlight>,
    id: InvocationId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

pub struct InvocationSupervisor {
    timeout: Duration,
    in_flight: DashMap<InvocationId, InFlight>,
    completed: AtomicU64,
    abandoned: AtomicU64,
}

impl Default for InvocationSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl InvocationSupervisor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            in_flight: DashMap::new(),
            completed: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for `pending` using this instance's timeout.
    pub async fn await_outcome(&self, pending: PendingInvocation) -> Outcome {
        self.await_with_timeout(pending, self.timeout).await
    }

    /// Wait for `pending` for at most `timeout`.
    ///
    /// On timeout the invocation is abandoned: the host thread still runs
    /// it, but its result is dropped and never reaches another caller.
    pub async fn await_with_timeout(&self, pending: PendingInvocation, timeout: Duration) -> Outcome {
        let id = pending.id();
        let tool = pending.tool().to_string();

        self.in_flight.insert(
            id,
            InFlight {
                id,
                tool: tool.clone(),
                submitted_at: Instant::now(),
            },
        );
        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            id,
        };

        match tokio::time::timeout(timeout, pending.wait()).await {
            Ok(outcome) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                outcome
            }
            Err(_) => {
                self.abandoned.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    invocation_id = %id,
                    tool = %tool,
                    timeout_ms = timeout.as_millis() as u64,
                    "Host thread did not finish in time, abandoning invocation"
                );
                Outcome::failure(
                    ErrorKind::Timeout,
                    format!(
                        "timeout waiting for host thread to run '{}' ({:.1}s)",
                        tool,
                        timeout.as_secs_f64()
                    ),
                )
            }
        }
    }

    /// Invocations currently waiting, oldest first.
    pub fn in_flight(&self) -> Vec<InFlight> {
        let mut entries: Vec<InFlight> = self.in_flight.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| e.submitted_at);
        entries
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Waits that ended with a host-provided outcome.
    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Waits that ended in a timeout.
    pub fn abandoned_count(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }
}
