//! Process-wide single-flight admission.
//!
//! One permit is shared by every conversation. An event that finds the
//! permit taken is dropped by the caller; nothing is queued.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Clone)]
pub struct ConcurrencyGate {
    permit: Arc<Semaphore>,
}

impl ConcurrencyGate {
    pub fn new() -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    /// Take the permit without waiting. `None` means busy.
    pub fn try_acquire(&self) -> Option<GateGuard> {
        self.permit
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| GateGuard { _permit: permit })
    }

    pub fn is_idle(&self) -> bool {
        self.permit.available_permits() == 1
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Held for the whole pipeline run; dropping it reopens the gate.
pub struct GateGuard {
    _permit: OwnedSemaphorePermit,
}
