//! Upload admission control.
//!
//! A fixed number of uploads may be in flight at once. Admission never
//! waits: when every slot is taken the caller is turned away immediately.

use crate::metrics::ACTIVE_UPLOADS;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Returned by [`AdmissionGate::try_admit`] when all slots are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("server is busy")]
pub struct Busy;

/// Bounded, non-blocking admission gate.
#[derive(Clone, Debug)]
pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    /// Create a gate with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a slot if one is free.
    pub fn try_admit(&self) -> Result<Ticket, Busy> {
        let permit = self.permits.clone().try_acquire_owned().map_err(|_| Busy)?;
        ACTIVE_UPLOADS.inc();
        Ok(Ticket { _permit: permit })
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Currently free slots.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Proof of admission. The slot is returned when the ticket is dropped.
#[derive(Debug)]
pub struct Ticket {
    _permit: OwnedSemaphorePermit,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        ACTIVE_UPLOADS.dec();
    }
}
