//! AdmissionGate - 同時処理数の制限
//!
//! A counting limiter on top of `tokio::sync::Semaphore`. A reserved slot is
//! a `Slot` guard; dropping it (or calling `release`) hands the slot back, so
//! every exit path of a processing task releases exactly once.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ConfigError;
use crate::error::CourierError;

#[derive(Debug, Clone)]
pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// One reserved slot of an `AdmissionGate`.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

impl Slot {
    pub fn release(self) {}
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Result<Self, CourierError> {
        if capacity == 0 || capacity > Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidValue {
                key: "max_in_flight".to_string(),
                details: format!("capacity must be in 1..={}", Semaphore::MAX_PERMITS),
            }
            .into());
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    /// Wait for a free slot and reserve it.
    pub async fn acquire(&self) -> Result<Slot, CourierError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| CourierError::GateClosed)?;
        Ok(Slot { _permit: permit })
    }

    pub fn try_acquire(&self) -> Option<Slot> {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .ok()
            .map(|permit| Slot { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn outstanding(&self) -> usize {
        self.capacity - self.available()
    }

    /// Wake every waiter with `GateClosed`; held slots stay valid.
    pub fn close(&self) {
        self.permits.close();
    }
}
