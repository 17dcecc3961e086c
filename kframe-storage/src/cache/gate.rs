//! Revalidation gate.
//!
//! One mutual-exclusion section per repository. Every p-frame build and
//! every revalidation, for every version, runs while holding it; cache reads
//! never touch it.

use tokio::sync::{Semaphore, SemaphorePermit};

use kframe_core::{CacheError, FrameResult};

#[derive(Debug)]
pub struct RevalidationGate {
    permits: Semaphore,
}

impl Default for RevalidationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RevalidationGate {
    pub fn new() -> Self {
        Self {
            permits: Semaphore::new(1),
        }
    }

    /// Wait for the gate. The permit releases it on drop.
    pub async fn acquire(&self) -> FrameResult<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| CacheError::GateClosed.into())
    }

    /// True when nobody holds the gate.
    pub fn is_idle(&self) -> bool {
        self.permits.available_permits() == 1
    }

    /// Close the gate; pending and future acquisitions fail.
    pub fn close(&self) {
        self.permits.close();
    }
}
