// ── Resizable concurrency bound ──
//
// A semaphore whose size can change while permits are out. Growing adds
// permits straight away. Shrinking removes idle permits and records the
// rest as debt, which is paid by forgetting permits as running jobs
// finish, so running jobs are never preempted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::CoreError;

#[derive(Debug)]
struct Bounds {
    limit: usize,
    debt: usize,
}

#[derive(Debug)]
struct Shared {
    semaphore: Arc<Semaphore>,
    bounds: Mutex<Bounds>,
    active: AtomicUsize,
}

#[derive(Debug, Clone)]
pub(crate) struct ConcurrencyLimiter {
    shared: Arc<Shared>,
}

/// A held slot. Dropping it releases the permit or pays down debt.
#[derive(Debug)]
pub(crate) struct Slot {
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<Shared>,
}

impl ConcurrencyLimiter {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                semaphore: Arc::new(Semaphore::new(limit)),
                bounds: Mutex::new(Bounds { limit, debt: 0 }),
                active: AtomicUsize::new(0),
            }),
        }
    }

    fn slot(&self, permit: OwnedSemaphorePermit) -> Slot {
        self.shared.active.fetch_add(1, Ordering::SeqCst);
        Slot {
            permit: Some(permit),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Take a slot if one is free right now.
    pub(crate) fn try_acquire(&self) -> Option<Slot> {
        let permit = Arc::clone(&self.shared.semaphore).try_acquire_owned().ok()?;
        Some(self.slot(permit))
    }

    /// Wait for a slot.
    pub(crate) async fn acquire(&self) -> Result<Slot, CoreError> {
        let permit = Arc::clone(&self.shared.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Internal("concurrency limiter closed".into()))?;
        Ok(self.slot(permit))
    }

    pub(crate) fn resize(&self, limit: usize) {
        let mut bounds = match self.shared.bounds.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if limit > bounds.limit {
            let grow = limit - bounds.limit;
            let repaid = grow.min(bounds.debt);
            bounds.debt -= repaid;
            self.shared.semaphore.add_permits(grow - repaid);
        } else if limit < bounds.limit {
            let shrink = bounds.limit - limit;
            let forgotten = self.shared.semaphore.forget_permits(shrink);
            bounds.debt += shrink - forgotten;
        }
        bounds.limit = limit;
    }

    pub(crate) fn limit(&self) -> usize {
        match self.shared.bounds.lock() {
            Ok(guard) => guard.limit,
            Err(poisoned) => poisoned.into_inner().limit,
        }
    }

    /// Slots currently held.
    pub(crate) fn active(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
        let Some(permit) = self.permit.take() else {
            return;
        };
        let mut bounds = match self.shared.bounds.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if bounds.debt > 0 {
            bounds.debt -= 1;
            permit.forget();
        }
    }
}
