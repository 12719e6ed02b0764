//! Byte budget between a guest writing a response body and the client
//! draining it.
//!
//! A sink takes bytes from the budget as it queues them and the client side
//! gives them back once they have been handed to the transport. Guest stdout
//! reports only the remaining budget as writable and waits in `ready()` when
//! it is exhausted, so a slow client stalls the guest instead of growing the
//! queue.

use std::sync::Arc;

use tokio::sync::Semaphore;

/// Smallest budget handed out; one WASI write piece always fits.
pub const MIN_BODY_BUFFER: usize = 64 * 1024;

/// Shared count of body bytes that may still be queued.
#[derive(Debug, Clone)]
pub struct BodyBudget {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl BodyBudget {
    /// Create a budget of `limit` bytes, raised to [`MIN_BODY_BUFFER`].
    pub fn new(limit: usize) -> Self {
        let limit = limit.clamp(MIN_BODY_BUFFER, Semaphore::MAX_PERMITS);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// The size of the budget.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes that can be queued right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Take `len` bytes from the budget, or nothing if they are not there.
    pub fn try_take(&self, len: usize) -> bool {
        if len == 0 {
            return true;
        }
        let Ok(len) = u32::try_from(len) else {
            return false;
        };
        match self.permits.try_acquire_many(len) {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Give `len` bytes back once they have left the queue.
    pub fn release(&self, len: usize) {
        if len > 0 && !self.permits.is_closed() {
            self.permits.add_permits(len);
        }
    }

    /// Wait until at least one byte can be queued or the budget is closed.
    pub async fn wait_available(&self) {
        // The permit goes straight back; this only waits for capacity
        let _ = self.permits.acquire().await;
    }

    /// The draining side is gone; wake every waiter.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}
