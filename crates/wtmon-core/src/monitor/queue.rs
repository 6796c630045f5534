use tokio::sync::{Semaphore, SemaphorePermit};

/// Default number of status refreshes allowed to run at once
pub const DEFAULT_MAX_CONCURRENT_REFRESHES: usize = 3;

/// Bounded FIFO execution queue shared by every monitor.
///
/// Holding a permit means the job's git I/O may be in flight; everyone else
/// waits in arrival order (tokio's semaphore is fair).
pub struct RefreshQueue {
    semaphore: Semaphore,
    capacity: usize,
}

impl Default for RefreshQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_REFRESHES)
    }
}

impl RefreshQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Semaphore::new(capacity),
            capacity,
        }
    }

    /// Wait for a slot. `None` only if the queue was closed.
    pub async fn acquire(&self) -> Option<SemaphorePermit<'_>> {
        self.semaphore.acquire().await.ok()
    }

    /// Wait until every job that currently holds or waits for a slot is done
    pub async fn drain(&self) {
        if let Ok(all) = self.semaphore.acquire_many(self.capacity as u32).await {
            drop(all);
        }
    }

    /// Jobs currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_bounds_concurrency() {
        let queue = Arc::new(RefreshQueue::new(3));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let queue = queue.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = queue.acquire().await;
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight() {
        let queue = Arc::new(RefreshQueue::new(2));
        let done = Arc::new(AtomicUsize::new(0));

        let q = queue.clone();
        let d = done.clone();
        let job = tokio::spawn(async move {
            let _permit = q.acquire().await;
            tokio::time::sleep(Duration::from_millis(30)).await;
            d.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(queue.in_flight(), 1);

        queue.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        job.await.unwrap();
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(RefreshQueue::new(0).capacity(), 1);
    }
}
