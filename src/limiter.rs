use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const DEFAULT_CONCURRENCY: usize = 10;

/// Counting admission gate for detail fetches. Waiters are admitted in FIFO order.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct LimiterPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl LimiterPermit {
    pub fn release(self) {
        drop(self);
    }
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub async fn acquire(&self) -> LimiterPermit {
        // never closed
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok();
        LimiterPermit { _permit: permit }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }
}

#[cfg(test)]
mod tests {
    use super::ConcurrencyLimiter;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::task::JoinSet;

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        assert_eq!(ConcurrencyLimiter::new(0).capacity(), 1);
    }

    #[tokio::test]
    async fn release_frees_a_slot() {
        let limiter = ConcurrencyLimiter::new(1);
        let permit = limiter.acquire().await;
        assert_eq!(limiter.in_flight(), 1);

        let blocked = tokio::time::timeout(Duration::from_millis(20), limiter.acquire()).await;
        assert!(blocked.is_err());

        permit.release();
        assert_eq!(limiter.in_flight(), 0);
        let _again = limiter.acquire().await;
        assert_eq!(limiter.in_flight(), 1);
    }

    #[tokio::test]
    async fn burst_never_exceeds_capacity() {
        let limiter = ConcurrencyLimiter::new(4);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        for _ in 0..200 {
            let limiter = limiter.clone();
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            tasks.spawn(async move {
                let _permit = limiter.acquire().await;
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                current.fetch_sub(1, Ordering::SeqCst);
            });
        }
        while tasks.join_next().await.is_some() {}

        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(limiter.in_flight(), 0);
    }
}
