use crate::cancel::CancelToken;
use crossbeam::channel::{self, select, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counting permit pool bounding concurrent occupancy
///
/// Free permits are tokens sitting in a bounded channel whose capacity equals
/// the pool size, so `in_use` can never exceed capacity nor go negative.
/// Permits carry no identity.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    name: Arc<str>,
    capacity: usize,
    free_tx: Sender<()>,
    free_rx: Receiver<()>,
    waits: Arc<AtomicU64>,
}

impl ResourcePool {
    /// Create a full pool
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(name: impl Into<Arc<str>>, capacity: usize) -> Self {
        assert!(capacity > 0, "resource pool capacity must be positive");
        let (free_tx, free_rx) = channel::bounded(capacity);
        for _ in 0..capacity {
            free_tx
                .try_send(())
                .unwrap_or_else(|_| unreachable!("fresh pool channel has room"));
        }
        Self {
            name: name.into(),
            capacity,
            free_tx,
            free_rx,
            waits: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Take one permit, blocking until one is free or `cancel` fires
    ///
    /// Returns false only on cancellation; no permit is held in that case.
    pub fn acquire(&self, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        if self.try_acquire() {
            return true;
        }

        self.waits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(pool = %self.name, "waiting for permit");
        select! {
            recv(self.free_rx) -> permit => permit.is_ok(),
            recv(cancel.signal()) -> _ => false,
        }
    }

    /// Take a permit if one is free right now
    pub fn try_acquire(&self) -> bool {
        self.free_rx.try_recv().is_ok()
    }

    /// Return one permit
    ///
    /// # Panics
    ///
    /// Panics when no permit is outstanding: an unmatched release is a
    /// programming error that must not be masked.
    pub fn release(&self) {
        match self.free_tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => {
                panic!("unmatched release on resource pool `{}`", self.name)
            }
            Err(TrySendError::Disconnected(())) => {
                unreachable!("pool owns both ends of its permit channel")
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    /// Permits currently held
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Number of acquires that had to block
    pub fn wait_count(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_acquire_release_accounting() {
        let pool = ResourcePool::new("mechanics", 2);
        let cancel = CancelToken::new();
        assert_eq!(pool.available(), 2);

        assert!(pool.acquire(&cancel));
        assert!(pool.acquire(&cancel));
        assert_eq!(pool.in_use(), 2);
        assert!(!pool.try_acquire());

        pool.release();
        assert_eq!(pool.in_use(), 1);
        pool.release();
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    #[should_panic(expected = "unmatched release")]
    fn test_unmatched_release_panics() {
        let pool = ResourcePool::new("slots", 1);
        pool.release();
    }

    #[test]
    fn test_cancel_unblocks_waiter() {
        let pool = ResourcePool::new("cleaners", 1);
        let cancel = CancelToken::new();
        assert!(pool.acquire(&cancel));

        let waiter_pool = pool.clone();
        let waiter_cancel = cancel.clone();
        let handle = thread::spawn(move || waiter_pool.acquire(&waiter_cancel));

        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        assert!(!handle.join().unwrap());
        assert_eq!(pool.in_use(), 1);
        assert_eq!(pool.wait_count(), 1);
    }

    #[test]
    fn test_waiter_served_on_release() {
        let pool = ResourcePool::new("reviewers", 1);
        let cancel = CancelToken::new();
        assert!(pool.acquire(&cancel));

        let waiter_pool = pool.clone();
        let waiter_cancel = cancel.clone();
        let handle = thread::spawn(move || waiter_pool.acquire(&waiter_cancel));

        thread::sleep(Duration::from_millis(20));
        pool.release();
        assert!(handle.join().unwrap());
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn test_capacity_never_exceeded_under_contention() {
        let pool = ResourcePool::new("slots", 3);
        let cancel = CancelToken::new();
        let holders = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                let cancel = cancel.clone();
                let holders = Arc::clone(&holders);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    for _ in 0..200 {
                        assert!(pool.acquire(&cancel));
                        let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        assert!(pool.in_use() <= pool.capacity());
                        holders.fetch_sub(1, Ordering::SeqCst);
                        pool.release();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.in_use(), 0);
    }
}
