use crossbeam::channel::{self, select, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cooperative, global cancellation signal
///
/// Cancelling drops the only sender of an internal channel, so every thread
/// parked on [`CancelToken::signal`] inside a `select!` wakes at once with a
/// disconnect. Children are cancelled together with their parent.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
    children: Mutex<Vec<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (trigger, signal) = channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                signal,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a token that is cancelled whenever this one is
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        let mut children = self.inner.children.lock();
        if self.is_cancelled() {
            child.cancel();
        } else {
            children.retain(|c| !c.is_cancelled());
            children.push(child.clone());
        }
        child
    }

    /// Raise the signal; idempotent
    pub fn cancel(&self) {
        let children = {
            let mut children = self.inner.children.lock();
            self.inner.cancelled.store(true, Ordering::SeqCst);
            drop(self.inner.trigger.lock().take());
            std::mem::take(&mut *children)
        };
        for child in children {
            child.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Receiver that becomes ready (disconnected) once the token is cancelled
    ///
    /// Nothing is ever sent on it; use it as one arm of a multi-way wait.
    pub fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }

    /// Sleep for `duration` unless cancelled first
    ///
    /// Returns true if the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        select! {
            recv(self.signal()) -> _ => false,
            default(duration) => !self.is_cancelled(),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_sleep_completes_without_cancel() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::from_millis(5)));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_finished_children_are_pruned() {
        let parent = CancelToken::new();
        for _ in 0..50 {
            parent.child().cancel();
        }
        let live = parent.child();
        assert_eq!(parent.inner.children.lock().len(), 1);

        parent.cancel();
        assert!(live.is_cancelled());
    }

    #[test]
    fn test_cancel_wakes_sleeper() {
        let token = CancelToken::new();
        let sleeper = token.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || sleeper.sleep(Duration::from_secs(30)));

        thread::sleep(Duration::from_millis(20));
        token.cancel();

        assert!(!handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_signal_ready_after_cancel() {
        let token = CancelToken::new();
        assert!(token.signal().try_recv().is_err());
        token.cancel();
        token.cancel();
        assert!(matches!(
            token.signal().recv(),
            Err(crossbeam::channel::RecvError)
        ));
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = CancelToken::new();
        let child = parent.child();
        let grandchild = child.child();

        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(grandchild.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
        assert!(parent.child().is_cancelled());
    }
}
