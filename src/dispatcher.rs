use crate::buffer::QueueSet;
use crate::cancel::CancelToken;
use crate::control::{Mode, Policy};
use crate::item::Item;
use crate::state::StateHandle;
use crossbeam::channel::Select;
use std::time::Duration;

/// Default re-poll interval while idle
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(10);

/// How a stage treats the closed control value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedBehavior {
    /// Admit nothing while closed
    Halt,
    /// Keep serving queued items in base order while closed
    Drain,
}

/// Policy engine for one stage
///
/// Every call re-reads the control value, so a policy change applies to the
/// very next item. Items already handed out are never revisited.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    queues: QueueSet,
    state: StateHandle,
    cancel: CancelToken,
    idle_interval: Duration,
    on_closed: ClosedBehavior,
}

impl Dispatcher {
    pub fn new(queues: QueueSet, state: StateHandle, cancel: CancelToken) -> Self {
        Self {
            queues,
            state,
            cancel,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            on_closed: ClosedBehavior::Halt,
        }
    }

    /// Set the bounded idle wait between policy re-reads
    pub fn with_idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_closed_behavior(mut self, on_closed: ClosedBehavior) -> Self {
        self.on_closed = on_closed;
        self
    }

    pub fn queues(&self) -> &QueueSet {
        &self.queues
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn idle_interval(&self) -> Duration {
        self.idle_interval
    }

    /// Policy in force for `mode`, or `None` when nothing may be admitted
    pub fn policy_for(&self, mode: Mode) -> Option<Policy> {
        match mode {
            Mode::Inactive => None,
            Mode::Closed => match self.on_closed {
                ClosedBehavior::Halt => None,
                ClosedBehavior::Drain => Some(Policy::BASE),
            },
            mode => Some(Policy::for_mode(mode)),
        }
    }

    /// Next item to serve, or `None` once the stage must stop
    ///
    /// Blocks while nothing admissible is queued, re-reading the control value
    /// at least every idle interval.
    pub fn next(&self) -> Option<Item> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }

            let mode = self.state.mode();
            let Some(policy) = self.policy_for(mode) else {
                if !self.cancel.sleep(self.idle_interval) {
                    return None;
                }
                continue;
            };

            if let Some(item) = self.try_next(&policy) {
                return Some(item);
            }

            match self.wait_any(&policy) {
                Wait::Ready | Wait::Idle => continue,
                Wait::Cancelled => return None,
            }
        }
    }

    /// Highest-preference ready item among admitted classes, without blocking
    pub fn try_next(&self, policy: &Policy) -> Option<Item> {
        policy
            .admitted()
            .find_map(|class| self.queues.queue(class).try_pop())
    }

    /// Block on exactly the admitted queues, the idle timeout and cancellation
    ///
    /// Nothing is received here; readiness sends the caller back through
    /// `try_next` so the preference order decides between ready classes.
    fn wait_any(&self, policy: &Policy) -> Wait {
        let mut sel = Select::new();
        for class in policy.admitted() {
            sel.recv(self.queues.queue(class).receiver());
        }
        let cancel_idx = sel.recv(self.cancel.signal());

        match sel.ready_timeout(self.idle_interval) {
            Ok(idx) if idx == cancel_idx => Wait::Cancelled,
            Ok(_) => Wait::Ready,
            Err(_) => Wait::Idle,
        }
    }
}

enum Wait {
    Ready,
    Idle,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Class;
    use crate::state::StateCell;
    use crossbeam::channel;
    use std::thread;

    struct Fixture {
        _cell: StateCell,
        state: StateHandle,
        queues: QueueSet,
        cancel: CancelToken,
        dispatcher: Dispatcher,
    }

    fn fixture(value: u8) -> Fixture {
        let cell = StateCell::spawn().unwrap();
        let state = cell.handle();
        state.set(value);
        let queues = QueueSet::new(16);
        let cancel = CancelToken::new();
        let dispatcher = Dispatcher::new(queues.clone(), state.clone(), cancel.clone())
            .with_idle_interval(Duration::from_millis(5));
        Fixture {
            _cell: cell,
            state,
            queues,
            cancel,
            dispatcher,
        }
    }

    fn enqueue(queues: &QueueSet, items: &[(u64, Class)]) {
        let cancel = CancelToken::new();
        for &(id, class) in items {
            queues.push(Item::new(id, class), &cancel).unwrap();
        }
    }

    fn spawn_next(dispatcher: &Dispatcher) -> channel::Receiver<Option<Item>> {
        let (tx, rx) = channel::bounded(1);
        let dispatcher = dispatcher.clone();
        thread::spawn(move || {
            let _ = tx.send(dispatcher.next());
        });
        rx
    }

    #[test]
    fn test_priority_c_serves_c_first() {
        let f = fixture(6);
        enqueue(
            &f.queues,
            &[(1, Class::A), (2, Class::B), (3, Class::C), (4, Class::C)],
        );

        let ids: Vec<u64> = (0..4).map(|_| f.dispatcher.next().unwrap().id).collect();
        assert_eq!(ids, vec![3, 4, 1, 2]);
    }

    #[test]
    fn test_priority_b_fallback_order() {
        let f = fixture(5);
        enqueue(&f.queues, &[(1, Class::C), (2, Class::A), (3, Class::B)]);

        let ids: Vec<u64> = (0..3).map(|_| f.dispatcher.next().unwrap().id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_only_b_never_returns_other_classes() {
        let f = fixture(2);
        enqueue(&f.queues, &[(1, Class::A), (2, Class::C)]);

        let rx = spawn_next(&f.dispatcher);
        assert!(rx.recv_timeout(Duration::from_millis(80)).is_err());

        enqueue(&f.queues, &[(3, Class::B)]);
        let item = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(item, Item::new(3, Class::B));
        assert_eq!(f.queues.queue(Class::A).len(), 1);
        assert_eq!(f.queues.queue(Class::C).len(), 1);
    }

    #[test]
    fn test_policy_change_releases_blocked_dispatch() {
        let f = fixture(1);
        enqueue(&f.queues, &[(7, Class::B)]);

        let rx = spawn_next(&f.dispatcher);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        f.state.set(5);
        let item = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(item.id, 7);
    }

    #[test]
    fn test_keep_values_do_not_change_selection() {
        let f = fixture(6);
        f.state.set(7);
        f.state.set(8);
        enqueue(&f.queues, &[(1, Class::A), (2, Class::C)]);
        assert_eq!(f.dispatcher.next().unwrap().class, Class::C);
    }

    #[test]
    fn test_inactive_dequeues_nothing_until_cancelled() {
        let f = fixture(0);
        enqueue(&f.queues, &[(1, Class::A)]);

        let rx = spawn_next(&f.dispatcher);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        f.cancel.cancel();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), None);
        assert_eq!(f.queues.queue(Class::A).len(), 1);
    }

    #[test]
    fn test_closed_halts_or_drains() {
        let f = fixture(9);
        enqueue(&f.queues, &[(1, Class::B)]);
        assert_eq!(f.dispatcher.policy_for(Mode::Closed), None);

        let draining = f.dispatcher.clone().with_closed_behavior(ClosedBehavior::Drain);
        assert_eq!(draining.next().map(|i| i.id), Some(1));
    }

    #[test]
    fn test_fifo_within_class() {
        let f = fixture(4);
        enqueue(
            &f.queues,
            &[(10, Class::B), (11, Class::B), (12, Class::B), (13, Class::B)],
        );
        let ids: Vec<u64> = (0..4).map(|_| f.dispatcher.next().unwrap().id).collect();
        assert_eq!(ids, vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_blocked_wait_wakes_on_arrival() {
        let f = fixture(4);
        let rx = spawn_next(&f.dispatcher);
        thread::sleep(Duration::from_millis(20));
        enqueue(&f.queues, &[(5, Class::C)]);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Some(Item::new(5, Class::C))
        );
    }

    #[test]
    fn test_blocking_wait_keeps_preference_between_ready_classes() {
        let f = fixture(4);
        let policy = Policy::for_mode(Mode::Priority(Class::A));
        for round in 0..200u64 {
            enqueue(&f.queues, &[(2 * round, Class::C), (2 * round + 1, Class::A)]);
            assert!(matches!(f.dispatcher.wait_any(&policy), Wait::Ready));
            assert_eq!(f.queues.len(), 2);
            assert_eq!(f.dispatcher.next().map(|i| i.class), Some(Class::A));
            assert_eq!(f.dispatcher.next().map(|i| i.class), Some(Class::C));
        }
    }

    #[test]
    fn test_cancel_stops_blocked_wait() {
        let f = fixture(3);
        let rx = spawn_next(&f.dispatcher);
        thread::sleep(Duration::from_millis(20));
        f.cancel.cancel();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), None);
    }
}
