use crate::cancel::CancelToken;
use crate::item::{Class, Item};
use crossbeam::channel::{self, Receiver, Select, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of a blocking push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Enqueued without waiting
    Immediate,
    /// Enqueued after waiting for room
    Blocked,
}

/// Bounded FIFO queue feeding one class into a stage
///
/// A full queue is backpressure: the producer blocks (cancellably) instead of
/// dropping anything.
#[derive(Debug, Clone)]
pub struct ClassQueue {
    class: Class,
    tx: Sender<Item>,
    rx: Receiver<Item>,
    capacity: usize,
    block_count: Arc<AtomicU64>,
}

impl ClassQueue {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(class: Class, capacity: usize) -> Self {
        assert!(capacity > 0, "class queue capacity must be positive");
        let (tx, rx) = channel::bounded(capacity);
        Self {
            class,
            tx,
            rx,
            capacity,
            block_count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn class(&self) -> Class {
        self.class
    }

    /// Push an item, waiting for room if the queue is full
    ///
    /// Hands the item back if `cancel` fires first.
    pub fn push(&self, item: Item, cancel: &CancelToken) -> Result<PushOutcome, Item> {
        debug_assert_eq!(item.class, self.class);
        let item = match self.tx.try_send(item) {
            Ok(()) => return Ok(PushOutcome::Immediate),
            Err(TrySendError::Full(item)) => item,
            Err(TrySendError::Disconnected(item)) => return Err(item),
        };
        if cancel.is_cancelled() {
            return Err(item);
        }

        self.block_count.fetch_add(1, Ordering::Relaxed);
        let mut sel = Select::new();
        let send_idx = sel.send(&self.tx);
        let cancel_idx = sel.recv(cancel.signal());
        let oper = sel.select();
        match oper.index() {
            i if i == send_idx => oper
                .send(&self.tx, item)
                .map(|()| PushOutcome::Blocked)
                .map_err(|err| err.into_inner()),
            i if i == cancel_idx => {
                let _ = oper.recv(cancel.signal());
                Err(item)
            }
            _ => unreachable!("select returned an unregistered operation"),
        }
    }

    /// Pop the oldest item without blocking
    pub fn try_pop(&self) -> Option<Item> {
        self.rx.try_recv().ok()
    }

    /// Receiving end, for multi-way waits
    pub fn receiver(&self) -> &Receiver<Item> {
        &self.rx
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Utilization of the queue as a percentage (0-100)
    pub fn utilization(&self) -> u32 {
        ((self.len() * 100) / self.capacity).min(100) as u32
    }

    /// Number of pushes that found the queue full
    pub fn block_count(&self) -> u64 {
        self.block_count.load(Ordering::Relaxed)
    }
}

/// The three per-class queues in front of one stage
#[derive(Debug, Clone)]
pub struct QueueSet {
    queues: [ClassQueue; 3],
}

impl QueueSet {
    /// Create three queues of `capacity` each
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Class::ALL.map(|class| ClassQueue::new(class, capacity)),
        }
    }

    pub fn queue(&self, class: Class) -> &ClassQueue {
        &self.queues[class.index()]
    }

    /// Route an item to its class queue, blocking while that queue is full
    pub fn push(&self, item: Item, cancel: &CancelToken) -> Result<PushOutcome, Item> {
        self.queue(item.class).push(item, cancel)
    }

    /// Total items waiting across classes
    pub fn len(&self) -> usize {
        self.queues.iter().map(ClassQueue::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(ClassQueue::is_empty)
    }

    /// Remove every waiting item, class by class
    pub fn drain(&self) -> Vec<Item> {
        self.queues
            .iter()
            .flat_map(|queue| std::iter::from_fn(move || queue.try_pop()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_queue_push_pop_fifo() {
        let queue = ClassQueue::new(Class::B, 4);
        let cancel = CancelToken::new();
        for id in 1..=3 {
            assert_eq!(
                queue.push(Item::new(id, Class::B), &cancel),
                Ok(PushOutcome::Immediate)
            );
        }
        let ids: Vec<u64> = std::iter::from_fn(|| queue.try_pop()).map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_utilization() {
        let queue = ClassQueue::new(Class::A, 10);
        let cancel = CancelToken::new();
        for id in 0..5 {
            queue.push(Item::new(id, Class::A), &cancel).unwrap();
        }
        assert_eq!(queue.utilization(), 50);
        assert_eq!(queue.capacity(), 10);
    }

    #[test]
    fn test_full_queue_blocks_until_room() {
        let queue = ClassQueue::new(Class::C, 1);
        let cancel = CancelToken::new();
        queue.push(Item::new(1, Class::C), &cancel).unwrap();

        let producer = queue.clone();
        let producer_cancel = cancel.clone();
        let handle = thread::spawn(move || producer.push(Item::new(2, Class::C), &producer_cancel));

        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.try_pop().map(|i| i.id), Some(1));
        assert_eq!(handle.join().unwrap(), Ok(PushOutcome::Blocked));
        assert_eq!(queue.try_pop().map(|i| i.id), Some(2));
        assert_eq!(queue.block_count(), 1);
    }

    #[test]
    fn test_cancel_returns_item_to_producer() {
        let queue = ClassQueue::new(Class::A, 1);
        let cancel = CancelToken::new();
        queue.push(Item::new(1, Class::A), &cancel).unwrap();

        let producer = queue.clone();
        let producer_cancel = cancel.clone();
        let handle = thread::spawn(move || producer.push(Item::new(2, Class::A), &producer_cancel));

        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        assert_eq!(handle.join().unwrap(), Err(Item::new(2, Class::A)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_queue_set_routes_by_class() {
        let set = QueueSet::new(5);
        let cancel = CancelToken::new();
        set.push(Item::new(1, Class::C), &cancel).unwrap();
        set.push(Item::new(2, Class::A), &cancel).unwrap();
        set.push(Item::new(3, Class::C), &cancel).unwrap();

        assert_eq!(set.queue(Class::A).len(), 1);
        assert_eq!(set.queue(Class::B).len(), 0);
        assert_eq!(set.queue(Class::C).len(), 2);
        assert_eq!(set.len(), 3);

        let drained: Vec<u64> = set.drain().into_iter().map(|i| i.id).collect();
        assert_eq!(drained, vec![2, 1, 3]);
        assert!(set.is_empty());
    }
}
