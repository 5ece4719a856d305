use crate::buffer::ClassQueue;
use crate::cancel::CancelToken;
use crate::item::{IdIssuer, Item};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

/// Produces the items of one class into the first stage
pub struct Generator {
    queue: ClassQueue,
    count: usize,
    ids: Arc<IdIssuer>,
    max_arrival_jitter: Duration,
    rng: StdRng,
    cancel: CancelToken,
}

impl Generator {
    pub fn new(
        queue: ClassQueue,
        count: usize,
        ids: Arc<IdIssuer>,
        cancel: CancelToken,
        seed: u64,
    ) -> Self {
        Self {
            queue,
            count,
            ids,
            max_arrival_jitter: Duration::ZERO,
            rng: StdRng::seed_from_u64(seed),
            cancel,
        }
    }

    /// Wait a uniform `[0, max)` before each arrival
    pub fn with_arrival_jitter(mut self, max_arrival_jitter: Duration) -> Self {
        self.max_arrival_jitter = max_arrival_jitter;
        self
    }

    /// Generate every item, stopping early on cancellation
    ///
    /// Returns the number of items enqueued.
    pub fn run(&mut self) -> usize {
        let class = self.queue.class();
        let mut produced = 0;
        for _ in 0..self.count {
            let item = Item::new(self.ids.next_id(), class);

            let delay = self.arrival_delay();
            if !delay.is_zero() && !self.cancel.sleep(delay) {
                break;
            }
            if self.queue.push(item, &self.cancel).is_err() {
                break;
            }
            produced += 1;
        }
        tracing::debug!(class = %class, produced, "generator finished");
        produced
    }

    fn arrival_delay(&mut self) -> Duration {
        let max_ms = self.max_arrival_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.rng.gen_range(0..max_ms))
    }
}
