use crate::buffer::{PushOutcome, QueueSet};
use crate::dispatcher::Dispatcher;
use crate::error::{PipelineError, Result};
use crate::event::{EventLog, Transition};
use crate::item::{Class, Item, Phase};
use crate::metrics::StageMetrics;
use crate::pool::ResourcePool;
use crossbeam::channel::Sender;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Computes how long one service takes
#[derive(Debug)]
pub struct ServiceClock {
    time_unit: Duration,
    max_jitter_units: u64,
    rng: StdRng,
}

impl ServiceClock {
    pub fn new(time_unit: Duration, max_jitter_units: u64, seed: u64) -> Self {
        Self {
            time_unit,
            max_jitter_units,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Base length for the class plus `0..=max_jitter_units` whole units
    pub fn service_time(&mut self, class: Class) -> Duration {
        let jitter = if self.max_jitter_units > 0 {
            self.rng.gen_range(0..=self.max_jitter_units)
        } else {
            0
        };
        let units = u64::from(class.base_units()) + jitter;
        self.time_unit
            .saturating_mul(u32::try_from(units).unwrap_or(u32::MAX))
    }
}

/// Permit a stage takes before serving
#[derive(Debug, Clone)]
pub enum Gate {
    /// Pipeline-wide slot, kept until the item leaves the last stage
    Slot,
    /// Stage-local worker pool, returned after service
    Workers(ResourcePool),
}

/// Where served items go
#[derive(Debug, Clone)]
pub enum Downstream {
    /// The next stage's queues
    Next(QueueSet),
    /// Out of the pipeline: release the slot and report completion
    Complete(Sender<Item>),
}

enum Flow {
    Continue,
    Stop,
}

/// Drives one stage: dispatch, permit, timed service, forward
pub struct StageRunner {
    phase: Phase,
    dispatcher: Dispatcher,
    gate: Gate,
    slots: ResourcePool,
    downstream: Downstream,
    clock: ServiceClock,
    events: EventLog,
    metrics: StageMetrics,
}

impl StageRunner {
    pub fn new(
        phase: Phase,
        dispatcher: Dispatcher,
        gate: Gate,
        slots: ResourcePool,
        downstream: Downstream,
        events: EventLog,
    ) -> Self {
        Self {
            phase,
            dispatcher,
            gate,
            slots,
            downstream,
            clock: ServiceClock::new(Duration::from_secs(1), 0, u64::from(phase.number())),
            events,
            metrics: StageMetrics::new(),
        }
    }

    pub fn with_clock(mut self, clock: ServiceClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Get a reference to the metrics
    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    /// Run until the dispatcher reports stop or an item is abandoned
    pub fn run(&mut self) -> Result<()> {
        tracing::debug!(phase = self.phase.number(), "stage started");
        while let Some(item) = self.dispatcher.next() {
            match self.serve(item)? {
                Flow::Continue => {}
                Flow::Stop => break,
            }
        }
        tracing::debug!(
            phase = self.phase.number(),
            served = self.metrics.total_served(),
            "stage stopped"
        );
        Ok(())
    }

    fn serve(&mut self, item: Item) -> Result<Flow> {
        let entering = self.phase.is_first();
        if entering && !self.await_open(item) {
            self.abandon(item, false);
            return Ok(Flow::Stop);
        }

        if !self.acquire_gate() {
            self.abandon(item, !entering);
            return Ok(Flow::Stop);
        }

        self.events.record(item, self.phase, Transition::Enter);
        let service = self.clock.service_time(item.class);
        if !self.dispatcher.cancel_token().sleep(service) {
            self.release_gate();
            self.abandon(item, true);
            return Ok(Flow::Stop);
        }
        self.events.record(item, self.phase, Transition::Exit);
        self.metrics.record_served(service);
        self.release_gate();

        self.forward(item)
    }

    /// Hold a freshly dispatched item while the workshop is closed
    ///
    /// Returns false if the run is cancelled first.
    fn await_open(&self, item: Item) -> bool {
        let state = self.dispatcher.state();
        let cancel = self.dispatcher.cancel_token();
        let mut refused = false;
        while state.mode().is_closed() {
            if !refused {
                refused = true;
                self.metrics.record_refusal();
                tracing::info!(item = item.id, "workshop closed, admission refused");
            }
            if !cancel.sleep(self.dispatcher.idle_interval()) {
                return false;
            }
        }
        true
    }

    fn acquire_gate(&self) -> bool {
        let pool = match &self.gate {
            Gate::Slot => &self.slots,
            Gate::Workers(pool) => pool,
        };
        if pool.try_acquire() {
            return true;
        }
        self.metrics.record_permit_wait();
        pool.acquire(self.dispatcher.cancel_token())
    }

    /// Return the stage-local permit; the slot stays with the item
    fn release_gate(&self) {
        if let Gate::Workers(pool) = &self.gate {
            pool.release();
        }
    }

    fn forward(&self, item: Item) -> Result<Flow> {
        match &self.downstream {
            Downstream::Next(queues) => match queues.push(item, self.dispatcher.cancel_token()) {
                Ok(PushOutcome::Immediate) => Ok(Flow::Continue),
                Ok(PushOutcome::Blocked) => {
                    self.metrics.record_forward_block();
                    Ok(Flow::Continue)
                }
                Err(item) => {
                    self.abandon(item, true);
                    Ok(Flow::Stop)
                }
            },
            Downstream::Complete(completions) => {
                self.slots.release();
                completions.send(item).map_err(|_| {
                    PipelineError::StageError(format!(
                        "completion sink closed while finishing item {}",
                        item.id
                    ))
                })?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Drop an item on cancellation, returning its slot if it holds one
    fn abandon(&self, item: Item, holds_slot: bool) {
        self.metrics.record_abandoned();
        if holds_slot {
            self.slots.release();
        }
        tracing::debug!(
            phase = self.phase.number(),
            item = item.id,
            class = %item.class,
            "item abandoned on cancellation"
        );
    }
}
