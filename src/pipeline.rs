use crate::buffer::QueueSet;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::dispatcher::{ClosedBehavior, Dispatcher};
use crate::error::{PipelineError, Result};
use crate::event::{EventLog, EventSink, StdoutSink};
use crate::generator::Generator;
use crate::item::{Class, IdIssuer, Phase};
use crate::metrics::{RunMetrics, StageMetrics};
use crate::pool::ResourcePool;
use crate::stage::{Downstream, Gate, ServiceClock, StageRunner};
use crate::state::StateHandle;
use crossbeam::channel::{self, select};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Builder for constructing pipelines
pub struct PipelineBuilder {
    config: Config,
    sink: Arc<dyn EventSink>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder; events go to stdout unless overridden
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sink: Arc::new(StdoutSink),
        }
    }

    /// Send stage events somewhere other than stdout
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Validate the configuration and build the pipeline
    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;
        Ok(Pipeline {
            config: self.config,
            sink: self.sink,
        })
    }
}

/// The four-phase workshop, ready to run
pub struct Pipeline {
    config: Config,
    sink: Arc<dyn EventSink>,
}

/// Pools shared by the stages of one run
struct Pools {
    slots: ResourcePool,
    mechanics: ResourcePool,
    cleaners: ResourcePool,
    reviewers: ResourcePool,
}

impl Pools {
    fn new(config: &Config) -> Self {
        Self {
            slots: ResourcePool::new("slots", config.num_slots),
            mechanics: ResourcePool::new("mechanics", config.num_workers_stage2),
            cleaners: ResourcePool::new("cleaners", config.num_cleaners),
            reviewers: ResourcePool::new("reviewers", config.num_reviewers),
        }
    }

    fn gate(&self, phase: Phase) -> Gate {
        match phase {
            Phase::Reception => Gate::Slot,
            Phase::Repair => Gate::Workers(self.mechanics.clone()),
            Phase::Cleaning => Gate::Workers(self.cleaners.clone()),
            Phase::Delivery => Gate::Workers(self.reviewers.clone()),
        }
    }

    fn all(&self) -> [&ResourcePool; 4] {
        [&self.slots, &self.mechanics, &self.cleaners, &self.reviewers]
    }
}

impl Pipeline {
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every item through the four phases
    ///
    /// Returns once all items have completed or `cancel` fires; a cancelled
    /// run reports partial metrics with `cancelled` set.
    pub fn run(&self, state: &StateHandle, cancel: &CancelToken) -> Result<RunMetrics> {
        let config = &self.config;
        let start = Instant::now();
        let run_cancel = cancel.child();
        let seed = config.resolved_seed();
        let total = config.total_items();
        tracing::info!(
            total,
            slots = config.num_slots,
            mechanics = config.num_workers_stage2,
            seed,
            "workshop run starting"
        );

        let pools = Pools::new(config);
        let queues: Vec<QueueSet> = Phase::ALL
            .iter()
            .map(|phase| QueueSet::new(config.queue_depth(*phase)))
            .collect();
        let (done_tx, done_rx) = channel::bounded(total.max(1));
        let events = EventLog::new(start, Arc::clone(&self.sink));
        let ids = Arc::new(IdIssuer::new());

        let mut units: Vec<JoinHandle<Result<()>>> = Vec::new();
        let mut stage_metrics: Vec<(Phase, StageMetrics)> = Vec::new();

        for class in Class::ALL {
            let mut generator = Generator::new(
                queues[0].queue(class).clone(),
                config.count_for(class),
                Arc::clone(&ids),
                run_cancel.clone(),
                seed.wrapping_add(class.index() as u64 + 1),
            )
            .with_arrival_jitter(config.max_arrival_jitter);
            let spawned = spawn_unit(format!("generator-{class}"), &run_cancel, move || {
                generator.run();
                Ok(())
            });
            push_or_abort(&mut units, spawned, &run_cancel)?;
        }

        for phase in Phase::ALL {
            let on_closed = if !phase.is_first() && config.drain_on_close {
                ClosedBehavior::Drain
            } else {
                ClosedBehavior::Halt
            };
            let dispatcher =
                Dispatcher::new(queues[phase.index()].clone(), state.clone(), run_cancel.clone())
                    .with_idle_interval(config.idle_interval)
                    .with_closed_behavior(on_closed);
            let downstream = if phase.is_last() {
                Downstream::Complete(done_tx.clone())
            } else {
                Downstream::Next(queues[phase.index() + 1].clone())
            };
            let clock = ServiceClock::new(
                config.time_unit,
                config.max_jitter_units,
                seed.wrapping_add(10 + u64::from(phase.number())),
            );

            let mut runner = StageRunner::new(
                phase,
                dispatcher,
                pools.gate(phase),
                pools.slots.clone(),
                downstream,
                events.clone(),
            )
            .with_clock(clock);
            stage_metrics.push((phase, runner.metrics().clone()));

            let spawned = spawn_unit(format!("stage-{}", phase.number()), &run_cancel, move || {
                runner.run()
            });
            push_or_abort(&mut units, spawned, &run_cancel)?;
        }
        drop(done_tx);

        let mut metrics = RunMetrics::new();
        while (metrics.total_processed as usize) < total {
            select! {
                recv(done_rx) -> item => match item {
                    Ok(item) => metrics.record_completion(&item),
                    Err(_) => break,
                },
                recv(run_cancel.signal()) -> _ => break,
            }
        }
        metrics.total_duration = start.elapsed();

        run_cancel.cancel();
        let joined = join_units(units);

        for item in done_rx.try_iter() {
            metrics.record_completion(&item);
        }
        metrics.cancelled = (metrics.total_processed as usize) < total;

        metrics.stranded_released = release_stranded(&queues[1..], &pools.slots);
        for pool in pools.all() {
            if pool.in_use() != 0 {
                tracing::warn!(pool = pool.name(), in_use = pool.in_use(), "permits still held after run");
            }
            metrics.permits_held += pool.in_use();
        }

        metrics.stages = stage_metrics
            .iter()
            .map(|(phase, stage)| stage.snapshot(*phase))
            .collect();
        joined?;

        tracing::info!(
            processed = metrics.total_processed,
            cancelled = metrics.cancelled,
            elapsed_ms = metrics.total_duration.as_millis() as u64,
            "workshop run finished"
        );
        Ok(metrics)
    }
}

/// Cancels the run if a unit unwinds
struct CancelOnPanic(CancelToken);

impl Drop for CancelOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.cancel();
        }
    }
}

/// Start a unit on its own thread; a unit that fails or panics cancels the run
fn spawn_unit<F>(name: String, cancel: &CancelToken, body: F) -> Result<JoinHandle<Result<()>>>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    let guard = CancelOnPanic(cancel.clone());
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let guard = guard;
            let result = body();
            if let Err(e) = &result {
                tracing::error!(error = %e, "unit failed, cancelling run");
                guard.0.cancel();
            }
            result
        })
        .map_err(|e| PipelineError::ThreadError(format!("failed to spawn {name}: {e}")))
}

/// Return the slots of items still parked in stage 2-4 queues
fn release_stranded(queues: &[QueueSet], slots: &ResourcePool) -> u64 {
    let mut released = 0;
    for queue_set in queues {
        for item in queue_set.drain() {
            tracing::debug!(item = item.id, "releasing slot of queued item");
            slots.release();
            released += 1;
        }
    }
    released
}

/// Keep a spawned unit, or stop everything already running and bail out
fn push_or_abort(
    units: &mut Vec<JoinHandle<Result<()>>>,
    spawned: Result<JoinHandle<Result<()>>>,
    cancel: &CancelToken,
) -> Result<()> {
    match spawned {
        Ok(handle) => {
            units.push(handle);
            Ok(())
        }
        Err(e) => {
            cancel.cancel();
            let _ = join_units(std::mem::take(units));
            Err(e)
        }
    }
}

/// Join every unit, returning the first error
///
/// A panicking unit (for instance an unmatched permit release) is re-raised.
fn join_units(units: Vec<JoinHandle<Result<()>>>) -> Result<()> {
    let mut first_error = None;
    for handle in units {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                first_error.get_or_insert(e);
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
    first_error.map_or(Ok(()), Err)
}
