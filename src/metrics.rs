use crate::item::{Class, Item, Phase};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A simple percentile tracker that maintains a sliding window of measurements
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    measurements: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl PercentileTracker {
    /// Create a new percentile tracker with a specified window size
    pub fn new(window_size: usize) -> Self {
        Self {
            measurements: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size,
        }
    }

    /// Record a measurement (in milliseconds)
    pub fn record(&self, millis: u64) {
        let mut measurements = self.measurements.lock();
        if measurements.len() >= self.window_size {
            measurements.pop_front();
        }
        measurements.push_back(millis);
    }

    pub fn p50_ms(&self) -> u64 {
        self.percentile(0.50)
    }

    pub fn p95_ms(&self) -> u64 {
        self.percentile(0.95)
    }

    pub fn p99_ms(&self) -> u64 {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> u64 {
        let measurements = self.measurements.lock();
        if measurements.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = measurements.iter().copied().collect();
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx]
    }

    /// Get the count of recorded measurements
    pub fn count(&self) -> usize {
        self.measurements.lock().len()
    }
}

/// Per-stage counters, shared between the runner thread and the orchestrator
#[derive(Debug, Clone)]
pub struct StageMetrics {
    /// Items that finished service in this stage
    served: Arc<AtomicU64>,
    /// Items dropped from this stage by cancellation
    abandoned: Arc<AtomicU64>,
    /// Times a permit acquire had to wait
    permit_waits: Arc<AtomicU64>,
    /// Times forwarding found the downstream queue full
    forward_blocks: Arc<AtomicU64>,
    /// Admission refusals while the workshop was closed
    refusals: Arc<AtomicU64>,
    service_time: PercentileTracker,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self {
            served: Arc::new(AtomicU64::new(0)),
            abandoned: Arc::new(AtomicU64::new(0)),
            permit_waits: Arc::new(AtomicU64::new(0)),
            forward_blocks: Arc::new(AtomicU64::new(0)),
            refusals: Arc::new(AtomicU64::new(0)),
            service_time: PercentileTracker::new(1000),
        }
    }

    pub fn record_served(&self, service: Duration) {
        self.served.fetch_add(1, Ordering::Relaxed);
        self.service_time.record(service.as_millis() as u64);
    }

    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_permit_wait(&self) {
        self.permit_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forward_block(&self) {
        self.forward_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refusal(&self) {
        self.refusals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    pub fn total_abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, phase: Phase) -> StageSnapshot {
        StageSnapshot {
            phase,
            served: self.total_served(),
            abandoned: self.total_abandoned(),
            permit_waits: self.permit_waits.load(Ordering::Relaxed),
            forward_blocks: self.forward_blocks.load(Ordering::Relaxed),
            refusals: self.refusals.load(Ordering::Relaxed),
            service_p50_ms: self.service_time.p50_ms(),
            service_p95_ms: self.service_time.p95_ms(),
            service_p99_ms: self.service_time.p99_ms(),
        }
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Stage counters at the end of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub phase: Phase,
    pub served: u64,
    pub abandoned: u64,
    pub permit_waits: u64,
    pub forward_blocks: u64,
    pub refusals: u64,
    pub service_p50_ms: u64,
    pub service_p95_ms: u64,
    pub service_p99_ms: u64,
}

impl fmt::Display for StageSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Phase {} ({}): served {}, abandoned {}, permit waits {}, forward blocks {}, \
             refusals {}, service p50 {}ms p95 {}ms p99 {}ms",
            self.phase.number(),
            self.phase,
            self.served,
            self.abandoned,
            self.permit_waits,
            self.forward_blocks,
            self.refusals,
            self.service_p50_ms,
            self.service_p95_ms,
            self.service_p99_ms
        )
    }
}

/// Aggregate result of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMetrics {
    pub total_processed: u64,
    pub by_class: [u64; 3],
    pub total_duration: Duration,
    /// Run ended by cancellation before every item completed
    pub cancelled: bool,
    /// Slots returned for items left waiting between stages
    pub stranded_released: u64,
    /// Permits still in use once the run was cleaned up
    pub permits_held: usize,
    pub stages: Vec<StageSnapshot>,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one completed item
    pub fn record_completion(&mut self, item: &Item) {
        self.total_processed += 1;
        self.by_class[item.class.index()] += 1;
    }

    pub fn processed(&self, class: Class) -> u64 {
        self.by_class[class.index()]
    }
}

impl fmt::Display for RunMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total processed: {}", self.total_processed)?;
        writeln!(f, "Total time: {:.3}s", self.total_duration.as_secs_f64())?;
        write!(
            f,
            "By class: A={} B={} C={}",
            self.processed(Class::A),
            self.processed(Class::B),
            self.processed(Class::C)
        )?;
        if self.cancelled {
            write!(
                f,
                " (cancelled, {} slots released from queues)",
                self.stranded_released
            )?;
        }
        for stage in &self.stages {
            write!(f, "\n  {stage}")?;
        }
        Ok(())
    }
}
