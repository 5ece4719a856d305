use crate::error::{PipelineError, Result};
use crate::item::{Class, Phase};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Everything a run needs to know up front
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address of the control feed server (`host:port`)
    pub server_addr: String,

    /// Items generated per class
    pub num_a: usize,
    pub num_b: usize,
    pub num_c: usize,

    /// Workshop slots, held from phase 1 entry to phase 4 exit
    pub num_slots: usize,
    /// Mechanics serving phase 2
    pub num_workers_stage2: usize,
    /// Cleaners serving phase 3
    pub num_cleaners: usize,
    /// Reviewers serving phase 4
    pub num_reviewers: usize,

    /// Per-class queue capacity in front of each phase
    pub max_queue_depth: [usize; 4],

    /// Upper bound of the whole-unit jitter added to each service
    pub max_jitter_units: u64,
    /// Length of one service unit (a class A service lasts 5 units)
    pub time_unit: Duration,
    /// Upper bound of the random delay before each arrival
    pub max_arrival_jitter: Duration,
    /// Dispatcher re-poll interval while idle
    pub idle_interval: Duration,
    /// Let phases 2-4 keep serving while the workshop is closed
    pub drain_on_close: bool,

    /// RNG seed; 0 derives one from the wall clock
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: "localhost:8000".to_string(),
            num_a: 10,
            num_b: 10,
            num_c: 10,
            num_slots: 6,
            num_workers_stage2: 3,
            num_cleaners: 1,
            num_reviewers: 1,
            max_queue_depth: [20; 4],
            max_jitter_units: 2,
            time_unit: Duration::from_secs(1),
            max_arrival_jitter: Duration::from_millis(250),
            idle_interval: Duration::from_millis(10),
            drain_on_close: true,
            seed: 0,
        }
    }
}

impl Config {
    /// Items generated for `class`
    pub fn count_for(&self, class: Class) -> usize {
        match class {
            Class::A => self.num_a,
            Class::B => self.num_b,
            Class::C => self.num_c,
        }
    }

    pub fn total_items(&self) -> usize {
        self.num_a + self.num_b + self.num_c
    }

    pub fn queue_depth(&self, phase: Phase) -> usize {
        self.max_queue_depth[phase.index()]
    }

    /// Seed actually used for this run
    pub fn resolved_seed(&self) -> u64 {
        if self.seed != 0 {
            return self.seed;
        }
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
            .max(1)
    }

    /// Service length before jitter
    pub fn base_service(&self, class: Class) -> Duration {
        self.time_unit * class.base_units()
    }

    /// Check capacities and timings
    pub fn validate(&self) -> Result<()> {
        let pools = [
            ("num_slots", self.num_slots),
            ("num_workers_stage2", self.num_workers_stage2),
            ("num_cleaners", self.num_cleaners),
            ("num_reviewers", self.num_reviewers),
        ];
        for (name, value) in pools {
            if value == 0 {
                return Err(PipelineError::ConfigError(format!(
                    "{name} must be at least 1"
                )));
            }
        }

        for (i, depth) in self.max_queue_depth.iter().enumerate() {
            if *depth == 0 {
                return Err(PipelineError::ConfigError(format!(
                    "max queue depth for phase {} must be at least 1",
                    i + 1
                )));
            }
        }

        if self.time_unit.is_zero() {
            return Err(PipelineError::ConfigError(
                "time unit must be positive".into(),
            ));
        }
        if self.idle_interval.is_zero() {
            return Err(PipelineError::ConfigError(
                "idle interval must be positive".into(),
            ));
        }

        Ok(())
    }
}
