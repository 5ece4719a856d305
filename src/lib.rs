//! A policy-driven, four-phase workshop pipeline.
//!
//! Items of three priority classes (A, B, C) flow through four sequential
//! phases. Each phase has one bounded FIFO queue per class and a permit pool
//! bounding how many items it serves at once; a pipeline-wide slot pool bounds
//! how many items are inside the workshop.
//!
//! A single control value, fed from outside and owned by a [`StateCell`],
//! decides at every dispatch which classes may be admitted and in which order
//! they are preferred.
//!
//! # Features
//!
//! - Per-stage [`Dispatcher`] that re-reads policy on every call and never
//!   busy-spins
//! - Bounded crossbeam channels with blocking, cancellable backpressure
//! - Counting permit pools with strict accounting
//! - Global cooperative cancellation through [`CancelToken`]
//! - Bit-exact event log lines and per-stage metrics
//!
//! # Example
//!
//! ```ignore
//! use workshop_pipeline::{CancelToken, Config, PipelineBuilder, StateCell};
//!
//! let cell = StateCell::spawn()?;
//! cell.handle().set(4);
//!
//! let pipeline = PipelineBuilder::new(Config::default()).build()?;
//! let metrics = pipeline.run(&cell.handle(), &CancelToken::new())?;
//! println!("{metrics}");
//! ```

pub mod buffer;
pub mod cancel;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod feed;
pub mod generator;
pub mod item;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod stage;
pub mod state;

// Re-exports for convenience
pub use buffer::{ClassQueue, PushOutcome, QueueSet};
pub use cancel::CancelToken;
pub use config::Config;
pub use control::{Mode, Policy};
pub use dispatcher::{ClosedBehavior, Dispatcher};
pub use error::{PipelineError, Result};
pub use event::{format_elapsed, EventLog, EventSink, MemorySink, StageEvent, StdoutSink, Transition};
pub use feed::{parse_control_line, run_feed, FeedStats};
pub use generator::Generator;
pub use item::{Class, IdIssuer, Item, Phase};
pub use metrics::{RunMetrics, StageMetrics, StageSnapshot};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use pool::ResourcePool;
pub use stage::{Downstream, Gate, ServiceClock, StageRunner};
pub use state::{StateCell, StateHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
