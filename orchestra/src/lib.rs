//! Data-parallel training orchestration.
//!
//! A fixed pool of model replicas, one per device, trains on batches streamed
//! from a [`DataSource`] through a bounded prefetch buffer. Every
//! `averaging_frequency` batches the replicas are quiesced, their states
//! averaged into a consensus and the consensus broadcast back.

pub mod averaging;
pub mod backend;
pub mod config;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod pool;
pub mod prefetch;
pub mod state;

pub use averaging::{AveragingCoordinator, AveragingRound, Transport, Trigger};
pub use backend::Backend;
pub use config::{Device, TrainingConfig};
pub use data::{Batch, DataSource, InMemorySource};
pub use error::{BufferClosed, ComputeErr, DataErr, OrchestraErr, Result};
pub use evaluation::{ConfusionMatrix, Evaluator, MetricsReport};
pub use events::{
    BatchEvent, ChannelListener, DegradedEvent, LogListener, TrainingEvent, TrainingListener,
};
pub use metrics::{EpochStats, SlotMetrics, TrainingSummary};
pub use orchestrator::{Orchestrator, TrainingPhase};
pub use pool::{SlotEvent, SoftBarrier, WorkerPool, WorkerSlot};
pub use state::{ModelState, Owner};
