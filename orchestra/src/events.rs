use std::{num::NonZeroUsize, time::Duration};

use log::{info, warn};
use tokio::sync::mpsc;

use crate::{averaging::AveragingRound, config::Device, error::ComputeErr, metrics::EpochStats};

/// A batch a slot finished successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEvent {
    pub epoch: usize,
    /// Successful batches since the run started, this one included.
    pub iteration: usize,
    pub slot: usize,
    pub seq: usize,
    pub samples: usize,
    pub loss: f32,
    pub elapsed: Duration,
}

/// A slot that failed a batch and left the pool for good.
#[derive(Debug, Clone, PartialEq)]
pub struct DegradedEvent {
    pub epoch: usize,
    pub slot: usize,
    pub device: Device,
    pub seq: usize,
    pub error: ComputeErr,
}

/// Observes a training run.
///
/// Callbacks run synchronously on the orchestrator's task, so they should be
/// quick; every method defaults to doing nothing.
pub trait TrainingListener: Send {
    fn on_batch_complete(&mut self, _event: &BatchEvent) {}

    fn on_averaging_complete(&mut self, _round: &AveragingRound) {}

    fn on_epoch_complete(&mut self, _stats: &EpochStats) {}

    fn on_slot_degraded(&mut self, _event: &DegradedEvent) {}
}

/// Logs the loss every `every` successful batches and a line per epoch.
#[derive(Debug, Clone)]
pub struct LogListener {
    every: NonZeroUsize,
}

impl LogListener {
    pub fn new(every: NonZeroUsize) -> Self {
        Self { every }
    }
}

impl TrainingListener for LogListener {
    fn on_batch_complete(&mut self, event: &BatchEvent) {
        if event.iteration % self.every.get() == 0 {
            info!(
                epoch = event.epoch, iteration = event.iteration, slot = event.slot;
                "score at iteration {} is {}", event.iteration, event.loss
            );
        }
    }

    fn on_epoch_complete(&mut self, stats: &EpochStats) {
        info!(
            epoch = stats.epoch, batches = stats.batches, rounds = stats.averaging_rounds;
            "epoch finished in {:?}, mean loss {:?}", stats.elapsed, stats.mean_loss
        );
    }

    fn on_slot_degraded(&mut self, event: &DegradedEvent) {
        warn!(
            epoch = event.epoch, slot = event.slot;
            "slot on {} left the pool: {}", event.device, event.error
        );
    }
}

/// Everything a `ChannelListener` forwards.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingEvent {
    Batch(BatchEvent),
    Averaged(AveragingRound),
    Epoch(EpochStats),
    Degraded(DegradedEvent),
}

/// Forwards every callback as a `TrainingEvent` into a channel, so another
/// task can watch the run.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<TrainingEvent>,
}

impl ChannelListener {
    /// Creates a new `ChannelListener`.
    ///
    /// # Returns
    /// The listener and the receiving end of its events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TrainingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: TrainingEvent) {
        // A dropped receiver only means nobody is watching anymore.
        let _ = self.tx.send(event);
    }
}

impl TrainingListener for ChannelListener {
    fn on_batch_complete(&mut self, event: &BatchEvent) {
        self.forward(TrainingEvent::Batch(event.clone()));
    }

    fn on_averaging_complete(&mut self, round: &AveragingRound) {
        self.forward(TrainingEvent::Averaged(round.clone()));
    }

    fn on_epoch_complete(&mut self, stats: &EpochStats) {
        self.forward(TrainingEvent::Epoch(stats.clone()));
    }

    fn on_slot_degraded(&mut self, event: &DegradedEvent) {
        self.forward(TrainingEvent::Degraded(event.clone()));
    }
}
