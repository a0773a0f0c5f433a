use std::{num::NonZeroUsize, time::Instant};

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    averaging::{AveragingCoordinator, AveragingSchedule, Trigger},
    backend::Backend,
    config::{Device, TrainingConfig},
    data::DataSource,
    error::{ComputeErr, OrchestraErr, Result},
    evaluation::{Evaluator, MetricsReport},
    events::{BatchEvent, DegradedEvent, TrainingListener},
    metrics::{EpochStats, TrainingSummary},
    pool::{SlotEvent, WorkerPool},
    prefetch::{self, FeedEnd},
    state::ModelState,
};

/// Where a training run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    Idle,
    /// `batch` batches of `epoch` were dispatched so far.
    Running { epoch: usize, batch: usize },
    /// Waiting for in-flight batches before an averaging round.
    AveragingPending { epoch: usize, batch: usize },
    EpochComplete { epoch: usize },
    Finished,
    Failed,
    Cancelled,
}

#[derive(Debug, Default)]
struct RunStats {
    epochs: Vec<EpochStats>,
    batches: usize,
    iterations: usize,
    rounds: usize,
    degraded: Vec<usize>,
}

/// Drives data-parallel training: epochs of batches flow from a source
/// through a prefetch buffer into the worker pool, and the slot states are
/// averaged every `averaging_frequency` batches.
pub struct Orchestrator<B> {
    config: TrainingConfig,
    pool: WorkerPool<B>,
    coordinator: AveragingCoordinator,
    schedule: AveragingSchedule,
    listeners: Vec<Box<dyn TrainingListener>>,
    phase: TrainingPhase,
    position: (usize, usize),
    token: CancellationToken,
}

impl<B: Backend> Orchestrator<B> {
    /// Creates a new `Orchestrator`.
    ///
    /// Builds one replica per configured device and makes the first one's
    /// state the initial consensus on every slot.
    ///
    /// # Arguments
    /// * `config` - The training configuration.
    /// * `factory` - Builds the replica for a slot id and its device.
    ///
    /// # Returns
    /// The orchestrator, `InvalidConfig` if the configuration or the
    /// replicas are inconsistent, or `WorkerCompute` if a replica could not
    /// be built.
    pub fn new<F>(config: TrainingConfig, factory: F) -> Result<Self>
    where
        F: FnMut(usize, Device) -> std::result::Result<B, ComputeErr>,
    {
        config.validate()?;

        let mut pool = WorkerPool::new(config.devices(), factory)?;
        let coordinator = {
            let mut barrier = pool
                .barrier()
                .ok_or_else(|| OrchestraErr::Runtime("fresh pool is busy".into()))?;
            AveragingCoordinator::seed(
                config.transport(),
                config.average_updaters,
                config.report_score_after_averaging,
                &mut barrier,
            )?
        };

        info!(
            workers = pool.len(),
            params = coordinator.consensus().params().len();
            "orchestrator ready, averaging every {} batches over {:?}",
            config.averaging_frequency,
            config.transport()
        );

        Ok(Self {
            schedule: AveragingSchedule::new(config.averaging_frequency),
            config,
            pool,
            coordinator,
            listeners: Vec::new(),
            phase: TrainingPhase::Idle,
            position: (0, 0),
            token: CancellationToken::new(),
        })
    }

    /// Registers a listener.
    pub fn with_listener<L: TrainingListener + 'static>(mut self, listener: L) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    pub fn add_listener(&mut self, listener: Box<dyn TrainingListener>) {
        self.listeners.push(listener);
    }

    /// A token that stops the run when cancelled.
    ///
    /// Cancellation is final: once a run has ended in `Cancelled`, later
    /// runs are refused.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn phase(&self) -> TrainingPhase {
        self.phase
    }

    pub fn pool(&self) -> &WorkerPool<B> {
        &self.pool
    }

    /// The authoritative consensus state.
    pub fn consensus(&self) -> &ModelState {
        self.coordinator.consensus()
    }

    /// A healthy replica holding the consensus, if any still does.
    pub fn consensus_model(&self) -> Option<&B> {
        self.pool.consensus_backend(self.coordinator.consensus())
    }

    /// Trains for the configured number of epochs.
    ///
    /// Cancellation stops the source, lets in-flight batches finish, closes
    /// the prefetch buffer and skips any pending averaging round; the run
    /// then ends in `Cancelled` and still returns a summary.
    ///
    /// # Arguments
    /// * `source` - The training data; it is reset at the start of every epoch.
    ///
    /// # Returns
    /// The run summary, `Aborted` wrapping the fatal error together with
    /// the epoch and batch it happened at, or `Cancelled` if an earlier run
    /// was already cancelled.
    pub async fn run<S: DataSource>(&mut self, source: S) -> Result<TrainingSummary> {
        if self.phase == TrainingPhase::Cancelled {
            warn!("refusing to run, the orchestrator was cancelled");
            return Err(OrchestraErr::Cancelled);
        }

        let started = Instant::now();
        let mut run = RunStats::default();

        match self.drive(source, &mut run).await {
            Ok(cancelled) => {
                self.phase = if cancelled {
                    TrainingPhase::Cancelled
                } else {
                    TrainingPhase::Finished
                };

                let summary = TrainingSummary {
                    epochs: run.epochs,
                    batches: run.batches,
                    averaging_rounds: run.rounds,
                    degraded: run.degraded,
                    elapsed: started.elapsed(),
                    cancelled,
                    consensus: self.coordinator.consensus().clone(),
                };

                info!(
                    batches = summary.batches,
                    rounds = summary.averaging_rounds,
                    version = summary.consensus.version(),
                    cancelled = cancelled;
                    "training finished in {:?}", summary.elapsed
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(quiesce) = self.pool.quiesce().await {
                    warn!("could not quiesce the pool after a failure: {quiesce}");
                }
                self.phase = TrainingPhase::Failed;

                let (epoch, batch) = self.position;
                error!(epoch = epoch, batch = batch, kind = e.kind(); "training aborted: {e}");
                Err(OrchestraErr::Aborted {
                    epoch,
                    batch,
                    cause: Box::new(e),
                })
            }
        }
    }

    /// Scores the consensus on a held-out source.
    ///
    /// CPU-bound; call it off the async workers (e.g. `block_in_place`).
    ///
    /// # Arguments
    /// * `source` - The held-out data; reset before and after the pass.
    /// * `num_classes` - The width of prediction and label rows.
    ///
    /// # Returns
    /// The metrics report, or `InvalidConfig` if `num_classes` is zero.
    pub fn evaluate<S>(&mut self, source: &mut S, num_classes: usize) -> Result<MetricsReport>
    where
        S: DataSource + ?Sized,
    {
        let num_classes = NonZeroUsize::new(num_classes).ok_or_else(|| {
            OrchestraErr::InvalidConfig("evaluation needs at least one class".into())
        })?;
        let consensus = self.coordinator.consensus();
        let backend = self.pool.consensus_replica(consensus)?;
        let report = Evaluator::new(num_classes).evaluate(backend, source)?;

        info!(
            samples = report.total(), version = consensus.version();
            "evaluation finished, accuracy {:?}", report.accuracy()
        );
        Ok(report)
    }

    /// Runs every epoch.
    ///
    /// # Returns
    /// Whether the run was cancelled.
    async fn drive<S: DataSource>(&mut self, mut source: S, run: &mut RunStats) -> Result<bool> {
        for epoch in 0..self.config.epochs.get() {
            if self.token.is_cancelled() {
                info!(epoch = epoch; "cancelled before the epoch started");
                return Ok(true);
            }

            let started = Instant::now();
            let mut stats = EpochStats::new(epoch);
            source.reset();
            self.enter(epoch, 0);
            info!(epoch = epoch; "starting epoch of {} batches", source.batches_per_epoch());

            let (mut rx, feeder) = prefetch::spawn_prefetch(
                source,
                self.config.prefetch_buffer_capacity,
                self.token.clone(),
            );

            let mut dispatched = 0;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = self.token.cancelled() => None,
                    popped = rx.pop() => popped.ok(),
                };
                let Some(batch) = next else {
                    break;
                };

                let (_, events) = self.pool.dispatch(batch).await?;
                dispatched += 1;
                run.batches += 1;
                self.enter(epoch, dispatched);
                self.handle_events(epoch, events, &mut stats, run)?;

                if self.schedule.record_batch() {
                    self.synchronize(epoch, Trigger::Boundary, &mut stats, run).await?;
                    self.enter(epoch, dispatched);
                }
            }

            if self.token.is_cancelled() {
                rx.close();
                let dropped = rx.drain().len();
                debug!(epoch = epoch, dropped = dropped; "released prefetched batches");
            }

            let fed = feeder
                .await
                .map_err(|e| OrchestraErr::Runtime(format!("prefetch join error: {e}")))?;
            let end = fed.end?;
            source = fed.source;

            if self.token.is_cancelled() || end == FeedEnd::Cancelled {
                let events = self.pool.quiesce().await?;
                self.handle_events(epoch, events, &mut stats, run)?;
                stats.elapsed = started.elapsed();
                run.epochs.push(stats);

                info!(
                    epoch = epoch, batch = dispatched;
                    "training cancelled, skipping {} pending batches of averaging",
                    self.schedule.since_last()
                );
                return Ok(true);
            }

            if self.schedule.pending() {
                self.synchronize(epoch, Trigger::EpochEnd, &mut stats, run).await?;
            } else {
                let events = self.pool.quiesce().await?;
                self.handle_events(epoch, events, &mut stats, run)?;
            }

            self.phase = TrainingPhase::EpochComplete { epoch };
            stats.elapsed = started.elapsed();
            for listener in &mut self.listeners {
                listener.on_epoch_complete(&stats);
            }
            run.epochs.push(stats);
        }

        Ok(false)
    }

    /// Quiesces the pool and runs one averaging round.
    async fn synchronize(
        &mut self,
        epoch: usize,
        trigger: Trigger,
        stats: &mut EpochStats,
        run: &mut RunStats,
    ) -> Result<()> {
        let (_, batch) = self.position;
        self.phase = TrainingPhase::AveragingPending { epoch, batch };

        let events = self.pool.quiesce().await?;
        self.handle_events(epoch, events, stats, run)?;

        let mut barrier = self
            .pool
            .barrier()
            .ok_or_else(|| OrchestraErr::Runtime("pool busy after quiesce".into()))?;
        let round = self.coordinator.average(&mut barrier, epoch, trigger)?;

        self.schedule.mark_averaged();
        stats.averaging_rounds += 1;
        run.rounds += 1;
        for listener in &mut self.listeners {
            listener.on_averaging_complete(&round);
        }
        Ok(())
    }

    /// Accounts for finished batches and isolates faulted slots.
    fn handle_events(
        &mut self,
        epoch: usize,
        events: Vec<SlotEvent>,
        stats: &mut EpochStats,
        run: &mut RunStats,
    ) -> Result<()> {
        for event in events {
            match event {
                SlotEvent::Completed {
                    slot,
                    seq,
                    samples,
                    loss,
                    elapsed,
                } => {
                    stats.record_batch(samples, loss);
                    run.iterations += 1;

                    let event = BatchEvent {
                        epoch,
                        iteration: run.iterations,
                        slot,
                        seq,
                        samples,
                        loss,
                        elapsed,
                    };
                    for listener in &mut self.listeners {
                        listener.on_batch_complete(&event);
                    }
                }
                SlotEvent::Faulted { slot, seq, error } => {
                    stats.faulted += 1;
                    run.degraded.push(slot);

                    let device = self
                        .pool
                        .slots()
                        .get(slot)
                        .map_or(Device::Cpu(slot), |s| s.device());
                    warn!(
                        epoch = epoch, slot = slot, seq = seq, healthy = self.pool.healthy();
                        "worker slot {slot} on {device} degraded: {error}"
                    );

                    let event = DegradedEvent {
                        epoch,
                        slot,
                        device,
                        seq,
                        error: error.clone(),
                    };
                    for listener in &mut self.listeners {
                        listener.on_slot_degraded(&event);
                    }

                    if self.config.abort_on_degraded {
                        return Err(OrchestraErr::WorkerCompute {
                            slot,
                            source: error,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn enter(&mut self, epoch: usize, batch: usize) {
        self.position = (epoch, batch);
        self.phase = TrainingPhase::Running { epoch, batch };
    }
}
