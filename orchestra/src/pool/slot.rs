use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    time::{Duration, Instant},
};

use crate::{
    backend::Backend,
    config::Device,
    data::Batch,
    error::ComputeErr,
    metrics::SlotMetrics,
    state::{ModelState, Owner},
};

/// One model replica plus the buffers it trains with.
///
/// The replica is moved into the blocking task computing a batch and handed
/// back with the result, so while it is away nothing else can touch it.
#[derive(Debug)]
pub(crate) struct Replica<B> {
    backend: B,
    grad: Vec<f32>,
    version: u64,
    owner: Owner,
    local_steps: u64,
}

impl<B: Backend> Replica<B> {
    pub(crate) fn new(backend: B) -> Self {
        let grad = vec![0.0; backend.num_params()];
        Self {
            backend,
            grad,
            version: 0,
            owner: Owner::Consensus,
            local_steps: 0,
        }
    }

    /// Forward, loss, backward and one local optimizer step.
    fn train(&mut self, id: usize, batch: &Batch) -> Result<f32, ComputeErr> {
        let predictions = self.backend.forward(batch.features())?;
        if predictions.nrows() != batch.len() {
            return Err(ComputeErr::ShapeMismatch {
                what: "prediction rows",
                got: predictions.nrows(),
                expected: batch.len(),
            });
        }

        self.grad.fill(0.0);
        let loss = self
            .backend
            .backward(predictions.view(), batch.labels(), &mut self.grad)?;

        if !loss.is_finite() {
            return Err(ComputeErr::NonFinite { what: "loss" });
        }
        if self.grad.iter().any(|g| !g.is_finite()) {
            return Err(ComputeErr::NonFinite { what: "gradient" });
        }

        self.backend.apply_update(&self.grad)?;
        self.owner = Owner::Worker(id);
        self.local_steps += 1;
        Ok(loss)
    }

    pub(crate) fn snapshot(&self) -> ModelState {
        ModelState::capture(&self.backend, self.owner, self.version)
    }

    /// Replaces the local state with a consensus.
    pub(crate) fn install(
        &mut self,
        consensus: &ModelState,
        with_updater: bool,
    ) -> Result<(), ComputeErr> {
        self.backend.set_params(consensus.params())?;
        if with_updater {
            self.backend.set_updater_state(consensus.updater())?;
        }

        self.version = consensus.version();
        self.owner = Owner::Consensus;
        self.local_steps = 0;
        Ok(())
    }

    pub(crate) fn backend(&self) -> &B {
        &self.backend
    }

    pub(crate) fn owner(&self) -> Owner {
        self.owner
    }

    pub(crate) fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn local_steps(&self) -> u64 {
        self.local_steps
    }
}

/// What a blocking compute task hands back to the pool.
pub(crate) struct Completion<B> {
    pub(crate) slot: usize,
    pub(crate) seq: usize,
    pub(crate) samples: usize,
    pub(crate) elapsed: Duration,
    pub(crate) outcome: Result<f32, ComputeErr>,
    pub(crate) replica: Replica<B>,
}

/// Trains `replica` on `batch`, turning a backend panic into a compute fault.
///
/// Runs on the blocking pool.
pub(crate) fn run_batch<B: Backend>(
    slot: usize,
    mut replica: Replica<B>,
    batch: Batch,
) -> Completion<B> {
    let start = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| replica.train(slot, &batch)))
        .unwrap_or_else(|payload| Err(ComputeErr::Panicked(panic_message(payload.as_ref()))));

    Completion {
        slot,
        seq: batch.seq(),
        samples: batch.len(),
        elapsed: start.elapsed(),
        outcome,
        replica,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A pool member: one device, one replica, its counters and health.
#[derive(Debug)]
pub struct WorkerSlot<B> {
    id: usize,
    device: Device,
    degraded: bool,
    replica: Option<Replica<B>>,
    metrics: SlotMetrics,
}

impl<B: Backend> WorkerSlot<B> {
    pub(crate) fn new(id: usize, device: Device, backend: B) -> Self {
        Self {
            id,
            device,
            degraded: false,
            replica: Some(Replica::new(backend)),
            metrics: SlotMetrics::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn device(&self) -> Device {
        self.device
    }

    #[inline]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Whether the replica is away computing a batch.
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.replica.is_none()
    }

    #[inline]
    pub fn metrics(&self) -> &SlotMetrics {
        &self.metrics
    }

    /// Snapshots the replica, if it is home.
    pub fn state(&self) -> Option<ModelState> {
        self.replica.as_ref().map(Replica::snapshot)
    }

    /// The replica's backend, if it is home.
    pub fn backend(&self) -> Option<&B> {
        self.replica.as_ref().map(Replica::backend)
    }

    /// Batches trained since the replica last received a consensus.
    pub fn local_steps(&self) -> u64 {
        self.replica.as_ref().map_or(0, Replica::local_steps)
    }

    pub(crate) fn is_idle(&self) -> bool {
        !self.degraded && self.replica.is_some()
    }

    pub(crate) fn take_replica(&mut self) -> Option<Replica<B>> {
        self.replica.take()
    }

    pub(crate) fn replica(&self) -> Option<&Replica<B>> {
        self.replica.as_ref()
    }

    pub(crate) fn replica_mut(&mut self) -> Option<&mut Replica<B>> {
        self.replica.as_mut()
    }

    pub(crate) fn metrics_mut(&mut self) -> &mut SlotMetrics {
        &mut self.metrics
    }

    pub(crate) fn restore(&mut self, replica: Replica<B>) {
        self.replica = Some(replica);
    }

    pub(crate) fn mark_degraded(&mut self) {
        self.degraded = true;
    }
}
