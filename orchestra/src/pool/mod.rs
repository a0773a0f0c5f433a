mod slot;

use std::time::Duration;

use log::debug;
use tokio::task::{JoinError, JoinSet};

pub use slot::WorkerSlot;
pub(crate) use slot::Replica;

use crate::{
    backend::Backend,
    config::Device,
    data::Batch,
    error::{ComputeErr, OrchestraErr, Result},
    state::ModelState,
};
use slot::Completion;

fn holds<B: Backend>(replica: &Replica<B>, consensus: &ModelState) -> bool {
    replica.owner() == consensus.owner() && replica.version() == consensus.version()
}

/// The outcome of one batch on one slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotEvent {
    Completed {
        slot: usize,
        seq: usize,
        samples: usize,
        loss: f32,
        elapsed: Duration,
    },
    /// The slot failed the batch and is now degraded.
    Faulted {
        slot: usize,
        seq: usize,
        error: ComputeErr,
    },
}

impl SlotEvent {
    pub fn slot(&self) -> usize {
        match self {
            SlotEvent::Completed { slot, .. } | SlotEvent::Faulted { slot, .. } => *slot,
        }
    }
}

/// A fixed set of worker slots, one per device.
///
/// Batches go to idle slots round-robin; each runs on the blocking pool with
/// the slot's replica moved into the task. A slot that faults is degraded for
/// good: it gets no more batches and takes no part in averaging.
pub struct WorkerPool<B> {
    slots: Vec<WorkerSlot<B>>,
    in_flight: JoinSet<Completion<B>>,
    cursor: usize,
}

impl<B: Backend> WorkerPool<B> {
    /// Creates a new `WorkerPool`.
    ///
    /// # Arguments
    /// * `devices` - One device per slot; slot `i` is bound to `devices[i]`.
    /// * `factory` - Builds the replica for a slot id and its device.
    ///
    /// # Returns
    /// The pool, `InvalidConfig` if there are no devices or the replicas
    /// disagree on their parameter count, or `WorkerCompute` for the first
    /// slot whose replica could not be built.
    pub fn new<F>(devices: Vec<Device>, mut factory: F) -> Result<Self>
    where
        F: FnMut(usize, Device) -> std::result::Result<B, ComputeErr>,
    {
        if devices.is_empty() {
            return Err(OrchestraErr::InvalidConfig(
                "a worker pool needs at least one device".into(),
            ));
        }

        let slots = devices
            .into_iter()
            .enumerate()
            .map(|(id, device)| {
                let backend = factory(id, device)
                    .map_err(|source| OrchestraErr::WorkerCompute { slot: id, source })?;
                Ok(WorkerSlot::new(id, device, backend))
            })
            .collect::<Result<Vec<_>>>()?;

        let expected = slots[0].backend().map_or(0, B::num_params);
        for slot in &slots {
            let got = slot.backend().map_or(0, |b| b.params().len());
            if got != expected {
                return Err(OrchestraErr::InvalidConfig(format!(
                    "slot {} has {got} parameters, slot 0 has {expected}",
                    slot.id()
                )));
            }
        }

        Ok(Self {
            slots,
            in_flight: JoinSet::new(),
            cursor: 0,
        })
    }

    /// Hands a batch to the next idle slot.
    ///
    /// Waits for a completion when every healthy slot is busy. Completions
    /// collected along the way are returned so the caller sees every outcome.
    ///
    /// # Returns
    /// The slot the batch went to and the events reaped meanwhile, or
    /// `NoHealthyWorkers` if every slot is degraded.
    pub async fn dispatch(&mut self, batch: Batch) -> Result<(usize, Vec<SlotEvent>)> {
        let mut events = Vec::new();
        while let Some(joined) = self.in_flight.try_join_next() {
            events.push(self.complete(joined)?);
        }

        loop {
            if self.healthy() == 0 {
                return Err(OrchestraErr::NoHealthyWorkers);
            }

            if let Some(id) = self.next_idle() {
                self.start(id, batch);
                return Ok((id, events));
            }

            match self.in_flight.join_next().await {
                Some(joined) => events.push(self.complete(joined)?),
                None => {
                    return Err(OrchestraErr::Runtime(
                        "healthy slots are busy but nothing is in flight".into(),
                    ));
                }
            }
        }
    }

    /// Waits until every in-flight batch has finished.
    ///
    /// # Returns
    /// The events of the batches that finished.
    pub async fn quiesce(&mut self) -> Result<Vec<SlotEvent>> {
        let mut events = Vec::new();
        while let Some(joined) = self.in_flight.join_next().await {
            events.push(self.complete(joined)?);
        }
        Ok(events)
    }

    /// Grants exclusive access to every replica.
    ///
    /// # Returns
    /// The barrier, or `None` while a batch is still in flight.
    pub fn barrier(&mut self) -> Option<SoftBarrier<'_, B>> {
        if !self.in_flight.is_empty() {
            return None;
        }
        Some(SoftBarrier {
            slots: &mut self.slots,
        })
    }

    pub fn slots(&self) -> &[WorkerSlot<B>] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The number of slots that are not degraded.
    pub fn healthy(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_degraded()).count()
    }

    /// The number of batches currently being computed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// The ids of the degraded slots.
    pub fn degraded(&self) -> Vec<usize> {
        self.slots
            .iter()
            .filter(|s| s.is_degraded())
            .map(WorkerSlot::id)
            .collect()
    }

    /// A healthy replica holding exactly the given consensus, if any.
    pub fn consensus_backend(&self, consensus: &ModelState) -> Option<&B> {
        self.slots
            .iter()
            .filter(|s| !s.is_degraded())
            .filter_map(WorkerSlot::replica)
            .find(|r| holds(r, consensus))
            .map(Replica::backend)
    }

    /// A healthy replica holding the given consensus, installing it on the
    /// first healthy slot if none does.
    ///
    /// # Returns
    /// The replica's backend, `NoHealthyWorkers` if every slot is degraded,
    /// or `Inference` if the pool is busy or the consensus can't be installed.
    pub(crate) fn consensus_replica(&mut self, consensus: &ModelState) -> Result<&B> {
        if !self.in_flight.is_empty() {
            return Err(OrchestraErr::Inference(ComputeErr::Backend(
                "replicas are still training".into(),
            )));
        }

        let holding = self.slots.iter().position(|s| {
            !s.is_degraded() && s.replica().is_some_and(|r| holds(r, consensus))
        });

        let id = match holding {
            Some(id) => id,
            None => {
                let id = self
                    .slots
                    .iter()
                    .position(|s| !s.is_degraded())
                    .ok_or(OrchestraErr::NoHealthyWorkers)?;
                let replica = self.slots[id].replica_mut().ok_or_else(|| {
                    OrchestraErr::Inference(ComputeErr::Backend(format!("slot {id} has no replica")))
                })?;
                replica
                    .install(consensus, false)
                    .map_err(OrchestraErr::Inference)?;
                debug!(slot = id, version = consensus.version(); "reinstalled consensus for inference");
                id
            }
        };

        self.slots[id].backend().ok_or_else(|| {
            OrchestraErr::Inference(ComputeErr::Backend(format!("slot {id} has no replica")))
        })
    }

    fn next_idle(&mut self) -> Option<usize> {
        let n = self.slots.len();
        let id = (0..n)
            .map(|off| (self.cursor + off) % n)
            .find(|&i| self.slots[i].is_idle())?;
        self.cursor = (id + 1) % n;
        Some(id)
    }

    fn start(&mut self, id: usize, batch: Batch) {
        let Some(replica) = self.slots[id].take_replica() else {
            return;
        };

        debug!(slot = id, seq = batch.seq(); "dispatching batch");
        self.in_flight.spawn_blocking(move || slot::run_batch(id, replica, batch));
    }

    fn complete(
        &mut self,
        joined: std::result::Result<Completion<B>, JoinError>,
    ) -> Result<SlotEvent> {
        let done = joined.map_err(|e| OrchestraErr::Runtime(format!("compute join error: {e}")))?;
        let slot = &mut self.slots[done.slot];
        slot.restore(done.replica);

        match done.outcome {
            Ok(loss) => {
                slot.metrics_mut().record_batch(done.samples, loss, done.elapsed);
                Ok(SlotEvent::Completed {
                    slot: done.slot,
                    seq: done.seq,
                    samples: done.samples,
                    loss,
                    elapsed: done.elapsed,
                })
            }
            Err(error) => {
                slot.metrics_mut().record_fault(done.elapsed);
                slot.mark_degraded();
                debug!(slot = done.slot, seq = done.seq; "batch failed: {error}");
                Ok(SlotEvent::Faulted {
                    slot: done.slot,
                    seq: done.seq,
                    error,
                })
            }
        }
    }
}

/// Exclusive access to every replica of a quiesced pool.
///
/// Holding it borrows the pool mutably, so no batch can be dispatched until it
/// is dropped.
pub struct SoftBarrier<'p, B> {
    slots: &'p mut [WorkerSlot<B>],
}

impl<B: Backend> SoftBarrier<'_, B> {
    /// The ids of the healthy slots, in id order.
    pub fn participants(&self) -> Vec<usize> {
        self.slots
            .iter()
            .filter(|s| !s.is_degraded())
            .map(WorkerSlot::id)
            .collect()
    }

    /// Snapshots the given slot.
    pub fn state(&self, id: usize) -> Option<ModelState> {
        self.slots.get(id).and_then(WorkerSlot::state)
    }

    /// The loss of the last batch the given slot finished.
    pub fn last_loss(&self, id: usize) -> Option<f32> {
        self.slots.get(id).and_then(|s| s.metrics().last_loss)
    }

    /// Overwrites a slot's local state with a consensus.
    pub(crate) fn install(
        &mut self,
        id: usize,
        consensus: &ModelState,
        with_updater: bool,
    ) -> std::result::Result<(), ComputeErr> {
        match self.slots.get_mut(id).and_then(WorkerSlot::replica_mut) {
            Some(replica) => replica.install(consensus, with_updater),
            None => Err(ComputeErr::Backend(format!("slot {id} has no replica"))),
        }
    }
}
