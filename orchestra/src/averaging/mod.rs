mod schedule;
mod transport;

use log::{debug, info};

pub use schedule::AveragingSchedule;
pub use transport::Transport;

use crate::{
    backend::Backend,
    error::{OrchestraErr, Result},
    pool::SoftBarrier,
    state::ModelState,
};

/// What made the orchestrator average.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The averaging frequency was reached.
    Boundary,
    /// The epoch ended with a partial window.
    EpochEnd,
}

/// A finished averaging round.
#[derive(Debug, Clone, PartialEq)]
pub struct AveragingRound {
    /// Zero-based index over the whole run.
    pub index: usize,
    pub epoch: usize,
    pub trigger: Trigger,
    /// The slots that were merged and received the consensus.
    pub participants: Vec<usize>,
    /// The consensus version after the round.
    pub version: u64,
    /// Mean of the participants' last losses, if scores are reported.
    pub score: Option<f32>,
    /// False when every participant already held the consensus.
    pub changed: bool,
}

/// Merges slot states into the consensus and broadcasts it back.
///
/// The coordinator is the only writer of the consensus. It touches replicas
/// only through a `SoftBarrier`, which exists only while the pool is quiesced.
#[derive(Debug)]
pub struct AveragingCoordinator {
    transport: Transport,
    average_updaters: bool,
    report_score: bool,
    consensus: ModelState,
    rounds: usize,
}

impl AveragingCoordinator {
    /// Creates a new `AveragingCoordinator`, making the first healthy slot's
    /// state the version 0 consensus and installing it on every slot.
    ///
    /// # Arguments
    /// * `transport` - How states are reduced.
    /// * `average_updaters` - Whether optimizer state is merged too.
    /// * `report_score` - Whether rounds carry a score snapshot.
    /// * `barrier` - Access to a quiesced pool.
    ///
    /// # Returns
    /// The coordinator, or an error if no slot can provide or take the seed.
    pub fn seed<B: Backend>(
        transport: Transport,
        average_updaters: bool,
        report_score: bool,
        barrier: &mut SoftBarrier<'_, B>,
    ) -> Result<Self> {
        let participants = barrier.participants();
        let seed = participants
            .first()
            .and_then(|&id| barrier.state(id))
            .ok_or(OrchestraErr::NoHealthyWorkers)?;

        let consensus = ModelState::consensus(0, seed.params().to_vec(), seed.updater().to_vec());
        broadcast(barrier, &participants, &consensus, true)?;

        Ok(Self {
            transport,
            average_updaters,
            report_score,
            consensus,
            rounds: 0,
        })
    }

    /// Runs one averaging round over the healthy slots.
    ///
    /// If every participant still holds the current consensus the round
    /// changes nothing and the version stays put.
    ///
    /// # Arguments
    /// * `barrier` - Access to a quiesced pool.
    /// * `epoch` - The epoch the round belongs to.
    /// * `trigger` - Why the round runs.
    ///
    /// # Returns
    /// The round, `NoHealthyWorkers` if nobody can take part, or
    /// `AveragingTransport` if merging or broadcasting failed.
    pub fn average<B: Backend>(
        &mut self,
        barrier: &mut SoftBarrier<'_, B>,
        epoch: usize,
        trigger: Trigger,
    ) -> Result<AveragingRound> {
        let participants = barrier.participants();
        if participants.is_empty() {
            return Err(OrchestraErr::NoHealthyWorkers);
        }

        let states = participants
            .iter()
            .map(|&id| {
                barrier.state(id).ok_or_else(|| {
                    OrchestraErr::AveragingTransport(format!("slot {id} is not at the barrier"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let current = self.consensus.version();
        let changed = !states
            .iter()
            .all(|s| s.is_consensus() && s.version() == current);

        if changed {
            self.consensus = self.merge(&states)?;
            broadcast(
                barrier,
                &participants,
                &self.consensus,
                self.average_updaters,
            )?;
        }

        let score = self
            .report_score
            .then(|| mean_last_loss(barrier, &participants))
            .flatten();
        let round = AveragingRound {
            index: self.rounds,
            epoch,
            trigger,
            participants,
            version: self.consensus.version(),
            score,
            changed,
        };
        self.rounds += 1;

        match round.score {
            Some(score) => info!(
                round = round.index, epoch = epoch, version = round.version, score = score;
                "averaged {} slot states", round.participants.len()
            ),
            None => info!(
                round = round.index, epoch = epoch, version = round.version;
                "averaged {} slot states", round.participants.len()
            ),
        }

        Ok(round)
    }

    /// The authoritative consensus state.
    pub fn consensus(&self) -> &ModelState {
        &self.consensus
    }

    /// The number of rounds run so far.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    fn merge(&self, states: &[ModelState]) -> Result<ModelState> {
        let params: Vec<&[f32]> = states.iter().map(ModelState::params).collect();
        let mut mean = vec![0.0; self.consensus.params().len()];
        self.transport.reduce(&params, &mut mean)?;

        let updater = if self.average_updaters && !states[0].updater().is_empty() {
            let parts: Vec<&[f32]> = states.iter().map(ModelState::updater).collect();
            let mut out = vec![0.0; states[0].updater().len()];
            self.transport.reduce(&parts, &mut out)?;
            out
        } else {
            self.consensus.updater().to_vec()
        };

        debug!(participants = states.len(); "merged slot states over {:?}", self.transport);
        Ok(ModelState::consensus(
            self.consensus.version() + 1,
            mean,
            updater,
        ))
    }
}

fn broadcast<B: Backend>(
    barrier: &mut SoftBarrier<'_, B>,
    participants: &[usize],
    consensus: &ModelState,
    with_updater: bool,
) -> Result<()> {
    for &id in participants {
        barrier.install(id, consensus, with_updater).map_err(|e| {
            OrchestraErr::AveragingTransport(format!("broadcast to slot {id} failed: {e}"))
        })?;
    }
    Ok(())
}

fn mean_last_loss<B: Backend>(barrier: &SoftBarrier<'_, B>, participants: &[usize]) -> Option<f32> {
    let losses: Vec<f32> = participants
        .iter()
        .filter_map(|&id| barrier.last_loss(id))
        .collect();

    (!losses.is_empty()).then(|| losses.iter().sum::<f32>() / losses.len() as f32)
}
