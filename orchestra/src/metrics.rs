use std::time::Duration;

use crate::state::ModelState;

/// Counters a worker slot keeps about its own work.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SlotMetrics {
    pub compute_time: Duration,
    pub batches: u64,
    pub samples: u64,
    pub faults: u64,
    pub last_loss: Option<f32>,
}

impl SlotMetrics {
    /// Records a successfully processed batch.
    #[inline]
    pub fn record_batch(&mut self, samples: usize, loss: f32, elapsed: Duration) {
        self.batches += 1;
        self.samples += samples as u64;
        self.compute_time += elapsed;
        self.last_loss = Some(loss);
    }

    #[inline]
    pub fn record_fault(&mut self, elapsed: Duration) {
        self.faults += 1;
        self.compute_time += elapsed;
    }

    /// The mean compute time per processed batch.
    pub fn mean_batch_time(&self) -> Option<Duration> {
        u32::try_from(self.batches)
            .ok()
            .filter(|&n| n > 0)
            .map(|n| self.compute_time / n)
    }
}

/// What happened during one epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    /// Batches that completed successfully.
    pub batches: usize,
    pub samples: usize,
    /// Batches lost to slot faults.
    pub faulted: usize,
    pub averaging_rounds: usize,
    /// Mean loss over the completed batches.
    pub mean_loss: Option<f32>,
    pub elapsed: Duration,
}

impl EpochStats {
    pub(crate) fn new(epoch: usize) -> Self {
        Self {
            epoch,
            batches: 0,
            samples: 0,
            faulted: 0,
            averaging_rounds: 0,
            mean_loss: None,
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn record_batch(&mut self, samples: usize, loss: f32) {
        let prev = self.mean_loss.unwrap_or(0.0) * self.batches as f32;
        self.batches += 1;
        self.samples += samples;
        self.mean_loss = Some((prev + loss) / self.batches as f32);
    }
}

/// The outcome of a whole training run.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    /// One entry per epoch that started.
    pub epochs: Vec<EpochStats>,
    /// Batches dispatched over the whole run.
    pub batches: usize,
    pub averaging_rounds: usize,
    /// Slots degraded over the whole run, in the order they failed.
    pub degraded: Vec<usize>,
    pub elapsed: Duration,
    /// True if the run stopped early on cancellation.
    pub cancelled: bool,
    pub consensus: ModelState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faults_add_time_but_not_batches() {
        let mut m = SlotMetrics::default();
        assert_eq!(m.mean_batch_time(), None);

        m.record_batch(32, 0.5, Duration::from_millis(10));
        m.record_batch(16, 0.25, Duration::from_millis(30));
        m.record_fault(Duration::from_millis(5));

        assert_eq!(m.batches, 2);
        assert_eq!(m.samples, 48);
        assert_eq!(m.faults, 1);
        assert_eq!(m.last_loss, Some(0.25));
        assert_eq!(m.mean_batch_time(), Some(Duration::from_micros(22_500)));
    }

    #[test]
    fn epoch_mean_loss_is_a_running_mean() {
        let mut e = EpochStats::new(0);
        assert_eq!(e.mean_loss, None);

        e.record_batch(4, 1.0);
        e.record_batch(4, 2.0);
        e.record_batch(2, 3.0);

        assert_eq!(e.batches, 3);
        assert_eq!(e.samples, 10);
        assert!((e.mean_loss.unwrap() - 2.0).abs() < 1e-6);
    }
}
