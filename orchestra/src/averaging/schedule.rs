use std::num::NonZeroUsize;

/// Decides when the pool is due for an averaging round.
///
/// Counts batches dispatched to the whole pool since the last round.
#[derive(Debug, Clone)]
pub struct AveragingSchedule {
    frequency: NonZeroUsize,
    since_last: usize,
}

impl AveragingSchedule {
    pub fn new(frequency: NonZeroUsize) -> Self {
        Self {
            frequency,
            since_last: 0,
        }
    }

    /// Counts one dispatched batch.
    ///
    /// # Returns
    /// True if this batch closes an averaging window.
    #[inline]
    pub fn record_batch(&mut self) -> bool {
        self.since_last += 1;
        self.since_last >= self.frequency.get()
    }

    /// Whether batches were dispatched since the last round.
    #[inline]
    pub fn pending(&self) -> bool {
        self.since_last > 0
    }

    #[inline]
    pub fn since_last(&self) -> usize {
        self.since_last
    }

    #[inline]
    pub fn mark_averaged(&mut self) {
        self.since_last = 0;
    }
}
