use super::Batch;
use crate::error::DataErr;

/// A lazy, restartable stream of labeled batches with a fixed batch size.
///
/// `next_batch` returns `Ok(None)` at the end of the epoch; the source stays
/// exhausted until `reset` is called.
pub trait DataSource: Send + 'static {
    /// Rewinds the source to its first batch.
    fn reset(&mut self);

    /// Produces the next batch of the epoch.
    ///
    /// # Returns
    /// `Some(batch)`, `None` at the end of the epoch, or a `DataErr` if the
    /// underlying storage is unreadable or malformed.
    fn next_batch(&mut self) -> Result<Option<Batch>, DataErr>;

    /// Whether another batch remains in the current epoch.
    fn has_next(&self) -> bool;

    /// The number of samples per (full) batch.
    fn batch_size(&self) -> usize;

    /// The number of samples in one epoch.
    fn num_samples(&self) -> usize;

    /// The number of batches in one epoch; the last one may be short.
    fn batches_per_epoch(&self) -> usize {
        self.num_samples().div_ceil(self.batch_size().max(1))
    }
}

impl<S: DataSource + ?Sized> DataSource for Box<S> {
    fn reset(&mut self) {
        (**self).reset()
    }

    fn next_batch(&mut self) -> Result<Option<Batch>, DataErr> {
        (**self).next_batch()
    }

    fn has_next(&self) -> bool {
        (**self).has_next()
    }

    fn batch_size(&self) -> usize {
        (**self).batch_size()
    }

    fn num_samples(&self) -> usize {
        (**self).num_samples()
    }

    fn batches_per_epoch(&self) -> usize {
        (**self).batches_per_epoch()
    }
}
