use ndarray::{Array2, ArrayView2};

use crate::error::DataErr;

/// A labeled mini-batch: one row of features and one row of labels per sample.
///
/// Batches are immutable once built; the sequence number is stamped by the
/// prefetch producer and counts batches from the start of the epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    seq: usize,
    features: Array2<f32>,
    labels: Array2<f32>,
}

impl Batch {
    /// Creates a new `Batch`.
    ///
    /// # Arguments
    /// * `features` - One sample per row.
    /// * `labels` - One target per row.
    ///
    /// # Returns
    /// The batch, or `DataErr::Corrupted` if it is empty or the row counts differ.
    pub fn new(features: Array2<f32>, labels: Array2<f32>) -> Result<Self, DataErr> {
        if features.nrows() != labels.nrows() {
            return Err(DataErr::Corrupted(format!(
                "batch has {} feature rows but {} label rows",
                features.nrows(),
                labels.nrows()
            )));
        }

        if features.nrows() == 0 {
            return Err(DataErr::Corrupted("empty batch".into()));
        }

        Ok(Self {
            seq: 0,
            features,
            labels,
        })
    }

    #[inline]
    pub fn seq(&self) -> usize {
        self.seq
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.features.nrows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }

    #[inline]
    pub fn labels(&self) -> ArrayView2<'_, f32> {
        self.labels.view()
    }

    pub(crate) fn set_seq(&mut self, seq: usize) {
        self.seq = seq;
    }
}
