use std::num::NonZeroUsize;

use ndarray::{Array2, Axis};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::{Batch, DataSource};
use crate::error::DataErr;

/// A `DataSource` over feature/label matrices held in memory.
///
/// Rows are cut into `batch_size` chunks in order (the last chunk may be
/// short). A shuffled source draws a fresh row permutation on every reset.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    features: Array2<f32>,
    labels: Array2<f32>,
    batch_size: NonZeroUsize,
    order: Vec<usize>,
    cursor: usize,
    rng: Option<StdRng>,
}

impl InMemorySource {
    /// Creates a new in-order `InMemorySource`.
    ///
    /// # Arguments
    /// * `features` - One sample per row.
    /// * `labels` - One target per row.
    /// * `batch_size` - The number of rows per batch.
    ///
    /// # Returns
    /// The source, or `DataErr::Corrupted` if the row counts differ.
    pub fn new(
        features: Array2<f32>,
        labels: Array2<f32>,
        batch_size: NonZeroUsize,
    ) -> Result<Self, DataErr> {
        if features.nrows() != labels.nrows() {
            return Err(DataErr::Corrupted(format!(
                "{} feature rows but {} label rows",
                features.nrows(),
                labels.nrows()
            )));
        }

        let order = (0..features.nrows()).collect();
        Ok(Self {
            features,
            labels,
            batch_size,
            order,
            cursor: 0,
            rng: None,
        })
    }

    /// Makes the source reshuffle its rows on every reset, starting now.
    ///
    /// # Arguments
    /// * `seed` - Seed of the shuffling rng, for reproducible epochs.
    pub fn shuffled(mut self, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        self.order.shuffle(&mut rng);
        self.rng = Some(rng);
        self
    }

    /// The width of a feature row.
    pub fn input_size(&self) -> usize {
        self.features.ncols()
    }

    /// The width of a label row.
    pub fn output_size(&self) -> usize {
        self.labels.ncols()
    }
}

impl DataSource for InMemorySource {
    fn reset(&mut self) {
        self.cursor = 0;
        if let Some(rng) = self.rng.as_mut() {
            self.order.shuffle(rng);
        }
    }

    fn next_batch(&mut self) -> Result<Option<Batch>, DataErr> {
        if !self.has_next() {
            return Ok(None);
        }

        let end = (self.cursor + self.batch_size.get()).min(self.order.len());
        let rows = &self.order[self.cursor..end];
        self.cursor = end;

        let features = self.features.select(Axis(0), rows);
        let labels = self.labels.select(Axis(0), rows);
        Batch::new(features, labels).map(Some)
    }

    fn has_next(&self) -> bool {
        self.cursor < self.order.len()
    }

    fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    fn num_samples(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array;

    use super::*;

    fn rows(n: usize) -> (Array2<f32>, Array2<f32>) {
        let xs = Array::from_shape_fn((n, 2), |(i, j)| (i * 2 + j) as f32);
        let ys = Array::from_shape_fn((n, 1), |(i, _)| i as f32 + 100.0);
        (xs, ys)
    }

    fn drain(src: &mut InMemorySource) -> Vec<Batch> {
        let mut out = Vec::new();
        while let Some(batch) = src.next_batch().unwrap() {
            out.push(batch);
        }
        out
    }

    #[test]
    fn batches_cover_every_row_and_last_one_is_short() {
        let (xs, ys) = rows(10);
        let mut src = InMemorySource::new(xs, ys, NonZeroUsize::new(4).unwrap()).unwrap();

        assert_eq!(src.batches_per_epoch(), 3);

        let batches = drain(&mut src);
        let sizes: Vec<_> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(batches[2].labels()[[1, 0]], 109.0);
        assert!(!src.has_next());
        assert!(src.next_batch().unwrap().is_none());

        src.reset();
        assert!(src.has_next());
        assert_eq!(drain(&mut src), batches);
    }

    #[test]
    fn shuffled_source_keeps_feature_label_pairs_together() {
        let (xs, ys) = rows(16);
        let mut src = InMemorySource::new(xs, ys, NonZeroUsize::new(5).unwrap())
            .unwrap()
            .shuffled(7);

        let mut seen = Vec::new();
        for batch in drain(&mut src) {
            for (x, y) in batch.features().rows().into_iter().zip(batch.labels().rows()) {
                let i = y[0] as usize - 100;
                assert_eq!(x[0], (i * 2) as f32);
                seen.push(i);
            }
        }

        seen.sort_unstable();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn mismatched_rows_are_corrupted_data() {
        let (xs, _) = rows(4);
        let (_, ys) = rows(3);
        assert!(InMemorySource::new(xs, ys, NonZeroUsize::MIN).is_err());
    }
}
