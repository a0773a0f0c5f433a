#![allow(dead_code)]

use std::{num::NonZeroUsize, sync::Arc, thread, time::Duration};

use ndarray::{Array2, ArrayView2};
use orchestra::{Backend, Batch, ComputeErr, DataErr, DataSource, InMemorySource};
use parking_lot::Mutex;

pub fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

/// Records which rows it trained on and drifts its parameters by a
/// slot-specific step, so replicas diverge between rounds.
#[derive(Debug, Clone)]
pub struct Probe {
    pub id: usize,
    params: Vec<f32>,
    velocity: Vec<f32>,
    step: f32,
    classes: usize,
    trained: usize,
    fail_after: Option<usize>,
    delay: Duration,
    seen: Arc<Mutex<Vec<f32>>>,
}

impl Probe {
    pub fn new(id: usize, num_params: usize, seen: Arc<Mutex<Vec<f32>>>) -> Self {
        Self {
            id,
            params: vec![0.5; num_params],
            velocity: vec![0.0; num_params],
            step: 0.01 * (id + 1) as f32,
            classes: 10,
            trained: 0,
            fail_after: None,
            delay: Duration::ZERO,
            seen,
        }
    }

    /// Produces a non-finite loss once `n` batches were trained.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn slowed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Backend for Probe {
    fn num_params(&self) -> usize {
        self.params.len()
    }

    fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>, ComputeErr> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.seen.lock().extend(x.column(0).iter().copied());
        Ok(Array2::from_elem((x.nrows(), 1), self.params[0]))
    }

    fn backward(
        &mut self,
        pred: ArrayView2<f32>,
        y: ArrayView2<f32>,
        grad: &mut [f32],
    ) -> Result<f32, ComputeErr> {
        if self.fail_after == Some(self.trained) {
            return Ok(f32::NAN);
        }

        for (i, g) in grad.iter_mut().enumerate() {
            *g = self.step * (i + 1) as f32;
        }

        let diff = &pred - &y.column(0).insert_axis(ndarray::Axis(1));
        Ok(diff.mapv(|d| d * d).mean().unwrap_or(0.0))
    }

    fn apply_update(&mut self, grad: &[f32]) -> Result<(), ComputeErr> {
        for ((p, v), g) in self.params.iter_mut().zip(&mut self.velocity).zip(grad) {
            *v = 0.9 * *v + g;
            *p -= *v;
        }
        self.trained += 1;
        Ok(())
    }

    /// Predicts class `row value mod classes`.
    fn predict(&self, x: ArrayView2<f32>) -> Result<Array2<f32>, ComputeErr> {
        let mut out = Array2::zeros((x.nrows(), self.classes));
        for (i, v) in x.column(0).iter().enumerate() {
            out[[i, (*v as usize) % self.classes]] = 1.0;
        }
        Ok(out)
    }

    fn params(&self) -> Vec<f32> {
        self.params.clone()
    }

    fn set_params(&mut self, params: &[f32]) -> Result<(), ComputeErr> {
        if params.len() != self.params.len() {
            return Err(ComputeErr::ShapeMismatch {
                what: "params",
                got: params.len(),
                expected: self.params.len(),
            });
        }
        self.params.copy_from_slice(params);
        Ok(())
    }

    fn updater_state(&self) -> Vec<f32> {
        self.velocity.clone()
    }

    fn set_updater_state(&mut self, state: &[f32]) -> Result<(), ComputeErr> {
        if state.len() != self.velocity.len() {
            return Err(ComputeErr::ShapeMismatch {
                what: "velocity",
                got: state.len(),
                expected: self.velocity.len(),
            });
        }
        self.velocity.copy_from_slice(state);
        Ok(())
    }
}

/// `rows` single-row batches whose feature is the row index.
pub fn indexed_source(rows: usize) -> InMemorySource {
    let xs = Array2::from_shape_fn((rows, 1), |(i, _)| i as f32);
    InMemorySource::new(xs, Array2::zeros((rows, 1)), NonZeroUsize::MIN).unwrap()
}

/// Held-out rows labeled one-hot with `row index mod classes`.
pub fn labeled_source(rows: usize, classes: usize, batch_size: usize) -> InMemorySource {
    let xs = Array2::from_shape_fn((rows, 1), |(i, _)| i as f32);
    let ys = Array2::from_shape_fn((rows, classes), |(i, c)| {
        if i % classes == c { 1.0 } else { 0.0 }
    });
    InMemorySource::new(xs, ys, nz(batch_size)).unwrap()
}

/// Yields `good` batches, then fails.
pub struct BrokenSource {
    good: usize,
    produced: usize,
}

impl BrokenSource {
    pub fn new(good: usize) -> Self {
        Self { good, produced: 0 }
    }
}

impl DataSource for BrokenSource {
    fn reset(&mut self) {
        self.produced = 0;
    }

    fn next_batch(&mut self) -> Result<Option<Batch>, DataErr> {
        if self.produced == self.good {
            return Err(DataErr::Corrupted("truncated record".into()));
        }
        self.produced += 1;
        Batch::new(Array2::zeros((1, 1)), Array2::zeros((1, 1))).map(Some)
    }

    fn has_next(&self) -> bool {
        true
    }

    fn batch_size(&self) -> usize {
        1
    }

    fn num_samples(&self) -> usize {
        self.good + 1
    }
}
