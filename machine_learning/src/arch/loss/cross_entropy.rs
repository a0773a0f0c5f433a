use ndarray::{Array2, ArrayView2, Axis};

use super::LossFn;

const MIN_PROB: f32 = 1e-12;

/// Row-wise softmax followed by the mean categorical cross-entropy.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftmaxCrossEntropy;

impl SoftmaxCrossEntropy {
    /// Returns a new `SoftmaxCrossEntropy`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for SoftmaxCrossEntropy {
    fn output(&self, z: ArrayView2<f32>) -> Array2<f32> {
        let mut out = z.to_owned();

        for mut row in out.axis_iter_mut(Axis(0)) {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row /= sum;
        }

        out
    }

    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let rows = y_pred.nrows().max(1) as f32;
        let total: f32 = y_pred
            .iter()
            .zip(y.iter())
            .map(|(&p, &t)| -t * p.max(MIN_PROB).ln())
            .sum();

        total / rows
    }

    // The softmax Jacobian collapses to `p - y` for one-hot targets.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        (&y_pred - &y) / y_pred.nrows().max(1) as f32
    }
}
