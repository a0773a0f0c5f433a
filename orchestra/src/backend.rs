use ndarray::{Array2, ArrayView2};

use crate::error::ComputeErr;

/// The model seen by the orchestrator: an opaque bag of `f32` parameters plus
/// the optimizer state that updates them.
///
/// One backend instance is one replica. It is moved onto the blocking pool for
/// every batch, so it must be `Send + 'static`, but it is never shared.
pub trait Backend: Send + 'static {
    /// The length of the flat parameter vector.
    fn num_params(&self) -> usize;

    /// Runs a training forward pass, keeping whatever `backward` needs.
    ///
    /// # Arguments
    /// * `features` - One sample per row.
    ///
    /// # Returns
    /// One prediction row per sample.
    fn forward(&mut self, features: ArrayView2<f32>) -> Result<Array2<f32>, ComputeErr>;

    /// Backpropagates the loss of the last `forward` call.
    ///
    /// # Arguments
    /// * `predictions` - The output of the last `forward` call.
    /// * `labels` - The targets, one row per sample.
    /// * `grad` - A zeroed buffer of `num_params` gradients to fill.
    ///
    /// # Returns
    /// The loss of the batch.
    fn backward(
        &mut self,
        predictions: ArrayView2<f32>,
        labels: ArrayView2<f32>,
        grad: &mut [f32],
    ) -> Result<f32, ComputeErr>;

    /// Applies one local optimizer step with the given gradients.
    fn apply_update(&mut self, grad: &[f32]) -> Result<(), ComputeErr>;

    /// Side-effect-free forward pass used for evaluation.
    fn predict(&self, features: ArrayView2<f32>) -> Result<Array2<f32>, ComputeErr>;

    /// The current parameters, flattened.
    fn params(&self) -> Vec<f32>;

    /// Overwrites every parameter.
    fn set_params(&mut self, params: &[f32]) -> Result<(), ComputeErr>;

    /// The optimizer state (velocities, moments), flattened. Empty for
    /// stateless optimizers.
    fn updater_state(&self) -> Vec<f32> {
        Vec::new()
    }

    /// Overwrites the optimizer state.
    fn set_updater_state(&mut self, state: &[f32]) -> Result<(), ComputeErr> {
        if state.is_empty() {
            Ok(())
        } else {
            Err(ComputeErr::ShapeMismatch {
                what: "updater state",
                got: state.len(),
                expected: 0,
            })
        }
    }
}
