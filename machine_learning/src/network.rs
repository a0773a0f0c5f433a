use ndarray::{Array2, ArrayView2};
use orchestra::{Backend, ComputeErr};

use crate::{
    MlErr, Result,
    arch::{Sequential, loss::LossFn},
    optimization::Optimizer,
};

type ComputeResult<T> = std::result::Result<T, ComputeErr>;

/// A network whose optimizer and loss are picked at runtime.
pub type DynNetwork = Network<Box<dyn Optimizer + Send>, Box<dyn LossFn + Send>>;

/// A `Sequential` model together with its parameters, optimizer and loss:
/// one complete replica.
#[derive(Clone)]
pub struct Network<O, L> {
    model: Sequential,
    params: Vec<f32>,
    optimizer: O,
    loss_fn: L,
}

impl<O: Optimizer, L: LossFn> Network<O, L> {
    /// Creates a new `Network`.
    ///
    /// # Arguments
    /// * `model` - The layers.
    /// * `params` - The model's initial parameters.
    /// * `optimizer` - The local update rule.
    /// * `loss_fn` - The loss to minimize.
    ///
    /// # Returns
    /// The network, or an error if `params` doesn't fit `model`.
    pub fn new(model: Sequential, params: Vec<f32>, optimizer: O, loss_fn: L) -> Result<Self> {
        if params.len() != model.size() {
            return Err(MlErr::SizeMismatch {
                a: "parameters",
                b: "network",
                got: params.len(),
                expected: model.size(),
            });
        }

        Ok(Self {
            model,
            params,
            optimizer,
            loss_fn,
        })
    }

    pub fn model(&self) -> &Sequential {
        &self.model
    }

    /// The predictions of the network for `x`.
    pub fn infer(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let z = self.model.infer(&self.params, x)?;
        Ok(self.loss_fn.output(z.view()))
    }
}

impl<O, L> Backend for Network<O, L>
where
    O: Optimizer + Send + 'static,
    L: LossFn + Send + 'static,
{
    fn num_params(&self) -> usize {
        self.params.len()
    }

    fn forward(&mut self, features: ArrayView2<f32>) -> ComputeResult<Array2<f32>> {
        let z = self.model.forward(&self.params, features)?;
        Ok(self.loss_fn.output(z))
    }

    fn backward(
        &mut self,
        predictions: ArrayView2<f32>,
        labels: ArrayView2<f32>,
        grad: &mut [f32],
    ) -> ComputeResult<f32> {
        if predictions.dim() != labels.dim() {
            return Err(ComputeErr::ShapeMismatch {
                what: "labels",
                got: labels.len(),
                expected: predictions.len(),
            });
        }

        let loss = self.loss_fn.loss(predictions, labels);
        let d_last = self.loss_fn.loss_prime(predictions, labels);
        self.model.backward(&self.params, grad, d_last)?;

        Ok(loss)
    }

    fn apply_update(&mut self, grad: &[f32]) -> ComputeResult<()> {
        Ok(self.optimizer.update_params(grad, &mut self.params)?)
    }

    fn predict(&self, features: ArrayView2<f32>) -> ComputeResult<Array2<f32>> {
        Ok(self.infer(features)?)
    }

    fn params(&self) -> Vec<f32> {
        self.params.clone()
    }

    fn set_params(&mut self, params: &[f32]) -> ComputeResult<()> {
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
        self.optimizer.state()
    }

    fn set_updater_state(&mut self, state: &[f32]) -> ComputeResult<()> {
        Ok(self.optimizer.set_state(state)?)
    }
}
