use crate::Result;

/// Defines the strategy for updating model parameters based on calculated gradients.
pub trait Optimizer {
    /// Updates the provided slice of parameters using the gradient.
    ///
    /// # Arguments
    /// * `grad` - A reference to the model's gradient.
    /// * `params` - The parameters to update.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad` and `params`.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;

    /// The optimizer's accumulated state, flattened. Empty when stateless.
    fn state(&self) -> Vec<f32> {
        Vec::new()
    }

    /// Overwrites the accumulated state with one previously returned by `state`.
    fn set_state(&mut self, state: &[f32]) -> Result<()> {
        super::check_len("optimizer state", state.len(), 0)
    }
}

impl<O: Optimizer + ?Sized> Optimizer for Box<O> {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        (**self).update_params(grad, params)
    }

    fn state(&self) -> Vec<f32> {
        (**self).state()
    }

    fn set_state(&mut self, state: &[f32]) -> Result<()> {
        (**self).set_state(state)
    }
}
