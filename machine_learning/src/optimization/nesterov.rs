use super::{Optimizer, check_len};
use crate::Result;

/// Nesterov momentum in its look-ahead form:
/// `v' = mu v - lr g`, `p += (1 + mu) v' - mu v`.
#[derive(Debug, Clone)]
pub struct Nesterov {
    learning_rate: f32,
    momentum: f32,
    velocity: Box<[f32]>,
}

impl Nesterov {
    /// Creates a new `Nesterov` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The fixed base learning rate.
    /// * `momentum` - The fraction of the previous velocity kept on each step.
    pub fn new(len: usize, learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for Nesterov {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_len("gradient", grad.len(), params.len())?;
        check_len("velocity", self.velocity.len(), params.len())?;

        let lr = self.learning_rate;
        let mu = self.momentum;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.velocity.iter_mut())
            .for_each(|((p, g), v)| {
                let prev = *v;
                *v = mu * prev - lr * g;
                *p += (1. + mu) * *v - mu * prev;
            });

        Ok(())
    }

    fn state(&self) -> Vec<f32> {
        self.velocity.to_vec()
    }

    fn set_state(&mut self, state: &[f32]) -> Result<()> {
        check_len("optimizer state", state.len(), self.velocity.len())?;
        self.velocity.copy_from_slice(state);
        Ok(())
    }
}
