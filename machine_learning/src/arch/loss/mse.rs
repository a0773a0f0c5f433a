use ndarray::{Array2, ArrayView2};

use super::LossFn;

/// Mean squared error loss function.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mse;

impl Mse {
    /// Returns a new `Mse`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Mse {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        (&y_pred - &y)
            .mapv(|x| x.powi(2))
            .mean()
            .unwrap_or_default()
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        (&y_pred - &y) * (2.0 / y_pred.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn gradient_points_towards_the_target() {
        let y = array![[1., 0.]];
        let p = array![[0.5, 0.5]];

        assert_eq!(Mse.loss_prime(p.view(), y.view()), array![[-0.5, 0.5]]);
        assert_eq!(Mse.loss(p.view(), y.view()), 0.25);
    }
}
