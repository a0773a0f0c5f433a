use ndarray::{Array2, ArrayView2};

/// A loss over the network's last layer.
///
/// `output` maps the last layer's values to predictions; `loss` and
/// `loss_prime` take those predictions, and `loss_prime` differentiates with
/// respect to the last layer's values (before `output`).
pub trait LossFn {
    fn output(&self, z: ArrayView2<f32>) -> Array2<f32> {
        z.to_owned()
    }

    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32;

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32>;
}

impl<L: LossFn + ?Sized> LossFn for Box<L> {
    fn output(&self, z: ArrayView2<f32>) -> Array2<f32> {
        (**self).output(z)
    }

    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        (**self).loss(y_pred, y)
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        (**self).loss_prime(y_pred, y)
    }
}
