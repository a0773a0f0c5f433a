use ndarray::{linalg, prelude::*};

use crate::{MlErr, Result, arch::activations::ActFn};

/// A fully connected layer: `a = act_fn(x w + b)`.
///
/// Its parameters are a slice of `(in + 1) * out` values, the `in x out`
/// weights row-major followed by the `out` biases.
#[derive(Clone, Debug)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    x: Array2<f32>,
    z: Array2<f32>,
    a: Array2<f32>,

    // Backward metadata
    d: Array2<f32>,
}

/// Reallocates `m` only when its shape differs from `shape`.
fn fit(m: &mut Array2<f32>, shape: (usize, usize)) {
    if m.dim() != shape {
        *m = Array2::zeros(shape);
    }
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The `(inputs, outputs)` of the layer.
    /// * `act_fn` - The activation, or `None` for a purely affine layer.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        let empty = Array2::zeros((0, 0));

        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
            x: empty.clone(),
            z: empty.clone(),
            a: empty.clone(),
            d: empty,
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The `(inputs, outputs)` of this layer.
    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Makes a training forward pass, caching what `backward` needs.
    ///
    /// # Arguments
    /// * `params` - This layer's slice of parameters.
    /// * `x` - The input, one sample per row.
    ///
    /// # Returns
    /// A view of the layer's output.
    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<ArrayView2<'_, f32>> {
        self.check_input(x.ncols())?;
        let (w, b) = self.view_params(params)?;
        let shape = (x.nrows(), self.dim.1);

        fit(&mut self.z, shape);
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut self.z);
        self.z += &b;

        self.x = x.to_owned();

        let Some(act_fn) = self.act_fn else {
            return Ok(self.z.view());
        };

        fit(&mut self.a, shape);
        self.a.zip_mut_with(&self.z, |a, &z| *a = act_fn.f(z));
        Ok(self.a.view())
    }

    /// Backpropagates the deltas of this layer's output.
    ///
    /// # Arguments
    /// * `params` - This layer's slice of parameters.
    /// * `grad` - This layer's slice of the gradient, overwritten.
    /// * `d` - The derivative of the loss with respect to this layer's output.
    ///
    /// # Returns
    /// The derivative of the loss with respect to this layer's input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: ArrayViewMut2<f32>,
    ) -> Result<ArrayViewMut2<'_, f32>> {
        if d.dim() != self.z.dim() {
            return Err(MlErr::SizeMismatch {
                a: "deltas",
                b: "outputs",
                got: d.len(),
                expected: self.z.len(),
            });
        }

        if let Some(act_fn) = self.act_fn {
            d.zip_mut_with(&self.z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &self.x.t(), &d, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        fit(&mut self.d, (d.nrows(), self.dim.0));
        linalg::general_mat_mul(1.0, &d, &w.t(), 0.0, &mut self.d);

        Ok(self.d.view_mut())
    }

    /// A forward pass that leaves the caches untouched.
    pub fn infer(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_input(x.ncols())?;
        let (w, b) = self.view_params(params)?;

        let mut out = x.dot(&w) + &b;
        if let Some(act_fn) = self.act_fn {
            out.mapv_inplace(|z| act_fn.f(z));
        }

        Ok(out)
    }

    fn check_input(&self, cols: usize) -> Result<()> {
        if cols == self.dim.0 {
            return Ok(());
        }

        Err(MlErr::SizeMismatch {
            a: "features",
            b: "layer inputs",
            got: cols,
            expected: self.dim.0,
        })
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    ///
    /// # Arguments
    /// * `grad` - A gradient slice.
    ///
    /// # Returns
    /// A tuple containing the delta weights and delta biases.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let len = grad.len();
        let size_err = || MlErr::SizeMismatch {
            a: "gradient",
            b: "layer",
            got: len,
            expected: self.size,
        };

        if len != self.size {
            return Err(size_err());
        }

        let (dw_raw, db_raw) = grad.split_at_mut(self.size - self.dim.1);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw).map_err(|_| size_err())?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw).map_err(|_| size_err())?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    ///
    /// # Arguments
    /// * `params` - A slice of parameters.
    ///
    /// # Returns
    /// A tuple containing the weights and biases.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let size_err = || MlErr::SizeMismatch {
            a: "parameters",
            b: "layer",
            got: params.len(),
            expected: self.size,
        };

        if params.len() != self.size {
            return Err(size_err());
        }

        let (w_raw, b_raw) = params.split_at(self.size - self.dim.1);
        let weights = ArrayView2::from_shape(self.dim, w_raw).map_err(|_| size_err())?;
        let biases = ArrayView1::from_shape(self.dim.1, b_raw).map_err(|_| size_err())?;
        Ok((weights, biases))
    }
}
