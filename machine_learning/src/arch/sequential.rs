use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::layers::Dense;
use crate::{MlErr, Result, initialization::Initializer};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
///
/// The model owns no parameters. Every call takes the flat parameter slice, laid out
/// layer after layer.
#[derive(Clone, Debug)]
pub struct Sequential {
    layers: Vec<Dense>,
    offsets: Vec<usize>,
    size: usize,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance, or an error if there are no layers or two
    /// consecutive layers don't chain.
    pub fn new<I>(layers: I) -> Result<Self>
    where
        I: IntoIterator<Item = Dense>,
    {
        let layers: Vec<Dense> = layers.into_iter().collect();
        if layers.is_empty() {
            return Err(MlErr::EmptyNetwork);
        }

        for (i, pair) in layers.windows(2).enumerate() {
            let (out, next_in) = (pair[0].dim().1, pair[1].dim().0);
            if out != next_in {
                return Err(MlErr::LayerChain {
                    layer: i,
                    out,
                    next_in,
                });
            }
        }

        let mut offsets = Vec::with_capacity(layers.len());
        let mut size = 0;
        for layer in &layers {
            offsets.push(size);
            size += layer.size();
        }

        Ok(Self {
            layers,
            offsets,
            size,
        })
    }

    /// The total amount of parameters.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The width of the input rows.
    pub fn input_size(&self) -> usize {
        self.layers[0].dim().0
    }

    /// The width of the output rows.
    pub fn output_size(&self) -> usize {
        self.layers[self.layers.len() - 1].dim().1
    }

    /// Draws a fresh parameter vector: weights from `init`, biases at zero.
    ///
    /// # Arguments
    /// * `init` - How to sample each layer's weights.
    /// * `rng` - The random number generator to sample with.
    pub fn init_params<R: Rng>(&self, init: &Initializer, rng: &mut R) -> Result<Vec<f32>> {
        let mut params = vec![0.; self.size];

        for (layer, &offset) in self.layers.iter().zip(&self.offsets) {
            let (fan_in, fan_out) = layer.dim();
            let weights = &mut params[offset..offset + fan_in * fan_out];
            init.fill(rng, fan_in, fan_out, weights)?;
        }

        Ok(params)
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `params` - The parameters of the whole network.
    /// * `x` - The input data.
    ///
    /// # Returns
    /// The prediction for the given input or an error if occurred.
    pub fn forward<'a>(
        &'a mut self,
        params: &[f32],
        mut x: ArrayView2<'a, f32>,
    ) -> Result<ArrayView2<'a, f32>> {
        self.check_params(params.len())?;

        for (layer, &offset) in self.layers.iter_mut().zip(&self.offsets) {
            let size = layer.size();
            x = layer.forward(&params[offset..offset + size], x)?;
        }

        Ok(x)
    }

    /// Backpropagates the deltas of the last forward pass.
    ///
    /// # Arguments
    /// * `params` - The parameters of the whole network.
    /// * `grad` - The gradient of the whole network, overwritten.
    /// * `d_last` - The derivative of the loss with respect to the last layer's output.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d_last: Array2<f32>,
    ) -> Result<()> {
        self.check_params(params.len())?;
        self.check_params(grad.len())?;

        let mut d = d_last.view_mut();
        for (layer, &offset) in self.layers.iter_mut().zip(&self.offsets).rev() {
            let range = offset..offset + layer.size();
            d = layer.backward(&params[range.clone()], &mut grad[range], d)?;
        }

        Ok(())
    }

    /// A forward pass that touches no layer cache.
    pub fn infer(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_params(params.len())?;

        let mut out = x.to_owned();
        for (layer, &offset) in self.layers.iter().zip(&self.offsets) {
            out = layer.infer(&params[offset..offset + layer.size()], out.view())?;
        }

        Ok(out)
    }

    fn check_params(&self, len: usize) -> Result<()> {
        if len == self.size {
            return Ok(());
        }

        Err(MlErr::SizeMismatch {
            a: "parameters",
            b: "network",
            got: len,
            expected: self.size,
        })
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::arch::activations::ActFn;

    fn net() -> Sequential {
        Sequential::new([
            Dense::new((2, 3), Some(ActFn::Tanh)),
            Dense::new((3, 1), None),
        ])
        .unwrap()
    }

    #[test]
    fn layers_must_chain() {
        let err = Sequential::new([Dense::new((2, 3), None), Dense::new((4, 1), None)]);
        assert_eq!(
            err.unwrap_err(),
            MlErr::LayerChain {
                layer: 0,
                out: 3,
                next_in: 4
            }
        );
        assert_eq!(
            Sequential::new(Vec::<Dense>::new()).unwrap_err(),
            MlErr::EmptyNetwork
        );
    }

    #[test]
    fn size_sums_every_layer() {
        let net = net();
        assert_eq!(net.size(), 3 * 3 + 4);
        assert_eq!(net.input_size(), 2);
        assert_eq!(net.output_size(), 1);
    }

    #[test]
    fn forward_and_infer_agree() {
        let mut net = net();
        let params: Vec<f32> = (0..net.size()).map(|i| (i as f32 - 6.) / 10.).collect();
        let x = array![[0.3, -0.7], [1.0, 0.5]];

        let inferred = net.infer(&params, x.view()).unwrap();
        let trained = net.forward(&params, x.view()).unwrap().to_owned();
        assert_eq!(inferred, trained);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut net = net();
        let params: Vec<f32> = (0..net.size()).map(|i| ((i * 7 % 5) as f32 - 2.) / 8.).collect();
        let x = array![[0.3, -0.7], [1.0, 0.5]];

        // loss = sum of outputs, so d_last is all ones
        let out = net.forward(&params, x.view()).unwrap().to_owned();
        let mut grad = vec![0.; net.size()];
        net.backward(&params, &mut grad, Array2::ones(out.dim())).unwrap();

        let h = 1e-3;
        for i in 0..params.len() {
            let mut plus = params.clone();
            let mut minus = params.clone();
            plus[i] += h;
            minus[i] -= h;

            let numeric = (net.infer(&plus, x.view()).unwrap().sum()
                - net.infer(&minus, x.view()).unwrap().sum())
                / (2. * h);
            assert!((numeric - grad[i]).abs() < 1e-2, "param {i}: {numeric} vs {}", grad[i]);
        }
    }
}
