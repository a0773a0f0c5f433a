use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::{
    DynNetwork, Network, Result,
    arch::{
        Sequential,
        activations::ActFn,
        layers::Dense,
        loss::{LossFn, Mse, SoftmaxCrossEntropy},
    },
    initialization::Initializer,
    optimization::{Adam, GradientDescent, GradientDescentWithMomentum, Nesterov, Optimizer},
};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub input: usize,
    pub output: usize,
    #[serde(default)]
    pub act_fn: Option<ActFn>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerSpec {
    GradientDescent {
        learning_rate: f32,
    },
    GradientDescentWithMomentum {
        learning_rate: f32,
        momentum: f32,
    },
    Nesterov {
        learning_rate: f32,
        momentum: f32,
    },
    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossSpec {
    Mse,
    SoftmaxCrossEntropy,
}

/// Everything needed to build identical replicas of a network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub layers: Vec<LayerSpec>,
    #[serde(default)]
    pub init: Initializer,
    pub optimizer: OptimizerSpec,
    pub loss: LossSpec,
}

impl NetworkSpec {
    /// A digit classifier: 784 pixels through ReLU hidden layers to a 10-way
    /// softmax, trained with Nesterov momentum.
    ///
    /// # Arguments
    /// * `hidden` - The width of each hidden layer.
    pub fn mnist(hidden: &[usize]) -> Self {
        let widths: Vec<usize> = [784].iter().chain(hidden).chain(&[10]).copied().collect();
        let last = widths.len() - 2;

        let layers = widths
            .windows(2)
            .enumerate()
            .map(|(i, w)| LayerSpec {
                input: w[0],
                output: w[1],
                act_fn: (i < last).then_some(ActFn::Relu),
            })
            .collect();

        Self {
            layers,
            init: Initializer::XavierUniform,
            optimizer: OptimizerSpec::Nesterov {
                learning_rate: 0.01,
                momentum: 0.9,
            },
            loss: LossSpec::SoftmaxCrossEntropy,
        }
    }
}

/// Builds `DynNetwork`s given a specification.
#[derive(Clone, Debug, Default)]
pub struct NetworkBuilder {
    seed: Option<u64>,
}

impl NetworkBuilder {
    /// Creates a new `NetworkBuilder`.
    ///
    /// # Arguments
    /// * `seed` - Makes every built network start from the same parameters.
    pub fn new(seed: Option<u64>) -> Self {
        Self { seed }
    }

    /// Builds a network following a spec.
    ///
    /// # Args
    /// * `spec` - The specification of the network.
    ///
    /// # Returns
    /// A new network or an error if encountered.
    pub fn build(&self, spec: &NetworkSpec) -> Result<DynNetwork> {
        let model = self.resolve_model(spec)?;

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let params = model.init_params(&spec.init, &mut rng)?;

        let optimizer = self.resolve_optimizer(spec.optimizer, model.size());
        let loss_fn = self.resolve_loss(spec.loss);
        Network::new(model, params, optimizer, loss_fn)
    }

    fn resolve_model(&self, spec: &NetworkSpec) -> Result<Sequential> {
        let layers = spec
            .layers
            .iter()
            .map(|l| Dense::new((l.input, l.output), l.act_fn));

        Sequential::new(layers)
    }

    fn resolve_optimizer(&self, spec: OptimizerSpec, len: usize) -> Box<dyn Optimizer + Send> {
        match spec {
            OptimizerSpec::GradientDescent { learning_rate } => {
                Box::new(GradientDescent::new(learning_rate))
            }
            OptimizerSpec::GradientDescentWithMomentum {
                learning_rate,
                momentum,
            } => Box::new(GradientDescentWithMomentum::new(len, learning_rate, momentum)),
            OptimizerSpec::Nesterov {
                learning_rate,
                momentum,
            } => Box::new(Nesterov::new(len, learning_rate, momentum)),
            OptimizerSpec::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(len, learning_rate, beta1, beta2, epsilon)),
        }
    }

    fn resolve_loss(&self, spec: LossSpec) -> Box<dyn LossFn + Send> {
        match spec {
            LossSpec::Mse => Box::new(Mse::new()),
            LossSpec::SoftmaxCrossEntropy => Box::new(SoftmaxCrossEntropy::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use orchestra::Backend;

    use super::*;

    #[test]
    fn the_mnist_spec_chains_into_a_softmax() {
        let spec = NetworkSpec::mnist(&[32, 16]);

        assert_eq!(spec.layers.len(), 3);
        assert_eq!(spec.layers[0].input, 784);
        assert_eq!(spec.layers[2].output, 10);
        assert_eq!(spec.layers[1].act_fn, Some(ActFn::Relu));
        assert_eq!(spec.layers[2].act_fn, None);
    }

    #[test]
    fn seeded_builders_make_identical_replicas() {
        let spec = NetworkSpec::mnist(&[8]);
        let builder = NetworkBuilder::new(Some(5));

        let a = builder.build(&spec).unwrap();
        let b = builder.build(&spec).unwrap();
        assert_eq!(a.num_params(), (784 + 1) * 8 + (8 + 1) * 10);
        assert_eq!(a.params(), b.params());
        assert_eq!(a.updater_state().len(), a.num_params());
    }

    #[test]
    fn specs_load_from_json() {
        let json = r#"{
            "layers": [
                { "input": 2, "output": 4, "act_fn": { "kind": "sigmoid", "amp": 1.0 } },
                { "input": 4, "output": 1 }
            ],
            "optimizer": { "kind": "adam", "learning_rate": 0.01, "beta1": 0.9, "beta2": 0.999, "epsilon": 1e-8 },
            "loss": "mse"
        }"#;

        let spec: NetworkSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.init, Initializer::XavierUniform);
        assert_eq!(spec.loss, LossSpec::Mse);

        let net = NetworkBuilder::new(Some(1)).build(&spec).unwrap();
        assert_eq!(net.updater_state().len(), 2 * net.num_params());
    }

    #[test]
    fn broken_chains_fail_to_build() {
        let mut spec = NetworkSpec::mnist(&[8]);
        spec.layers[1].input = 9;

        assert!(NetworkBuilder::default().build(&spec).is_err());
    }
}
