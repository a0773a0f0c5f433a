use serde::{Deserialize, Serialize};

use super::Sigmoid;

/// The element-wise activation applied after a layer's affine map.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActFn {
    Sigmoid(Sigmoid),
    Relu,
    Tanh,
}

impl ActFn {
    pub fn sigmoid(amp: f32) -> Self {
        Self::Sigmoid(Sigmoid::new(amp))
    }

    pub fn f(&self, z: f32) -> f32 {
        match self {
            Self::Sigmoid(a) => a.f(z),
            Self::Relu => z.max(0.),
            Self::Tanh => z.tanh(),
        }
    }

    /// The derivative evaluated at the pre-activation `z`.
    pub fn df(&self, z: f32) -> f32 {
        match self {
            Self::Sigmoid(a) => a.df(z),
            Self::Relu => {
                if z > 0. {
                    1.
                } else {
                    0.
                }
            }
            Self::Tanh => 1. - z.tanh().powi(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ActFn::{self, *};

    fn numeric_df(act: ActFn, z: f32) -> f32 {
        let h = 1e-3;
        (act.f(z + h) - act.f(z - h)) / (2. * h)
    }

    #[test]
    fn derivatives_match_finite_differences() {
        for act in [ActFn::sigmoid(1.), ActFn::sigmoid(2.5), Tanh] {
            for z in [-2.0, -0.3, 0.0, 0.7, 1.9] {
                assert!((act.df(z) - numeric_df(act, z)).abs() < 1e-2, "{act:?} at {z}");
            }
        }
    }

    #[test]
    fn relu_clamps_negatives() {
        assert_eq!(Relu.f(-3.), 0.);
        assert_eq!(Relu.f(2.), 2.);
        assert_eq!(Relu.df(-1.), 0.);
        assert_eq!(Relu.df(1.), 1.);
    }

    #[test]
    fn deserializes_from_tagged_json() {
        let act: ActFn = serde_json::from_str(r#"{"kind":"sigmoid","amp":1.0}"#).unwrap();
        assert_eq!(act, ActFn::sigmoid(1.));

        let act: ActFn = serde_json::from_str(r#"{"kind":"relu"}"#).unwrap();
        assert_eq!(act, Relu);
    }
}
