use std::{
    error::Error,
    fmt::{self, Display},
};

use orchestra::ComputeErr;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum MlErr {
    SizeMismatch {
        a: &'static str,
        b: &'static str,
        got: usize,
        expected: usize,
    },
    EmptyNetwork,
    LayerChain {
        layer: usize,
        out: usize,
        next_in: usize,
    },
    InvalidDistribution(String),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                a,
                b,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch between {a} and {b}, got {got} and expected {expected}"
            ),
            MlErr::EmptyNetwork => write!(f, "A network needs at least one layer"),
            MlErr::LayerChain {
                layer,
                out,
                next_in,
            } => write!(
                f,
                "Layer {layer} outputs {out} values but the next layer takes {next_in}"
            ),
            MlErr::InvalidDistribution(detail) => {
                write!(f, "Invalid initialization distribution: {detail}")
            }
        }
    }
}

impl Error for MlErr {}

impl From<rand::distr::uniform::Error> for MlErr {
    fn from(value: rand::distr::uniform::Error) -> Self {
        Self::InvalidDistribution(value.to_string())
    }
}

impl From<rand_distr::NormalError> for MlErr {
    fn from(value: rand_distr::NormalError) -> Self {
        Self::InvalidDistribution(value.to_string())
    }
}

/// Backend failures surface to the orchestrator as compute faults.
impl From<MlErr> for ComputeErr {
    fn from(value: MlErr) -> Self {
        match value {
            MlErr::SizeMismatch { a, got, expected, .. } => ComputeErr::ShapeMismatch {
                what: a,
                got,
                expected,
            },
            other => ComputeErr::Backend(other.to_string()),
        }
    }
}
