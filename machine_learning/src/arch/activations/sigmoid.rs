use serde::{Deserialize, Serialize};

/// The logistic function scaled by `amp`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sigmoid {
    amp: f32,
}

impl Default for Sigmoid {
    fn default() -> Self {
        Self { amp: 1.0 }
    }
}

impl Sigmoid {
    pub fn new(amp: f32) -> Self {
        Self { amp }
    }

    pub fn f(&self, z: f32) -> f32 {
        self.amp / (1. + (-z).exp())
    }

    pub fn df(&self, z: f32) -> f32 {
        let s = 1. / (1. + (-z).exp());
        self.amp * s * (1. - s)
    }
}
