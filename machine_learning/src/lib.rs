//! A small dense feed-forward backend for `orchestra`, plus the datasets the
//! node trains on.

pub mod arch;
pub mod builder;
pub mod dataset;
pub mod error;
pub mod initialization;
pub mod network;
pub mod optimization;

pub use builder::{LayerSpec, LossSpec, NetworkBuilder, NetworkSpec, OptimizerSpec};
pub use error::{MlErr, Result};
pub use network::{DynNetwork, Network};
