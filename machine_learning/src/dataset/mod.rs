pub mod mnist;

pub use mnist::Split;
