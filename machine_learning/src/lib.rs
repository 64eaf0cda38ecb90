pub mod arch;
pub mod error;
pub mod gradient;

pub use error::{MlErr, Result};
pub use gradient::{Gradient, SparseGradient};
