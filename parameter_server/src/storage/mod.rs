mod error;
mod store;

pub use error::{Result, StoreErr};
pub(crate) use store::check_shape;
pub use store::{ParamSnapshot, ParameterStore};
