mod error;
mod initializer;

pub use error::DistributionErr;
pub use initializer::{Initializer, initialize};
