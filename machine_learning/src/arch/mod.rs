pub mod loss;
mod model;
mod pixel_linear;
mod softmax;

pub use model::{BuilderError, Model, ParamId, ParamInit, ParamSpec};
pub use pixel_linear::PixelLinear;
pub use softmax::{argmax, softmax, softmax_backward};
