use ndarray::{IxDyn, linalg, prelude::*};

use super::{BuilderError, Model, ParamInit, ParamSpec};
use crate::{Gradient, MlErr};

/// A per-location dense layer (a 1x1 convolution): every spatial location of
/// the input is mapped from `channels` features to `nclasses` scores with the
/// same weights.
///
/// It is the smallest model the training driver can fit end to end.
#[derive(Debug, Clone)]
pub struct PixelLinear {
    channels: usize,
    nclasses: usize,
}

/// What `PixelLinear::forward` keeps for the backward pass.
pub struct PixelLinearCache {
    x: Array2<f32>,
    out_shape: Vec<usize>,
}

impl PixelLinear {
    /// Creates a new `PixelLinear`.
    ///
    /// # Arguments
    /// * `channels` - The size of the last axis of the inputs.
    /// * `nclasses` - The amount of scores produced per location.
    pub fn new(channels: usize, nclasses: usize) -> Self {
        Self { channels, nclasses }
    }

    /// Flattens every axis but the last one, validating the amount of channels.
    fn flatten(&self, x: ArrayViewD<f32>) -> Result<Array2<f32>, MlErr> {
        let channels = x.shape().last().copied().unwrap_or_default();
        if channels != self.channels {
            return Err(MlErr::SizeMismatch {
                what: "input channels",
                got: channels,
                expected: self.channels,
            });
        }

        let locations = x.len() / self.channels.max(1);
        x.as_standard_layout()
            .into_owned()
            .into_shape_with_order((locations, self.channels))
            .map_err(|_| MlErr::InvalidInput("input can't be flattened into locations"))
    }

    /// Gives a view of the raw parameter list as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [ArrayD<f32>],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>), MlErr> {
        let [w, b] = params else {
            return Err(MlErr::SizeMismatch {
                what: "parameters",
                got: params.len(),
                expected: 2,
            });
        };

        let w = w
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| MlErr::InvalidInput("weights must be a matrix"))?;
        let b = b
            .view()
            .into_dimensionality::<Ix1>()
            .map_err(|_| MlErr::InvalidInput("biases must be a vector"))?;

        Ok((w, b))
    }
}

impl Model for PixelLinear {
    type Cache = PixelLinearCache;

    fn params(&self) -> Vec<ParamSpec> {
        let init = ParamInit::XavierUniform {
            fan_in: self.channels,
            fan_out: self.nclasses,
        };

        vec![
            ParamSpec::new("pixel_linear/weights", vec![self.channels, self.nclasses], init),
            ParamSpec::new(
                "pixel_linear/biases",
                vec![self.nclasses],
                ParamInit::Const { value: 0. },
            )
            .unregularized(),
        ]
    }

    fn forward(
        &self,
        params: &[ArrayD<f32>],
        x: ArrayViewD<'_, f32>,
        _is_training: bool,
    ) -> Result<(ArrayD<f32>, Self::Cache), BuilderError> {
        let (w, b) = self.view_params(params)?;

        let mut out_shape = x.shape().to_vec();
        if let Some(last) = out_shape.last_mut() {
            *last = self.nclasses;
        }

        let x = self.flatten(x)?;

        let mut z = Array2::zeros((x.nrows(), self.nclasses));
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        z += &b;

        let out = z
            .into_shape_with_order(IxDyn(&out_shape))
            .map_err(|_| MlErr::InvalidInput("output can't be reshaped"))?;

        Ok((out, PixelLinearCache { x, out_shape }))
    }

    fn backward(
        &self,
        params: &[ArrayD<f32>],
        cache: Self::Cache,
        d_out: ArrayViewD<'_, f32>,
    ) -> Result<Vec<Option<Gradient>>, BuilderError> {
        self.view_params(params)?;

        if d_out.shape() != cache.out_shape.as_slice() {
            return Err(MlErr::ShapeMismatch {
                what: "output derivative",
                got: d_out.shape().to_vec(),
                expected: cache.out_shape,
            }
            .into());
        }

        let d = d_out
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((cache.x.nrows(), self.nclasses))
            .map_err(|_| MlErr::InvalidInput("output derivative can't be flattened"))?;

        let mut dw = Array2::zeros((self.channels, self.nclasses));
        linalg::general_mat_mul(1.0, &cache.x.t(), &d, 0.0, &mut dw);
        let db = d.sum_axis(Axis(0));

        Ok(vec![
            Some(Gradient::Dense(dw.into_dyn())),
            Some(Gradient::Dense(db.into_dyn())),
        ])
    }
}
