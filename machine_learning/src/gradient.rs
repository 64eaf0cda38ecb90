use std::collections::BTreeMap;

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, concatenate};

use crate::{MlErr, Result};

/// The gradient of the loss with respect to a single trainable parameter.
///
/// Most parameters produce a `Dense` gradient with the same shape as the
/// parameter. Lookup-style parameters (embeddings, class tables) only touch a
/// few rows along their first axis and produce a `Sparse` one instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Gradient {
    Dense(ArrayD<f32>),
    Sparse(SparseGradient),
}

impl Gradient {
    /// Returns the shape of the parameter this gradient belongs to.
    pub fn shape(&self) -> &[usize] {
        match self {
            Gradient::Dense(grad) => grad.shape(),
            Gradient::Sparse(grad) => grad.dense_shape(),
        }
    }

    /// Returns the stored values, that is, the entire array for dense gradients
    /// and only the touched rows for sparse ones.
    pub fn values(&self) -> &ArrayD<f32> {
        match self {
            Gradient::Dense(grad) => grad,
            Gradient::Sparse(grad) => grad.values(),
        }
    }

    /// Materializes this gradient as a dense array.
    pub fn to_dense(&self) -> ArrayD<f32> {
        match self {
            Gradient::Dense(grad) => grad.clone(),
            Gradient::Sparse(grad) => grad.to_dense(),
        }
    }

    /// Multiplies every stored value by `factor`.
    pub fn scaled(self, factor: f32) -> Self {
        match self {
            Gradient::Dense(grad) => Gradient::Dense(grad * factor),
            Gradient::Sparse(mut grad) => {
                grad.values.mapv_inplace(|v| v * factor);
                Gradient::Sparse(grad)
            }
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Gradient::Sparse(_))
    }
}

/// A row-indexed gradient: `values[i]` is the gradient of row `indices[i]` of
/// a parameter with shape `dense_shape`.
///
/// Indices may repeat, repeated rows add up when materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseGradient {
    indices: Vec<usize>,
    values: ArrayD<f32>,
    dense_shape: Vec<usize>,
}

impl SparseGradient {
    /// Creates a new `SparseGradient`.
    ///
    /// # Arguments
    /// * `indices` - The rows of the parameter this gradient touches.
    /// * `values` - One gradient row per index, stacked along the first axis.
    /// * `dense_shape` - The shape of the parameter.
    ///
    /// # Returns
    /// A new `SparseGradient` or an error if the pieces don't fit together.
    pub fn new(indices: Vec<usize>, values: ArrayD<f32>, dense_shape: Vec<usize>) -> Result<Self> {
        let Some((&nrows, row_shape)) = dense_shape.split_first() else {
            return Err(MlErr::InvalidInput(
                "sparse gradients need a parameter with at least one axis",
            ));
        };

        let mut expected = vec![indices.len()];
        expected.extend_from_slice(row_shape);

        if values.shape() != expected.as_slice() {
            return Err(MlErr::ShapeMismatch {
                what: "sparse gradient values",
                got: values.shape().to_vec(),
                expected,
            });
        }

        if let Some(&index) = indices.iter().find(|&&i| i >= nrows) {
            return Err(MlErr::IndexOutOfBounds {
                what: "sparse gradient",
                index,
                len: nrows,
            });
        }

        Ok(Self {
            indices,
            values,
            dense_shape,
        })
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn values(&self) -> &ArrayD<f32> {
        &self.values
    }

    pub fn dense_shape(&self) -> &[usize] {
        &self.dense_shape
    }

    /// Materializes the gradient, adding up repeated rows.
    pub fn to_dense(&self) -> ArrayD<f32> {
        let mut dense = ArrayD::zeros(IxDyn(&self.dense_shape));

        for (&index, row) in self.indices.iter().zip(self.values.outer_iter()) {
            let mut dst = dense.index_axis_mut(Axis(0), index);
            dst += &row;
        }

        dense
    }

    /// Concatenates the indices and values of several sparse gradients of the
    /// same parameter, without materializing any of them.
    ///
    /// # Arguments
    /// * `parts` - The gradients to join, must share their dense shape.
    ///
    /// # Returns
    /// The joined gradient or an error if the shapes disagree.
    pub fn concat(parts: &[&SparseGradient]) -> Result<Self> {
        let Some(first) = parts.first() else {
            return Err(MlErr::InvalidInput("can't concatenate zero sparse gradients"));
        };

        let dense_shape = first.dense_shape.clone();

        if let Some(other) = parts.iter().find(|p| p.dense_shape != dense_shape) {
            return Err(MlErr::ShapeMismatch {
                what: "sparse gradient parts",
                got: other.dense_shape.clone(),
                expected: dense_shape,
            });
        }

        let indices = parts
            .iter()
            .flat_map(|p| p.indices.iter().copied())
            .collect();

        let views: Vec<ArrayViewD<f32>> = parts.iter().map(|p| p.values.view()).collect();
        let values = concatenate(Axis(0), &views).map_err(|_| MlErr::ShapeMismatch {
            what: "sparse gradient rows",
            got: first.values.shape().to_vec(),
            expected: dense_shape.clone(),
        })?;

        Ok(Self {
            indices,
            values,
            dense_shape,
        })
    }

    /// Returns an equivalent gradient with sorted, unique indices.
    ///
    /// Stateful optimizers need this so each row is updated exactly once.
    pub fn coalesce(&self) -> Self {
        let mut rows: BTreeMap<usize, ArrayD<f32>> = BTreeMap::new();

        for (&index, row) in self.indices.iter().zip(self.values.outer_iter()) {
            rows.entry(index)
                .and_modify(|acc| *acc += &row)
                .or_insert_with(|| row.to_owned());
        }

        let indices: Vec<usize> = rows.keys().copied().collect();
        let mut shape = vec![indices.len()];
        shape.extend_from_slice(&self.dense_shape[1..]);

        let mut values = ArrayD::zeros(IxDyn(&shape));
        for (mut dst, row) in values.outer_iter_mut().zip(rows.values()) {
            dst.assign(row);
        }

        Self {
            indices,
            values,
            dense_shape: self.dense_shape.clone(),
        }
    }
}
