use machine_learning::arch::{ParamId, ParamSpec};
use ndarray::ArrayD;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Result, StoreErr};
use crate::initialization;

/// The current value of every trainable parameter of a model, in declaration order.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    specs: Vec<ParamSpec>,
    values: Vec<ArrayD<f32>>,
}

/// A serializable copy of the values held by a `ParameterStore`, keyed by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSnapshot {
    pub params: Vec<(String, ArrayD<f32>)>,
}

impl ParameterStore {
    /// Creates a new `ParameterStore`, initializing every parameter.
    ///
    /// # Arguments
    /// * `specs` - The parameters declared by the model.
    /// * `rng` - The random number generator used by random initializers.
    ///
    /// # Returns
    /// A new store or an error if some initializer is invalid.
    pub fn new<R: Rng>(specs: Vec<ParamSpec>, rng: &mut R) -> Result<Self> {
        let values = specs
            .iter()
            .map(|spec| initialization::initialize(spec, rng))
            .collect::<Result<_>>()?;

        Ok(Self { specs, values })
    }

    /// Creates a new `ParameterStore` from already known values.
    ///
    /// # Returns
    /// An error if the amount or the shapes of `values` disagree with `specs`.
    pub fn from_values(specs: Vec<ParamSpec>, values: Vec<ArrayD<f32>>) -> Result<Self> {
        if specs.len() != values.len() {
            return Err(StoreErr::SizeMismatch {
                what: "parameter values",
                got: values.len(),
                expected: specs.len(),
            });
        }

        for (spec, value) in specs.iter().zip(&values) {
            check_shape(spec, value.shape())?;
        }

        Ok(Self { specs, values })
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    pub fn values(&self) -> &[ArrayD<f32>] {
        &self.values
    }

    /// Mutable access for the optimizer, the only writer of parameter state.
    pub(crate) fn parts_mut(&mut self) -> (&[ParamSpec], &mut [ArrayD<f32>]) {
        (&self.specs, &mut self.values)
    }

    pub fn get(&self, id: ParamId) -> Option<&ArrayD<f32>> {
        self.values.get(id.0)
    }

    /// Returns the amount of parameters (not scalars) in the store.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Returns the total amount of scalars in the store.
    pub fn num_scalars(&self) -> usize {
        self.values.iter().map(ArrayD::len).sum()
    }

    /// Copies every parameter value into a `ParamSnapshot`.
    pub fn snapshot(&self) -> ParamSnapshot {
        let params = self
            .specs
            .iter()
            .zip(&self.values)
            .map(|(spec, value)| (spec.name.clone(), value.clone()))
            .collect();

        ParamSnapshot { params }
    }

    /// Replaces every parameter value with the ones in `snapshot`.
    ///
    /// Nothing is modified unless the whole snapshot is valid.
    ///
    /// # Arguments
    /// * `snapshot` - A snapshot taken from a store with the same parameters.
    ///
    /// # Returns
    /// An error if a parameter is missing or has another shape.
    pub fn restore(&mut self, mut snapshot: ParamSnapshot) -> Result<()> {
        let mut values = Vec::with_capacity(self.specs.len());

        for spec in &self.specs {
            let pos = snapshot
                .params
                .iter()
                .position(|(name, _)| *name == spec.name)
                .ok_or_else(|| StoreErr::MissingParam(spec.name.clone()))?;

            let (_, value) = snapshot.params.swap_remove(pos);
            check_shape(spec, value.shape())?;
            values.push(value);
        }

        self.values = values;
        Ok(())
    }
}

pub(crate) fn check_shape(spec: &ParamSpec, shape: &[usize]) -> Result<()> {
    if spec.shape != shape {
        return Err(StoreErr::ShapeMismatch {
            param: spec.name.clone(),
            got: shape.to_vec(),
            expected: spec.shape.clone(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use machine_learning::arch::ParamInit;
    use ndarray::{IxDyn, array};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn specs() -> Vec<ParamSpec> {
        vec![
            ParamSpec::new("w", vec![2, 2], ParamInit::Uniform { low: -1., high: 1. }),
            ParamSpec::new("b", vec![2], ParamInit::Const { value: 0. }).unregularized(),
        ]
    }

    #[test]
    fn new_follows_the_specs() {
        let store = ParameterStore::new(specs(), &mut StdRng::seed_from_u64(3)).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.num_scalars(), 6);
        assert_eq!(store.get(ParamId(1)), Some(&ArrayD::zeros(IxDyn(&[2]))));
    }

    #[test]
    fn snapshot_then_restore() {
        let mut rng = StdRng::seed_from_u64(3);
        let store = ParameterStore::new(specs(), &mut rng).unwrap();
        let mut other = ParameterStore::new(specs(), &mut rng).unwrap();
        assert_ne!(store.values(), other.values());

        let json = serde_json::to_string(&store.snapshot()).unwrap();
        other.restore(serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(store.values(), other.values());
    }

    #[test]
    fn restore_rejects_other_shapes_untouched() {
        let mut store = ParameterStore::new(specs(), &mut StdRng::seed_from_u64(3)).unwrap();
        let before = store.values().to_vec();

        let snapshot = ParamSnapshot {
            params: vec![
                ("w".to_string(), array![[1f32, 2., 3.]].into_dyn()),
                ("b".to_string(), array![0f32, 0.].into_dyn()),
            ],
        };

        let err = store.restore(snapshot).unwrap_err();
        assert!(matches!(err, StoreErr::ShapeMismatch { .. }));
        assert_eq!(store.values(), before.as_slice());
    }

    #[test]
    fn restore_requires_every_param() {
        let mut store = ParameterStore::new(specs(), &mut StdRng::seed_from_u64(3)).unwrap();
        let snapshot = ParamSnapshot {
            params: vec![("w".to_string(), ArrayD::zeros(IxDyn(&[2, 2])))],
        };

        assert!(matches!(
            store.restore(snapshot),
            Err(StoreErr::MissingParam(name)) if name == "b"
        ));
    }

    #[test]
    fn from_values_checks_shapes() {
        let values = vec![ArrayD::zeros(IxDyn(&[2, 2])), ArrayD::zeros(IxDyn(&[3]))];
        assert!(ParameterStore::from_values(specs(), values).is_err());
    }
}
