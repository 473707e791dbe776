use crate::error::SamplingError;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current value of one sampler variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(f64),
    Vector(Array1<f64>),
}

impl Value {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            Value::Vector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<&Array1<f64>> {
        match self {
            Value::Scalar(_) => None,
            Value::Vector(v) => Some(v),
        }
    }

    /// Applies `f` element-wise, preserving the shape.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Value {
        match self {
            Value::Scalar(v) => Value::Scalar(f(*v)),
            Value::Vector(v) => Value::Vector(v.mapv(f)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Vector(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_finite(&self) -> bool {
        match self {
            Value::Scalar(v) => v.is_finite(),
            Value::Vector(v) => v.iter().all(|x| x.is_finite()),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Scalar(value)
    }
}

impl From<Array1<f64>> for Value {
    fn from(value: Array1<f64>) -> Self {
        Value::Vector(value)
    }
}

/// Immutable snapshot of one chain's state, keyed by sampler-internal names.
///
/// Steps never mutate a point they are handed; [`Point::with`] returns a copy
/// with a single entry replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    values: BTreeMap<String, Value>,
}

impl Point {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion used when assembling an initial point.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Returns a new point equal to `self` except for `name`.
    pub fn with(&self, name: impl Into<String>, value: impl Into<Value>) -> Point {
        let mut next = self.clone();
        next.values.insert(name.into(), value.into());
        next
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn value(&self, name: &str) -> Result<&Value, SamplingError> {
        self.values
            .get(name)
            .ok_or_else(|| SamplingError::MissingVariable(name.to_string()))
    }

    pub fn scalar(&self, name: &str) -> Result<f64, SamplingError> {
        self.value(name)?
            .as_scalar()
            .ok_or_else(|| SamplingError::ShapeMismatch {
                name: name.to_string(),
                expected: "scalar",
            })
    }

    pub fn vector(&self, name: &str) -> Result<&Array1<f64>, SamplingError> {
        self.value(name)?
            .as_vector()
            .ok_or_else(|| SamplingError::ShapeMismatch {
                name: name.to_string(),
                expected: "vector",
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Point {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
