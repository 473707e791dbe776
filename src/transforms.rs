//! Recovery of natural-scale values from reparameterized sampler variables.
//!
//! Constrained model variables live in the sampler under internal names such as
//! `sigma_log__` or `lamb_logodds__`; the second `_`-separated component names
//! the transform that was applied.

use crate::error::SamplingError;
use crate::types::{Point, Value};

/// Transform recorded in an internal variable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMarker {
    Log,
    LowerBound,
    LogOdds,
}

impl TransformMarker {
    /// Parses the marker from an internal key; `None` when the key carries no
    /// recognised marker.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.split('_').nth(1)? {
            "log" => Some(Self::Log),
            "lowerbound" => Some(Self::LowerBound),
            "logodds" => Some(Self::LogOdds),
            _ => None,
        }
    }

    #[inline]
    pub fn invert(self, value: f64) -> f64 {
        match self {
            Self::Log | Self::LowerBound => value.exp(),
            Self::LogOdds => sigmoid(value),
        }
    }
}

/// Logistic function, evaluated on the side that cannot overflow.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Outcome of resolving one variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Inverted {
        marker: TransformMarker,
        value: Value,
    },
    PassThrough(Value),
}

impl Resolution {
    pub fn value(&self) -> &Value {
        match self {
            Resolution::Inverted { value, .. } | Resolution::PassThrough(value) => value,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Resolution::Inverted { value, .. } | Resolution::PassThrough(value) => value,
        }
    }
}

/// Looks `key` up in `point` and undoes its transform.
///
/// Unknown markers pass the stored value through unchanged; a key missing from
/// the point is an error.
pub fn resolve(point: &Point, key: &str) -> Result<Resolution, SamplingError> {
    let stored = point.value(key)?;
    Ok(match TransformMarker::from_key(key) {
        Some(marker) => Resolution::Inverted {
            marker,
            value: stored.map(|v| marker.invert(v)),
        },
        None => Resolution::PassThrough(stored.clone()),
    })
}

pub fn resolve_scalar(point: &Point, key: &str) -> Result<f64, SamplingError> {
    resolve(point, key)?
        .value()
        .as_scalar()
        .ok_or_else(|| SamplingError::ShapeMismatch {
            name: key.to_string(),
            expected: "scalar",
        })
}
