use crate::linalg::faer_ndarray::FaerLinalgError;
use crate::solver::nnls::NnlsError;
use thiserror::Error;

/// Crate-level error for configuration, step execution and chain driving.
#[derive(Debug, Error)]
pub enum SamplingError {
    #[error("Missing required sampling option '{0}'")]
    MissingConfiguration(String),
    #[error("Invalid sampling configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Unknown inversion method '{0}'")]
    UnknownMethod(String),
    #[error("Variable '{0}' is not present in the current point")]
    MissingVariable(String),
    #[error("Variable '{name}' has the wrong shape, expected a {expected}")]
    ShapeMismatch { name: String, expected: &'static str },
    #[error("Dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Hyperparameter '{name}' must be finite and positive, got {value}")]
    InvalidHyperparameter { name: String, value: f64 },
    #[error("Invalid step order: {0}")]
    InvalidStepOrder(String),
    #[error("Variable '{0}' is owned by more than one step")]
    DuplicateOwner(String),
    #[error("Failed to build the chain thread pool: {0}")]
    ThreadPool(String),
    #[error(transparent)]
    Nnls(#[from] NnlsError),
    #[error(transparent)]
    Linalg(#[from] FaerLinalgError),
}
