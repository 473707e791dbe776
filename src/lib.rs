#![deny(dead_code)]
#![deny(unused_imports)]

pub mod error;
pub mod forward;
pub mod gaussian;
pub mod linalg;
pub mod posterior;
pub mod quadrature;
pub mod sampler;
pub mod solver;
pub mod steps;
pub mod synthetic;
pub mod transforms;
pub mod types;

pub use error::SamplingError;
pub use forward::{
    DipolarModel, ForwardModel, SignalModel, assemble_forward_operator, dipolar_kernel,
    exponential_background, normal_equations, regularization_operator,
};
pub use gaussian::{CovarianceFactor, draw_perturbation};
pub use posterior::{ConditionalSystem, rand_p, rand_p_with_options};
pub use sampler::{
    InversionMethod, ModelNames, RegularizationModel, Sampler, SamplingConfig, Trace,
    build_schedule, sample,
};
pub use solver::nnls::{
    NnlsError, NnlsOptions, NnlsSolution, NnlsTermination, fnnls, fnnls_with_options,
};
pub use steps::{
    BlockStep, ExpandedDistributionStep, FixedNoiseDistributionStep, GammaPrior, NoiseParameter,
    NoisePrecisionStep, OperatorKeys, RegularizationStep, SignalDistributionStep,
};
pub use transforms::{Resolution, TransformMarker, resolve, resolve_scalar};
pub use types::{Point, Value};
