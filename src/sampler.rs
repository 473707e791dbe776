//! Chain driver: configuration, method selection, step schedule and trace.

use crate::error::SamplingError;
use crate::forward::SignalModel;
use crate::steps::{
    BlockStep, GammaPrior, NoiseParameter, NoisePrecisionStep, OperatorKeys, RegularizationStep,
    SignalDistributionStep,
};
use crate::types::{Point, Value};
use ndarray::{Array2, Array3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

const REQUIRED_KEYS: [&str; 3] = ["draws", "tune", "chains"];

fn default_cores() -> usize {
    2
}

fn default_seed() -> u64 {
    42
}

/// Run lengths and parallelism for a sampling job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Kept iterations per chain.
    pub draws: usize,
    /// Discarded leading iterations per chain.
    pub tune: usize,
    pub chains: usize,
    /// Worker threads for running chains.
    #[serde(default = "default_cores")]
    pub cores: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl SamplingConfig {
    pub fn new(draws: usize, tune: usize, chains: usize) -> Self {
        Self {
            draws,
            tune,
            chains,
            cores: default_cores(),
            seed: default_seed(),
        }
    }

    /// Parses a JSON object; unknown keys are ignored.
    pub fn from_json_value(value: &serde_json::Value) -> Result<Self, SamplingError> {
        let object = value.as_object().ok_or_else(|| {
            SamplingError::InvalidConfiguration("sampling options must be a JSON object".into())
        })?;
        if let Some(missing) = REQUIRED_KEYS.iter().find(|key| !object.contains_key(**key)) {
            return Err(SamplingError::MissingConfiguration((*missing).to_string()));
        }
        let config: SamplingConfig = serde_json::from_value(value.clone())
            .map_err(|e| SamplingError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self, SamplingError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| SamplingError::InvalidConfiguration(e.to_string()))?;
        Self::from_json_value(&value)
    }

    pub fn validate(&self) -> Result<(), SamplingError> {
        if self.chains == 0 {
            return Err(SamplingError::InvalidConfiguration(
                "at least one chain is required".into(),
            ));
        }
        if self.cores == 0 {
            return Err(SamplingError::InvalidConfiguration(
                "at least one core is required".into(),
            ));
        }
        Ok(())
    }

    /// Seed of chain `chain`, decorrelated from its neighbours.
    pub fn chain_seed(&self, chain: usize) -> u64 {
        self.seed ^ 0x9E37_79B9_7F4A_7C15u64.wrapping_mul((chain as u64) + 1)
    }
}

/// Which parameters are handled by the custom Gibbs steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InversionMethod {
    /// Parametric Gaussian mixture; every parameter is left to the external
    /// gradient sampler.
    Gaussian,
    /// `P`, `tau` and `delta` are all Gibbs-sampled.
    Regularization,
    /// Only `P` is Gibbs-sampled; `tau` and `delta` come from the external
    /// sampler.
    Regularization2,
}

impl InversionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            InversionMethod::Gaussian => "gaussian",
            InversionMethod::Regularization => "regularization",
            InversionMethod::Regularization2 => "regularization2",
        }
    }

    /// Variables removed from the trace after sampling.
    pub fn discarded_variables(&self) -> &'static [&'static str] {
        match self {
            InversionMethod::Gaussian => &["r0_rel"],
            InversionMethod::Regularization | InversionMethod::Regularization2 => &[],
        }
    }
}

impl FromStr for InversionMethod {
    type Err = SamplingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gaussian" => Ok(InversionMethod::Gaussian),
            "regularization" => Ok(InversionMethod::Regularization),
            "regularization2" => Ok(InversionMethod::Regularization2),
            other => Err(SamplingError::UnknownMethod(other.to_string())),
        }
    }
}

/// Point keys used by the regularization schedules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelNames {
    pub distribution: String,
    pub tau: String,
    pub delta: String,
    pub rate: String,
    pub lamb: String,
    pub v0: String,
}

impl Default for ModelNames {
    fn default() -> Self {
        Self {
            distribution: "P".into(),
            tau: "tau".into(),
            delta: "delta".into(),
            rate: "k".into(),
            lamb: "lamb".into(),
            v0: "V0".into(),
        }
    }
}

impl ModelNames {
    fn operator_keys(&self) -> OperatorKeys {
        OperatorKeys::new(self.rate.clone(), self.lamb.clone(), self.v0.clone())
    }
}

/// Fixed inputs of the regularization model.
pub struct RegularizationModel {
    pub signal: Arc<SignalModel>,
    /// Roughness operator `L`.
    pub l: Arc<Array2<f64>>,
    ltl: Arc<Array2<f64>>,
    pub tau_prior: GammaPrior,
    pub delta_prior: GammaPrior,
    pub names: ModelNames,
}

impl RegularizationModel {
    pub fn new(
        signal: Arc<SignalModel>,
        l: Array2<f64>,
        tau_prior: GammaPrior,
        delta_prior: GammaPrior,
    ) -> Result<Self, SamplingError> {
        if l.ncols() != signal.nr() {
            return Err(SamplingError::DimensionMismatch {
                what: "roughness operator columns",
                expected: signal.nr(),
                found: l.ncols(),
            });
        }
        let ltl = l.t().dot(&l);
        Ok(Self {
            signal,
            l: Arc::new(l),
            ltl: Arc::new(ltl),
            tau_prior,
            delta_prior,
            names: ModelNames::default(),
        })
    }

    pub fn with_names(mut self, names: ModelNames) -> Self {
        self.names = names;
        self
    }

    pub fn ltl(&self) -> &Arc<Array2<f64>> {
        &self.ltl
    }

    fn distribution_step(&self) -> Result<SignalDistributionStep, SamplingError> {
        SignalDistributionStep::new(
            self.names.distribution.clone(),
            self.names.delta.clone(),
            NoiseParameter::Precision(self.names.tau.clone()),
            self.names.operator_keys(),
            Arc::clone(&self.signal),
            Arc::clone(&self.ltl),
        )
    }
}

/// Custom Gibbs steps for `method`, optionally permuted by `step_order`.
///
/// `Gaussian` contributes no steps. The regularization methods require a
/// model.
pub fn build_schedule(
    method: InversionMethod,
    model: Option<&RegularizationModel>,
    step_order: Option<&[usize]>,
) -> Result<Vec<Box<dyn BlockStep>>, SamplingError> {
    let require = || {
        model.ok_or_else(|| {
            SamplingError::InvalidConfiguration(format!(
                "method '{}' requires a regularization model",
                method.as_str()
            ))
        })
    };
    let steps: Vec<Box<dyn BlockStep>> = match method {
        InversionMethod::Gaussian => Vec::new(),
        InversionMethod::Regularization => {
            let model = require()?;
            let distribution: Box<dyn BlockStep> = Box::new(model.distribution_step()?);
            let noise: Box<dyn BlockStep> = Box::new(NoisePrecisionStep::new(
                model.names.tau.clone(),
                model.names.distribution.clone(),
                model.names.operator_keys(),
                Arc::clone(&model.signal),
                model.tau_prior,
            ));
            let regularization: Box<dyn BlockStep> = Box::new(RegularizationStep::new(
                model.names.delta.clone(),
                model.names.distribution.clone(),
                Arc::clone(&model.l),
                model.delta_prior,
            ));
            vec![distribution, noise, regularization]
        }
        InversionMethod::Regularization2 => {
            let model = require()?;
            let distribution: Box<dyn BlockStep> = Box::new(model.distribution_step()?);
            vec![distribution]
        }
    };
    match step_order {
        Some(order) => reorder(steps, order),
        None => Ok(steps),
    }
}

fn reorder<T>(items: Vec<T>, order: &[usize]) -> Result<Vec<T>, SamplingError> {
    if order.len() != items.len() {
        return Err(SamplingError::InvalidStepOrder(format!(
            "expected {} indices, got {}",
            items.len(),
            order.len()
        )));
    }
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    order
        .iter()
        .map(|&i| {
            slots
                .get_mut(i)
                .and_then(Option::take)
                .ok_or_else(|| {
                    SamplingError::InvalidStepOrder(format!(
                        "index {i} is out of range or repeated in {order:?}"
                    ))
                })
        })
        .collect()
}

/// Kept draws of every chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trace {
    chains: Vec<Vec<Point>>,
}

impl Trace {
    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    pub fn n_draws(&self) -> usize {
        self.chains.first().map_or(0, Vec::len)
    }

    pub fn chain(&self, index: usize) -> Option<&[Point]> {
        self.chains.get(index).map(Vec::as_slice)
    }

    pub fn varnames(&self) -> Vec<String> {
        self.chains
            .first()
            .and_then(|c| c.first())
            .map(|p| p.names().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// `(chains, draws)` array of a scalar variable.
    pub fn scalar_values(&self, name: &str) -> Result<Array2<f64>, SamplingError> {
        let mut out = Array2::<f64>::zeros((self.n_chains(), self.n_draws()));
        for (c, chain) in self.chains.iter().enumerate() {
            for (d, point) in chain.iter().enumerate() {
                out[[c, d]] = point.scalar(name)?;
            }
        }
        Ok(out)
    }

    /// `(chains, draws, len)` array of a vector variable.
    pub fn vector_values(&self, name: &str) -> Result<Array3<f64>, SamplingError> {
        let len = match self.chains.first().and_then(|c| c.first()) {
            Some(point) => point.vector(name)?.len(),
            None => 0,
        };
        let mut out = Array3::<f64>::zeros((self.n_chains(), self.n_draws(), len));
        for (c, chain) in self.chains.iter().enumerate() {
            for (d, point) in chain.iter().enumerate() {
                let v = point.vector(name)?;
                if v.len() != len {
                    return Err(SamplingError::DimensionMismatch {
                        what: "traced vector length",
                        expected: len,
                        found: v.len(),
                    });
                }
                out.slice_mut(ndarray::s![c, d, ..]).assign(v);
            }
        }
        Ok(out)
    }

    /// Drops `name` from every draw; returns whether it was present.
    pub fn remove_values(&mut self, name: &str) -> bool {
        let mut removed = false;
        for point in self.chains.iter_mut().flatten() {
            removed |= point.remove(name).is_some();
        }
        removed
    }

    /// Value of `name` at the last draw of `chain`.
    pub fn last(&self, chain: usize, name: &str) -> Option<&Value> {
        self.chains.get(chain)?.last()?.get(name)
    }
}

/// Runs a fixed schedule of block steps over independent chains.
pub struct Sampler {
    steps: Vec<Box<dyn BlockStep>>,
}

impl Sampler {
    /// Rejects schedules in which two steps own the same variable.
    pub fn new(steps: Vec<Box<dyn BlockStep>>) -> Result<Self, SamplingError> {
        let mut owned = HashSet::new();
        for step in &steps {
            for var in step.vars() {
                if !owned.insert(var.clone()) {
                    return Err(SamplingError::DuplicateOwner(var.clone()));
                }
            }
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[Box<dyn BlockStep>] {
        &self.steps
    }

    pub fn run(&self, config: &SamplingConfig, initial: &Point) -> Result<Trace, SamplingError> {
        config.validate()?;
        for step in &self.steps {
            log::debug!("schedule: {} -> {:?}", step.name(), step.vars());
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.cores)
            .build()
            .map_err(|e| SamplingError::ThreadPool(e.to_string()))?;
        let chains: Vec<Vec<Point>> = pool.install(|| {
            (0..config.chains)
                .into_par_iter()
                .map(|chain| self.run_chain(chain, config, initial))
                .collect::<Result<Vec<_>, SamplingError>>()
        })?;
        Ok(Trace { chains })
    }

    fn run_chain(
        &self,
        chain: usize,
        config: &SamplingConfig,
        initial: &Point,
    ) -> Result<Vec<Point>, SamplingError> {
        let mut rng = StdRng::seed_from_u64(config.chain_seed(chain));
        let mut point = initial.clone();
        let mut draws = Vec::with_capacity(config.draws);
        let total = config.tune + config.draws;
        for iter in 0..total {
            for step in &self.steps {
                point = step.step(&point, &mut rng)?;
            }
            if iter >= config.tune {
                draws.push(point.clone());
            }
        }
        log::debug!(
            "chain {chain}: {} tuning and {} kept iterations",
            config.tune,
            config.draws
        );
        Ok(draws)
    }
}

/// Runs `steps` and removes the variables `method` does not report.
pub fn sample(
    method: InversionMethod,
    steps: Vec<Box<dyn BlockStep>>,
    config: &SamplingConfig,
    initial: &Point,
) -> Result<Trace, SamplingError> {
    let sampler = Sampler::new(steps)?;
    let mut trace = sampler.run(config, initial)?;
    for name in method.discarded_variables() {
        if trace.remove_values(name) {
            log::debug!("removed '{name}' from the trace");
        }
    }
    Ok(trace)
}
