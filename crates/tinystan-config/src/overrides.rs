//! Partial Configuration Overrides
//!
//! Every field is optional; an unset field falls through to the next layer
//! and finally to the runtime's built-in defaults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Mass-matrix metric used by the sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Unit,
    Dense,
    #[default]
    Diagonal,
}

impl Metric {
    /// Numeric code understood by the foreign sampler
    pub fn code(self) -> i32 {
        match self {
            Metric::Unit => 0,
            Metric::Dense => 1,
            Metric::Diagonal => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Unit => "unit",
            Metric::Dense => "dense",
            Metric::Diagonal => "diagonal",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unit" => Ok(Metric::Unit),
            "dense" => Ok(Metric::Dense),
            "diag" | "diagonal" => Ok(Metric::Diagonal),
            other => Err(format!(
                "unknown metric '{}' (expected unit, dense or diagonal)",
                other
            )),
        }
    }
}

/// Initial values for the inference procedure
///
/// A JSON string value is passed through as already-serialized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Inits {
    /// One value per chain (sampling) or per path (pathfinder)
    PerChain(Vec<serde_json::Value>),
    /// A single value shared by every chain
    Shared(serde_json::Value),
}

impl Inits {
    /// Number of distinct init records, if given per chain
    pub fn per_chain_len(&self) -> Option<usize> {
        match self {
            Inits::PerChain(values) => Some(values.len()),
            Inits::Shared(_) => None,
        }
    }
}

/// Partial configuration for the sampler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplerOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_chains: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_radius: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_warmup: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_samples: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<Metric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapt: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kappa: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t0: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_buffer: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term_buffer: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_warmup: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stepsize: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stepsize_jitter: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inits: Option<Inits>,
    /// Explicit initial inverse metric (accepted, rejected at validation)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_inv_metric: Option<Vec<f64>>,
    /// Also return the adapted metric of every chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_metric: Option<bool>,
}

impl SamplerOverrides {
    /// Layer `top` over `self`, field by field
    pub fn overlay(&self, top: &SamplerOverrides) -> SamplerOverrides {
        SamplerOverrides {
            num_chains: top.num_chains.or(self.num_chains),
            seed: top.seed.or(self.seed),
            id: top.id.or(self.id),
            init_radius: top.init_radius.or(self.init_radius),
            num_warmup: top.num_warmup.or(self.num_warmup),
            num_samples: top.num_samples.or(self.num_samples),
            metric: top.metric.or(self.metric),
            adapt: top.adapt.or(self.adapt),
            delta: top.delta.or(self.delta),
            gamma: top.gamma.or(self.gamma),
            kappa: top.kappa.or(self.kappa),
            t0: top.t0.or(self.t0),
            init_buffer: top.init_buffer.or(self.init_buffer),
            term_buffer: top.term_buffer.or(self.term_buffer),
            window: top.window.or(self.window),
            save_warmup: top.save_warmup.or(self.save_warmup),
            stepsize: top.stepsize.or(self.stepsize),
            stepsize_jitter: top.stepsize_jitter.or(self.stepsize_jitter),
            max_depth: top.max_depth.or(self.max_depth),
            refresh: top.refresh.or(self.refresh),
            num_threads: top.num_threads.or(self.num_threads),
            inits: top.inits.clone().or_else(|| self.inits.clone()),
            init_inv_metric: top
                .init_inv_metric
                .clone()
                .or_else(|| self.init_inv_metric.clone()),
            save_metric: top.save_metric.or(self.save_metric),
        }
    }
}

/// Partial configuration for pathfinder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathfinderOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_paths: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_radius: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_draws: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_history_size: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_alpha: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tol_obj: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tol_rel_obj: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tol_grad: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tol_rel_grad: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tol_param: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_iterations: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_elbo_draws: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_multi_draws: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculate_lp: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psis_resample: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inits: Option<Inits>,
}

impl PathfinderOverrides {
    /// Layer `top` over `self`, field by field
    pub fn overlay(&self, top: &PathfinderOverrides) -> PathfinderOverrides {
        PathfinderOverrides {
            num_paths: top.num_paths.or(self.num_paths),
            seed: top.seed.or(self.seed),
            id: top.id.or(self.id),
            init_radius: top.init_radius.or(self.init_radius),
            num_draws: top.num_draws.or(self.num_draws),
            max_history_size: top.max_history_size.or(self.max_history_size),
            init_alpha: top.init_alpha.or(self.init_alpha),
            tol_obj: top.tol_obj.or(self.tol_obj),
            tol_rel_obj: top.tol_rel_obj.or(self.tol_rel_obj),
            tol_grad: top.tol_grad.or(self.tol_grad),
            tol_rel_grad: top.tol_rel_grad.or(self.tol_rel_grad),
            tol_param: top.tol_param.or(self.tol_param),
            num_iterations: top.num_iterations.or(self.num_iterations),
            num_elbo_draws: top.num_elbo_draws.or(self.num_elbo_draws),
            num_multi_draws: top.num_multi_draws.or(self.num_multi_draws),
            calculate_lp: top.calculate_lp.or(self.calculate_lp),
            psis_resample: top.psis_resample.or(self.psis_resample),
            refresh: top.refresh.or(self.refresh),
            num_threads: top.num_threads.or(self.num_threads),
            inits: top.inits.clone().or_else(|| self.inits.clone()),
        }
    }
}
