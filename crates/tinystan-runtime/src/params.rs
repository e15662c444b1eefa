//! Inference parameters - defaults, merging and validation
//!
//! Each procedure has a complete parameter record with fixed defaults.
//! Caller overrides (`SamplerOverrides` / `PathfinderOverrides`) are laid
//! over it field by field, then the record is validated and a missing seed
//! is drawn here, before anything crosses the boundary. Validation also
//! sizes the draw counts, so an invocation never overflows while laying out
//! its buffers.

use crate::error::{StanError, StanResult};
use rand::RngExt;
use serde::Serialize;
use tinystan_config::{Inits, Metric, PathfinderOverrides, SamplerOverrides};

/// Diagnostic variables the sampler writes ahead of the model parameters
pub const HMC_SAMPLER_VARIABLES: [&str; 7] = [
    "lp__",
    "accept_stat__",
    "stepsize__",
    "treedepth__",
    "n_leapfrog__",
    "divergent__",
    "energy__",
];

/// Diagnostic variables pathfinder writes ahead of the model parameters
pub const PATHFINDER_VARIABLES: [&str; 2] = ["lp_approx__", "lp__"];

/// Model data, either already serialized or as a JSON value
#[derive(Debug, Clone, PartialEq)]
pub enum ModelData {
    Text(String),
    Json(serde_json::Value),
}

impl ModelData {
    /// Serialize any value as model data
    pub fn from_serialize<T: Serialize>(value: &T) -> StanResult<Self> {
        serde_json::to_value(value)
            .map(ModelData::Json)
            .map_err(|source| StanError::Serialize {
                what: "model data",
                source,
            })
    }

    /// JSON text handed to the model constructor
    pub fn to_text(&self) -> StanResult<String> {
        match self {
            ModelData::Text(text) => Ok(text.clone()),
            ModelData::Json(value) => {
                serde_json::to_string(value).map_err(|source| StanError::Serialize {
                    what: "model data",
                    source,
                })
            }
        }
    }
}

impl Default for ModelData {
    fn default() -> Self {
        ModelData::Text(String::new())
    }
}

impl From<&str> for ModelData {
    fn from(text: &str) -> Self {
        ModelData::Text(text.to_string())
    }
}

impl From<String> for ModelData {
    fn from(text: String) -> Self {
        ModelData::Text(text)
    }
}

impl From<serde_json::Value> for ModelData {
    fn from(value: serde_json::Value) -> Self {
        ModelData::Json(value)
    }
}

/// A pseudo-random seed for runs that did not fix one
pub fn random_seed() -> u32 {
    rand::rng().random()
}

/// Use the given seed, or draw and log one
fn resolve_seed(seed: Option<u32>) -> u32 {
    seed.unwrap_or_else(|| {
        let seed = random_seed();
        tracing::debug!(seed, "no seed given, drew one");
        seed
    })
}

/// `a * b`, or a validation error naming the product
pub(crate) fn checked_len(a: usize, b: usize, what: &str) -> StanResult<usize> {
    a.checked_mul(b).ok_or_else(|| {
        StanError::Validation(format!("{} overflows ({} x {})", what, a, b))
    })
}

/// Complete sampler configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplerParams {
    pub num_chains: usize,
    pub seed: Option<u32>,
    pub id: u32,
    pub init_radius: f64,
    pub num_warmup: i32,
    pub num_samples: i32,
    pub metric: Metric,
    pub adapt: bool,
    pub delta: f64,
    pub gamma: f64,
    pub kappa: f64,
    pub t0: f64,
    pub init_buffer: u32,
    pub term_buffer: u32,
    pub window: u32,
    pub save_warmup: bool,
    pub stepsize: f64,
    pub stepsize_jitter: f64,
    pub max_depth: i32,
    /// How often progress is printed
    pub refresh: i32,
    pub num_threads: i32,
    pub inits: Option<Inits>,
    pub init_inv_metric: Option<Vec<f64>>,
    pub save_metric: bool,
}

impl Default for SamplerParams {
    fn default() -> Self {
        Self {
            num_chains: 4,
            seed: None,
            id: 1,
            init_radius: 2.0,
            num_warmup: 1000,
            num_samples: 1000,
            metric: Metric::Diagonal,
            adapt: true,
            delta: 0.8,
            gamma: 0.05,
            kappa: 0.75,
            t0: 10.0,
            init_buffer: 75,
            term_buffer: 50,
            window: 25,
            save_warmup: false,
            stepsize: 1.0,
            stepsize_jitter: 0.0,
            max_depth: 10,
            refresh: 100,
            num_threads: -1,
            inits: None,
            init_inv_metric: None,
            save_metric: false,
        }
    }
}

impl SamplerParams {
    /// Defaults, overridden, validated, with the seed resolved
    ///
    /// Returns the record together with the seed the run uses; the record's
    /// own `seed` is set to the same value.
    pub fn from_overrides(overrides: &SamplerOverrides) -> StanResult<(Self, u32)> {
        let mut params = Self::default().merge(overrides);
        params.validate()?;
        let seed = resolve_seed(params.seed);
        params.seed = Some(seed);
        Ok((params, seed))
    }

    /// Lay `o` over this record
    pub fn merge(&self, o: &SamplerOverrides) -> Self {
        Self {
            num_chains: o.num_chains.unwrap_or(self.num_chains),
            seed: o.seed.or(self.seed),
            id: o.id.unwrap_or(self.id),
            init_radius: o.init_radius.unwrap_or(self.init_radius),
            num_warmup: o.num_warmup.unwrap_or(self.num_warmup),
            num_samples: o.num_samples.unwrap_or(self.num_samples),
            metric: o.metric.unwrap_or(self.metric),
            adapt: o.adapt.unwrap_or(self.adapt),
            delta: o.delta.unwrap_or(self.delta),
            gamma: o.gamma.unwrap_or(self.gamma),
            kappa: o.kappa.unwrap_or(self.kappa),
            t0: o.t0.unwrap_or(self.t0),
            init_buffer: o.init_buffer.unwrap_or(self.init_buffer),
            term_buffer: o.term_buffer.unwrap_or(self.term_buffer),
            window: o.window.unwrap_or(self.window),
            save_warmup: o.save_warmup.unwrap_or(self.save_warmup),
            stepsize: o.stepsize.unwrap_or(self.stepsize),
            stepsize_jitter: o.stepsize_jitter.unwrap_or(self.stepsize_jitter),
            max_depth: o.max_depth.unwrap_or(self.max_depth),
            refresh: o.refresh.unwrap_or(self.refresh),
            num_threads: o.num_threads.unwrap_or(self.num_threads),
            inits: o.inits.clone().or_else(|| self.inits.clone()),
            init_inv_metric: o
                .init_inv_metric
                .clone()
                .or_else(|| self.init_inv_metric.clone()),
            save_metric: o.save_metric.unwrap_or(self.save_metric),
        }
    }

    /// Check the preconditions that must hold before calling the sampler
    pub fn validate(&self) -> StanResult<()> {
        if self.num_chains < 1 {
            return Err(StanError::Validation(
                "num_chains must be at least 1".to_string(),
            ));
        }
        if self.num_warmup < 0 {
            return Err(StanError::Validation(
                "num_warmup must be non-negative".to_string(),
            ));
        }
        if self.num_samples < 1 {
            return Err(StanError::Validation(
                "num_samples must be at least 1".to_string(),
            ));
        }
        if self.num_warmup.checked_add(self.num_samples).is_none() {
            return Err(StanError::Validation(format!(
                "num_warmup + num_samples exceeds {}",
                i32::MAX
            )));
        }
        self.num_draws()?;
        check_inits_len(self.inits.as_ref(), self.num_chains, "num_chains")?;
        if self.init_inv_metric.is_some() {
            return Err(StanError::Unsupported("init_inv_metric"));
        }
        Ok(())
    }

    /// Draws per chain written to the output buffer
    pub fn draws_per_chain(&self) -> StanResult<usize> {
        let warmup = if self.save_warmup { self.num_warmup } else { 0 };
        self.num_samples
            .checked_add(warmup)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| {
                StanError::Validation(format!(
                    "draws per chain overflow ({} + {})",
                    self.num_samples, warmup
                ))
            })
    }

    /// Total draws across all chains
    pub fn num_draws(&self) -> StanResult<usize> {
        checked_len(self.num_chains, self.draws_per_chain()?, "total draws")
    }
}

/// Complete pathfinder configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathfinderParams {
    pub num_paths: usize,
    pub seed: Option<u32>,
    pub id: u32,
    pub init_radius: f64,
    pub num_draws: i32,
    pub max_history_size: i32,
    pub init_alpha: f64,
    pub tol_obj: f64,
    pub tol_rel_obj: f64,
    pub tol_grad: f64,
    pub tol_rel_grad: f64,
    pub tol_param: f64,
    pub num_iterations: i32,
    pub num_elbo_draws: i32,
    pub num_multi_draws: i32,
    pub calculate_lp: bool,
    pub psis_resample: bool,
    pub refresh: i32,
    pub num_threads: i32,
    pub inits: Option<Inits>,
}

impl Default for PathfinderParams {
    fn default() -> Self {
        Self {
            num_paths: 4,
            seed: None,
            id: 1,
            init_radius: 2.0,
            num_draws: 1000,
            max_history_size: 5,
            init_alpha: 0.001,
            tol_obj: 1e-12,
            tol_rel_obj: 1e4,
            tol_grad: 1e-8,
            tol_rel_grad: 1e7,
            tol_param: 1e-8,
            num_iterations: 1000,
            num_elbo_draws: 100,
            num_multi_draws: 1000,
            calculate_lp: true,
            psis_resample: true,
            refresh: 0,
            num_threads: -1,
            inits: None,
        }
    }
}

impl PathfinderParams {
    /// Defaults, overridden, validated, with the seed resolved
    ///
    /// Returns the record together with the seed the run uses; the record's
    /// own `seed` is set to the same value.
    pub fn from_overrides(overrides: &PathfinderOverrides) -> StanResult<(Self, u32)> {
        let mut params = Self::default().merge(overrides);
        params.validate()?;
        let seed = resolve_seed(params.seed);
        params.seed = Some(seed);
        Ok((params, seed))
    }

    /// Lay `o` over this record
    pub fn merge(&self, o: &PathfinderOverrides) -> Self {
        Self {
            num_paths: o.num_paths.unwrap_or(self.num_paths),
            seed: o.seed.or(self.seed),
            id: o.id.unwrap_or(self.id),
            init_radius: o.init_radius.unwrap_or(self.init_radius),
            num_draws: o.num_draws.unwrap_or(self.num_draws),
            max_history_size: o.max_history_size.unwrap_or(self.max_history_size),
            init_alpha: o.init_alpha.unwrap_or(self.init_alpha),
            tol_obj: o.tol_obj.unwrap_or(self.tol_obj),
            tol_rel_obj: o.tol_rel_obj.unwrap_or(self.tol_rel_obj),
            tol_grad: o.tol_grad.unwrap_or(self.tol_grad),
            tol_rel_grad: o.tol_rel_grad.unwrap_or(self.tol_rel_grad),
            tol_param: o.tol_param.unwrap_or(self.tol_param),
            num_iterations: o.num_iterations.unwrap_or(self.num_iterations),
            num_elbo_draws: o.num_elbo_draws.unwrap_or(self.num_elbo_draws),
            num_multi_draws: o.num_multi_draws.unwrap_or(self.num_multi_draws),
            calculate_lp: o.calculate_lp.unwrap_or(self.calculate_lp),
            psis_resample: o.psis_resample.unwrap_or(self.psis_resample),
            refresh: o.refresh.unwrap_or(self.refresh),
            num_threads: o.num_threads.unwrap_or(self.num_threads),
            inits: o.inits.clone().or_else(|| self.inits.clone()),
        }
    }

    /// Check the preconditions that must hold before calling pathfinder
    pub fn validate(&self) -> StanResult<()> {
        if self.num_paths < 1 {
            return Err(StanError::Validation(
                "num_paths must be at least 1".to_string(),
            ));
        }
        if self.num_draws < 1 {
            return Err(StanError::Validation(
                "num_draws must be at least 1".to_string(),
            ));
        }
        if self.num_multi_draws < 1 {
            return Err(StanError::Validation(
                "num_multi_draws must be at least 1".to_string(),
            ));
        }
        self.num_output_draws()?;
        check_inits_len(self.inits.as_ref(), self.num_paths, "num_paths")
    }

    /// Whether the output is pooled into one resampled draw set
    pub fn pools_draws(&self) -> bool {
        self.psis_resample && self.calculate_lp
    }

    /// Rows written to the output buffer
    pub fn num_output_draws(&self) -> StanResult<usize> {
        let per_path = |n: i32| {
            usize::try_from(n)
                .map_err(|_| StanError::Validation(format!("negative draw count {}", n)))
        };
        if self.pools_draws() {
            per_path(self.num_multi_draws)
        } else {
            checked_len(self.num_paths, per_path(self.num_draws)?, "total draws")
        }
    }
}

fn check_inits_len(inits: Option<&Inits>, expected: usize, count_name: &str) -> StanResult<()> {
    match inits.and_then(Inits::per_chain_len) {
        Some(len) if len != expected => Err(StanError::Validation(format!(
            "{} initial values given but {} = {}",
            len, count_name, expected
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_sampler_defaults_survive_empty_overrides() {
        let params = SamplerParams::default().merge(&SamplerOverrides::default());
        assert_eq!(params, SamplerParams::default());
    }

    #[test]
    fn test_sampler_merge_overrides_only_given_fields() {
        let params = SamplerParams::default().merge(&SamplerOverrides {
            num_chains: Some(2),
            metric: Some(Metric::Dense),
            save_warmup: Some(true),
            ..Default::default()
        });
        assert_eq!(params.num_chains, 2);
        assert_eq!(params.metric, Metric::Dense);
        assert!(params.save_warmup);
        assert_eq!(params.num_samples, 1000);
        assert_eq!(params.delta, 0.8);
    }

    #[rstest]
    #[case::zero_chains(SamplerOverrides { num_chains: Some(0), ..Default::default() }, "num_chains")]
    #[case::negative_warmup(SamplerOverrides { num_warmup: Some(-1), ..Default::default() }, "num_warmup")]
    #[case::zero_samples(SamplerOverrides { num_samples: Some(0), ..Default::default() }, "num_samples")]
    fn test_sampler_validation(#[case] overrides: SamplerOverrides, #[case] field: &str) {
        let err = SamplerParams::from_overrides(&overrides).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains(field), "{}", err);
    }

    #[test]
    fn test_zero_warmup_is_valid() {
        let overrides = SamplerOverrides {
            num_warmup: Some(0),
            ..Default::default()
        };
        assert!(SamplerParams::from_overrides(&overrides).is_ok());
    }

    #[test]
    fn test_init_inv_metric_unsupported() {
        let overrides = SamplerOverrides {
            init_inv_metric: Some(vec![1.0]),
            ..Default::default()
        };
        let err = SamplerParams::from_overrides(&overrides).unwrap_err();
        assert!(matches!(err, StanError::Unsupported("init_inv_metric")));
    }

    #[test]
    fn test_per_chain_inits_must_match_chains() {
        let overrides = SamplerOverrides {
            num_chains: Some(3),
            inits: Some(Inits::PerChain(vec![serde_json::json!({"mu": 0})])),
            ..Default::default()
        };
        assert!(SamplerParams::from_overrides(&overrides).unwrap_err().is_validation());
    }

    #[test]
    fn test_missing_seed_is_resolved() {
        let (params, seed) = SamplerParams::from_overrides(&SamplerOverrides::default()).unwrap();
        assert_eq!(params.seed, Some(seed));

        let (params, seed) = SamplerParams::from_overrides(&SamplerOverrides {
            seed: Some(1234),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(seed, 1234);
        assert_eq!(params.seed, Some(1234));

        let (_, seed) = PathfinderParams::from_overrides(&PathfinderOverrides {
            seed: Some(7),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(seed, 7);
    }

    #[test]
    fn test_sampler_draw_counts() {
        let params = SamplerParams::default().merge(&SamplerOverrides {
            num_chains: Some(2),
            num_warmup: Some(10),
            num_samples: Some(5),
            ..Default::default()
        });
        assert_eq!(params.num_draws().unwrap(), 10);

        let params = params.merge(&SamplerOverrides {
            save_warmup: Some(true),
            ..Default::default()
        });
        assert_eq!(params.num_draws().unwrap(), 30);
    }

    #[rstest]
    #[case::warmup_plus_samples(SamplerOverrides {
        num_warmup: Some(1),
        num_samples: Some(i32::MAX),
        save_warmup: Some(true),
        ..Default::default()
    }, "num_warmup + num_samples")]
    #[case::warmup_plus_samples_unsaved(SamplerOverrides {
        num_warmup: Some(i32::MAX),
        num_samples: Some(1),
        ..Default::default()
    }, "num_warmup + num_samples")]
    #[case::chains_times_draws(SamplerOverrides {
        num_chains: Some(usize::MAX),
        num_samples: Some(2),
        ..Default::default()
    }, "total draws")]
    fn test_sampler_count_overflow_is_a_validation_error(
        #[case] overrides: SamplerOverrides,
        #[case] message: &str,
    ) {
        let err = SamplerParams::from_overrides(&overrides).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains(message), "{}", err);
    }

    #[test]
    fn test_pathfinder_count_overflow_is_a_validation_error() {
        let err = PathfinderParams::from_overrides(&PathfinderOverrides {
            num_paths: Some(usize::MAX),
            num_draws: Some(2),
            psis_resample: Some(false),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("total draws"), "{}", err);
    }

    #[test]
    fn test_checked_len() {
        assert_eq!(checked_len(3, 4, "slots").unwrap(), 12);
        assert!(checked_len(usize::MAX, 2, "slots").unwrap_err().is_validation());
    }

    #[rstest]
    #[case::zero_paths(PathfinderOverrides { num_paths: Some(0), ..Default::default() }, "num_paths")]
    #[case::zero_draws(PathfinderOverrides { num_draws: Some(0), ..Default::default() }, "num_draws")]
    #[case::zero_multi_draws(PathfinderOverrides { num_multi_draws: Some(0), ..Default::default() }, "num_multi_draws")]
    fn test_pathfinder_validation(#[case] overrides: PathfinderOverrides, #[case] field: &str) {
        let err = PathfinderParams::from_overrides(&overrides).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains(field), "{}", err);
    }

    #[rstest]
    #[case(true, true, 1000)]
    #[case(true, false, 4 * 1000)]
    #[case(false, true, 4 * 1000)]
    fn test_pathfinder_output_rows(
        #[case] psis_resample: bool,
        #[case] calculate_lp: bool,
        #[case] expected: usize,
    ) {
        let params = PathfinderParams::default().merge(&PathfinderOverrides {
            psis_resample: Some(psis_resample),
            calculate_lp: Some(calculate_lp),
            ..Default::default()
        });
        assert_eq!(params.num_output_draws().unwrap(), expected);
    }

    #[test]
    fn test_model_data_text() {
        assert_eq!(ModelData::default().to_text().unwrap(), "");
        assert_eq!(
            ModelData::from(serde_json::json!({"N": 2})).to_text().unwrap(),
            "{\"N\":2}"
        );

        #[derive(Serialize)]
        struct Data {
            n: usize,
            y: Vec<i32>,
        }
        let data = ModelData::from_serialize(&Data { n: 2, y: vec![0, 1] }).unwrap();
        assert_eq!(data.to_text().unwrap(), "{\"n\":2,\"y\":[0,1]}");
    }
}
