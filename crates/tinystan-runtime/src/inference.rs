//! Inference invocation - sampling and pathfinder
//!
//! Each call validates its configuration, creates a model through
//! `with_model`, sizes and allocates the output buffers, crosses the
//! boundary once, and reshapes the result. Every buffer comes from the
//! invocation's arena.

use crate::draws::{MetricOutput, StanDraws};
use crate::error::{StanError, StanResult};
use crate::ffi::errors::decode_and_destroy;
use crate::ffi::marshal::{
    decode_text, encode_inits, reshape, reshape_dense_metric, reshape_diag_metric,
    split_param_names,
};
use crate::ffi::module::{ForeignModule, PathfinderArgs, SampleArgs};
use crate::ffi::safety::ForeignArena;
use crate::ffi::types::{F64Buffer, F64Ptr, ModelPtr};
use crate::model::StanModel;
use crate::params::{
    checked_len, ModelData, PathfinderParams, SamplerParams, HMC_SAMPLER_VARIABLES,
    PATHFINDER_VARIABLES,
};
use tinystan_config::{Metric, PathfinderOverrides, SamplerOverrides};
use tracing::{debug, info};

/// What the model reports about itself once created
struct ModelShape {
    param_names: Vec<String>,
    free_params: usize,
}

impl ModelShape {
    /// # Safety
    ///
    /// `model` must be live.
    unsafe fn read<M: ForeignModule + ?Sized>(module: &M, model: ModelPtr) -> Self {
        let raw = decode_text(module, module.model_param_names(model));
        Self {
            param_names: split_param_names(&raw),
            free_params: module.model_num_free_params(model),
        }
    }

    fn output_names(&self, diagnostics: &[&str]) -> Vec<String> {
        diagnostics
            .iter()
            .map(|name| name.to_string())
            .chain(self.param_names.iter().cloned())
            .collect()
    }
}

impl<M: ForeignModule> StanModel<M> {
    /// Draw from the posterior with the NUTS sampler
    pub fn sample(&self, data: &ModelData, overrides: &SamplerOverrides) -> StanResult<StanDraws> {
        let (params, seed) = SamplerParams::from_overrides(overrides)?;

        self.with_model(data, seed, |model, arena| {
            self.run_sample(model, arena, &params, seed)
        })
    }

    fn run_sample(
        &self,
        model: ModelPtr,
        arena: &mut ForeignArena<'_, M>,
        params: &SamplerParams,
        seed: u32,
    ) -> StanResult<StanDraws> {
        let module = arena.module();
        // SAFETY: `model` is live for the whole `with_model` body.
        let shape = unsafe { ModelShape::read(module, model) };
        if shape.free_params == 0 {
            return Err(StanError::NoParameters);
        }

        let param_names = shape.output_names(&HMC_SAMPLER_VARIABLES);
        let n_vars = param_names.len();
        let n_draws = params.num_draws()?;
        let out_len = checked_len(n_vars, n_draws, "output slots")?;
        let metric_len = if params.save_metric {
            let per_chain = match params.metric {
                Metric::Dense => {
                    checked_len(shape.free_params, shape.free_params, "metric slots")?
                }
                Metric::Diagonal | Metric::Unit => shape.free_params,
            };
            checked_len(params.num_chains, per_chain, "metric slots")?
        } else {
            0
        };
        debug!(
            variables = n_vars,
            draws = n_draws,
            free_params = shape.free_params,
            "allocating sampler output"
        );

        let out = arena.alloc_f64s(out_len)?;
        let metric_out = if params.save_metric {
            arena.alloc_f64s(metric_len)?
        } else {
            F64Buffer::null()
        };
        let err = arena.alloc_error_slot()?;
        let inits = encode_inits(arena, params.inits.as_ref(), self.separator())?;

        let args = SampleArgs {
            model,
            num_chains: params.num_chains,
            inits,
            seed,
            id: params.id,
            init_radius: params.init_radius,
            num_warmup: params.num_warmup,
            num_samples: params.num_samples,
            metric: params.metric.code(),
            init_inv_metric: F64Ptr::NULL,
            adapt: params.adapt,
            delta: params.delta,
            gamma: params.gamma,
            kappa: params.kappa,
            t0: params.t0,
            init_buffer: params.init_buffer,
            term_buffer: params.term_buffer,
            window: params.window,
            save_warmup: params.save_warmup,
            stepsize: params.stepsize,
            stepsize_jitter: params.stepsize_jitter,
            max_depth: params.max_depth,
            refresh: params.refresh,
            num_threads: params.num_threads,
            out,
            metric_out,
            err,
        };

        // SAFETY: every token in `args` is owned by `arena` or is the live model.
        let status = unsafe { module.sample(&args) };
        if status != 0 {
            // SAFETY: the failed call filled `err`, which is still live.
            return Err(unsafe { decode_and_destroy(module, err, self.capture()) });
        }

        // SAFETY: `out` holds exactly `out.len()` doubles.
        let flat = unsafe { module.read_f64s(out.ptr(), out.len()) };
        let draws = reshape(&flat, n_vars, n_draws);

        let metric = if params.save_metric {
            // SAFETY: `metric_out` was sized for this metric kind above.
            let flat = unsafe { module.read_f64s(metric_out.ptr(), metric_out.len()) };
            Some(match params.metric {
                Metric::Dense => MetricOutput::Dense(reshape_dense_metric(
                    &flat,
                    params.num_chains,
                    shape.free_params,
                )),
                Metric::Diagonal | Metric::Unit => MetricOutput::Diagonal(reshape_diag_metric(
                    &flat,
                    params.num_chains,
                    shape.free_params,
                )),
            })
        } else {
            None
        };

        info!(
            chains = params.num_chains,
            draws = n_draws,
            variables = n_vars,
            seed,
            "sampling finished"
        );
        Ok(StanDraws {
            param_names,
            draws,
            metric,
        })
    }

    /// Approximate the posterior with multi-path pathfinder
    pub fn pathfinder(
        &self,
        data: &ModelData,
        overrides: &PathfinderOverrides,
    ) -> StanResult<StanDraws> {
        let (params, seed) = PathfinderParams::from_overrides(overrides)?;

        self.with_model(data, seed, |model, arena| {
            self.run_pathfinder(model, arena, &params, seed)
        })
    }

    fn run_pathfinder(
        &self,
        model: ModelPtr,
        arena: &mut ForeignArena<'_, M>,
        params: &PathfinderParams,
        seed: u32,
    ) -> StanResult<StanDraws> {
        let module = arena.module();
        // SAFETY: `model` is live for the whole `with_model` body.
        let shape = unsafe { ModelShape::read(module, model) };
        if shape.free_params == 0 {
            return Err(StanError::NoParameters);
        }

        let param_names = shape.output_names(&PATHFINDER_VARIABLES);
        let n_vars = param_names.len();
        let n_draws = params.num_output_draws()?;
        let out_len = checked_len(n_vars, n_draws, "output slots")?;
        debug!(
            variables = n_vars,
            draws = n_draws,
            pooled = params.pools_draws(),
            "allocating pathfinder output"
        );

        let out = arena.alloc_f64s(out_len)?;
        let err = arena.alloc_error_slot()?;
        let inits = encode_inits(arena, params.inits.as_ref(), self.separator())?;

        let args = PathfinderArgs {
            model,
            num_paths: params.num_paths,
            inits,
            seed,
            id: params.id,
            init_radius: params.init_radius,
            num_draws: params.num_draws,
            max_history_size: params.max_history_size,
            init_alpha: params.init_alpha,
            tol_obj: params.tol_obj,
            tol_rel_obj: params.tol_rel_obj,
            tol_grad: params.tol_grad,
            tol_rel_grad: params.tol_rel_grad,
            tol_param: params.tol_param,
            num_iterations: params.num_iterations,
            num_elbo_draws: params.num_elbo_draws,
            num_multi_draws: params.num_multi_draws,
            calculate_lp: params.calculate_lp,
            psis_resample: params.psis_resample,
            refresh: params.refresh,
            num_threads: params.num_threads,
            out,
            err,
        };

        // SAFETY: every token in `args` is owned by `arena` or is the live model.
        let status = unsafe { module.pathfinder(&args) };
        if status != 0 {
            // SAFETY: the failed call filled `err`, which is still live.
            return Err(unsafe { decode_and_destroy(module, err, self.capture()) });
        }

        // SAFETY: `out` holds exactly `out.len()` doubles.
        let flat = unsafe { module.read_f64s(out.ptr(), out.len()) };
        let draws = reshape(&flat, n_vars, n_draws);

        info!(
            paths = params.num_paths,
            draws = n_draws,
            variables = n_vars,
            seed,
            "pathfinder finished"
        );
        Ok(StanDraws {
            param_names,
            draws,
            metric: None,
        })
    }
}
