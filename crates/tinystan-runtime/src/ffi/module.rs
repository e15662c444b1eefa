//! The foreign function table
//!
//! `ForeignModule` is the complete capability set of a compiled TinyStan
//! model: a small heap API plus the exported `tinystan_*` functions. The
//! binding never touches foreign memory except through this trait.

use crate::ffi::types::{CStrPtr, ErrorPtr, ErrorSlot, F64Buffer, F64Ptr, ModelPtr, RawPtr};

/// Receives one line of foreign print output (without the newline)
pub type PrintHook = Box<dyn FnMut(&str) + Send>;

/// Every argument of `tinystan_sample`, in call order
#[derive(Debug, Clone, Copy)]
pub struct SampleArgs {
    pub model: ModelPtr,
    pub num_chains: usize,
    pub inits: CStrPtr,
    pub seed: u32,
    pub id: u32,
    pub init_radius: f64,
    pub num_warmup: i32,
    pub num_samples: i32,
    pub metric: i32,
    pub init_inv_metric: F64Ptr,
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
    pub refresh: i32,
    pub num_threads: i32,
    pub out: F64Buffer,
    pub metric_out: F64Buffer,
    pub err: ErrorSlot,
}

/// Every argument of `tinystan_pathfinder`, in call order
#[derive(Debug, Clone, Copy)]
pub struct PathfinderArgs {
    pub model: ModelPtr,
    pub num_paths: usize,
    pub inits: CStrPtr,
    pub seed: u32,
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
    pub out: F64Buffer,
    pub err: ErrorSlot,
}

/// A loaded TinyStan model module
///
/// Implementations are free to map tokens to real addresses (native
/// libraries) or to offsets into an emulated heap.
pub trait ForeignModule {
    /// Allocate `n_bytes` of foreign memory; `RawPtr::NULL` on failure
    fn malloc(&self, n_bytes: usize) -> RawPtr;

    /// Release memory obtained from `malloc`
    ///
    /// # Safety
    ///
    /// `ptr` must come from `malloc` on this module and not have been freed.
    unsafe fn free(&self, ptr: RawPtr);

    /// Copy `bytes` into foreign memory at `dst`
    ///
    /// # Safety
    ///
    /// `dst` must be a live allocation of at least `bytes.len()` bytes.
    unsafe fn write_bytes(&self, dst: RawPtr, bytes: &[u8]);

    /// Copy `count` doubles out of foreign memory
    ///
    /// # Safety
    ///
    /// `src` must be readable for `count` doubles.
    unsafe fn read_f64s(&self, src: F64Ptr, count: usize) -> Vec<f64>;

    /// Read one `int` out-parameter
    ///
    /// # Safety
    ///
    /// `src` must be a live allocation of at least four bytes.
    unsafe fn read_i32(&self, src: RawPtr) -> i32;

    /// Read the error token a failing call stored in `slot`
    ///
    /// # Safety
    ///
    /// `slot` must be a live pointer-sized allocation.
    unsafe fn read_error_slot(&self, slot: ErrorSlot) -> ErrorPtr;

    /// Copy a null-terminated string out of foreign memory (terminator excluded)
    ///
    /// # Safety
    ///
    /// `s` must be non-null and point to a null-terminated sequence.
    unsafe fn read_cstr(&self, s: CStrPtr) -> Vec<u8>;

    /// `tinystan_create_model`; returns `ModelPtr::NULL` and fills `err` on failure
    ///
    /// # Safety
    ///
    /// `data` must be a live C string, `err` a live slot.
    unsafe fn create_model(&self, data: CStrPtr, seed: u32, err: ErrorSlot) -> ModelPtr;

    /// `tinystan_destroy_model`
    ///
    /// # Safety
    ///
    /// `model` must be live; it is invalid afterwards.
    unsafe fn destroy_model(&self, model: ModelPtr);

    /// `tinystan_model_param_names`: comma separated, owned by the model
    ///
    /// # Safety
    ///
    /// `model` must be live.
    unsafe fn model_param_names(&self, model: ModelPtr) -> CStrPtr;

    /// `tinystan_model_num_free_params`
    ///
    /// # Safety
    ///
    /// `model` must be live.
    unsafe fn model_num_free_params(&self, model: ModelPtr) -> usize;

    /// `tinystan_separator_char`: joins several init records in one string
    fn separator_char(&self) -> u8;

    /// `tinystan_sample`; non-zero status means `args.err` was filled
    ///
    /// # Safety
    ///
    /// Every token in `args` must be live and the output buffers sized as
    /// their lengths state.
    unsafe fn sample(&self, args: &SampleArgs) -> i32;

    /// `tinystan_pathfinder`; non-zero status means `args.err` was filled
    ///
    /// # Safety
    ///
    /// Same contract as [`ForeignModule::sample`].
    unsafe fn pathfinder(&self, args: &PathfinderArgs) -> i32;

    /// `tinystan_get_error_message`: owned by the error object
    ///
    /// # Safety
    ///
    /// `err` must be a live error token.
    unsafe fn get_error_message(&self, err: ErrorPtr) -> CStrPtr;

    /// `tinystan_get_error_type`
    ///
    /// # Safety
    ///
    /// `err` must be a live error token.
    unsafe fn get_error_type(&self, err: ErrorPtr) -> i32;

    /// `tinystan_destroy_error`
    ///
    /// # Safety
    ///
    /// `err` must be live; it is invalid afterwards.
    unsafe fn destroy_error(&self, err: ErrorPtr);

    /// `tinystan_api_version`: writes three ints
    ///
    /// # Safety
    ///
    /// Each pointer must be a live allocation of at least four bytes.
    unsafe fn api_version(&self, major: RawPtr, minor: RawPtr, patch: RawPtr);

    /// `tinystan_stan_version`: writes three ints
    ///
    /// # Safety
    ///
    /// Each pointer must be a live allocation of at least four bytes.
    unsafe fn stan_version(&self, major: RawPtr, minor: RawPtr, patch: RawPtr);

    /// `tinystan_set_print_callback`; `None` detaches the current hook
    fn set_print_hook(&self, hook: Option<PrintHook>);
}
