//! Dynamic library loading for native TinyStan models
//!
//! Provides cross-platform loading of compiled model libraries using
//! `libloading`, and `DylibModule`, the `ForeignModule` backed by one.
//! Handles platform-specific library naming conventions and search paths.

use crate::ffi::callbacks::LineSplitter;
use crate::ffi::module::{ForeignModule, PathfinderArgs, PrintHook, SampleArgs};
use crate::ffi::types::{CStrPtr, ErrorPtr, ErrorSlot, F64Ptr, ModelPtr, RawPtr};
use libloading::Library;
use std::alloc::{alloc, dealloc, Layout};
use std::ffi::{c_void, CStr};
use std::os::raw::{c_char, c_int, c_uint};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Library loading errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    /// Library file not found in search paths
    #[error("Library not found: {0}")]
    LibraryNotFound(String),
    /// Symbol not found in library
    #[error("Symbol '{symbol}' not found in library '{library}'")]
    SymbolNotFound { library: String, symbol: String },
    /// Failed to load library
    #[error("Failed to load library: {0}")]
    LoadFailed(String),
}

/// Resolves model library names to files
pub struct LibraryLoader {
    /// Platform-specific library search paths
    search_paths: Vec<PathBuf>,
}

impl LibraryLoader {
    /// Create a new library loader with default search paths
    pub fn new() -> Self {
        Self {
            search_paths: Self::default_search_paths(),
        }
    }

    /// Get platform-specific default library search paths
    ///
    /// The current working directory comes first, then the system
    /// library directories.
    fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        #[cfg(target_os = "linux")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/lib"));

            if cfg!(target_pointer_width = "64") {
                paths.push(PathBuf::from("/usr/lib64"));
                paths.push(PathBuf::from("/lib64"));
            }
        }

        #[cfg(target_os = "macos")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/opt/homebrew/lib"));
        }

        #[cfg(target_os = "windows")]
        {
            if let Ok(system_root) = std::env::var("SystemRoot") {
                paths.push(PathBuf::from(format!("{}\\System32", system_root)));
            }
        }

        if let Ok(cwd) = std::env::current_dir() {
            paths.insert(0, cwd);
        }

        paths
    }

    /// File names tried for a short library name, in priority order
    ///
    /// TinyStan builds `<model>_model.so`, so `bernoulli` also matches
    /// `bernoulli_model.so`.
    fn candidate_file_names(name: &str) -> Vec<String> {
        let extensions: &[&str] = if cfg!(target_os = "windows") {
            &["dll"]
        } else if cfg!(target_os = "macos") {
            &["dylib", "so"]
        } else {
            &["so"]
        };

        let mut names = Vec::new();
        for ext in extensions {
            names.push(format!("{}_model.{}", name, ext));
            names.push(format!("lib{}.{}", name, ext));
            names.push(format!("{}.{}", name, ext));
        }
        names
    }

    /// Resolve a library name or path to an existing file
    pub fn resolve_library_path(&self, name: &str) -> Option<PathBuf> {
        let path = Path::new(name);
        if path.is_file() {
            return Some(path.to_path_buf());
        }

        let candidates = Self::candidate_file_names(name);
        self.search_paths
            .iter()
            .flat_map(|dir| candidates.iter().map(move |file| dir.join(file)))
            .find(|full_path| full_path.is_file())
    }

    /// Add a custom search path (prepended to search list)
    pub fn add_search_path(&mut self, path: PathBuf) {
        self.search_paths.insert(0, path);
    }

    /// Open a compiled model library
    ///
    /// # Safety
    ///
    /// Loading a library runs its initialization code, and every
    /// `tinystan_*` symbol is trusted to have the TinyStan C signature.
    pub unsafe fn open(&self, name: &str) -> Result<DylibModule, LoadError> {
        let path = self
            .resolve_library_path(name)
            .ok_or_else(|| LoadError::LibraryNotFound(name.to_string()))?;
        tracing::debug!(path = %path.display(), "loading model library");
        DylibModule::open(&path)
    }
}

impl Default for LibraryLoader {
    fn default() -> Self {
        Self::new()
    }
}

type CreateModelFn = unsafe extern "C" fn(*const c_char, c_uint, *mut *mut c_void) -> *mut c_void;
type DestroyModelFn = unsafe extern "C" fn(*mut c_void);
type ParamNamesFn = unsafe extern "C" fn(*const c_void) -> *const c_char;
type NumFreeParamsFn = unsafe extern "C" fn(*const c_void) -> usize;
type SeparatorCharFn = unsafe extern "C" fn() -> c_char;
#[rustfmt::skip]
type SampleFn = unsafe extern "C" fn(
    *const c_void, usize, *const c_char, c_uint, c_uint, f64, c_int, c_int, c_int, *const f64,
    bool, f64, f64, f64, f64, c_uint, c_uint, c_uint, bool, f64, f64, c_int, c_int, c_int,
    *mut f64, usize, *mut f64, *mut *mut c_void,
) -> c_int;
#[rustfmt::skip]
type PathfinderFn = unsafe extern "C" fn(
    *const c_void, usize, *const c_char, c_uint, c_uint, f64, c_int, c_int, f64, f64, f64,
    f64, f64, f64, c_int, c_int, c_int, bool, bool, c_int, c_int, *mut f64, usize,
    *mut *mut c_void,
) -> c_int;
type ErrorMessageFn = unsafe extern "C" fn(*const c_void) -> *const c_char;
type ErrorTypeFn = unsafe extern "C" fn(*const c_void) -> c_int;
type DestroyErrorFn = unsafe extern "C" fn(*mut c_void);
type VersionFn = unsafe extern "C" fn(*mut c_int, *mut c_int, *mut c_int);
type PrintCallback = extern "C" fn(*const c_char, usize, bool);
type SetPrintCallbackFn = unsafe extern "C" fn(Option<PrintCallback>);

/// Bytes in front of every `malloc` block; holds the block size
const ALLOC_HEADER: usize = 16;

/// The module that currently receives native print output
struct RouteOwner {
    id: u64,
    /// The owner's `tinystan_set_print_callback`, valid while the owner is loaded
    detach: SetPrintCallbackFn,
    splitter: LineSplitter,
}

/// Where the print trampoline delivers output
///
/// The C print callback carries no user data, so one route serves every
/// loaded library. Only the module that installed the current hook may
/// clear it.
struct PrintRoute {
    owner: Option<RouteOwner>,
}

impl PrintRoute {
    const fn new() -> Self {
        Self { owner: None }
    }

    /// Take the route, handing back the previous owner
    fn install(&mut self, owner: RouteOwner) -> Option<RouteOwner> {
        self.owner.replace(owner)
    }

    /// Give the route up if module `id` still owns it
    fn release(&mut self, id: u64) -> Option<RouteOwner> {
        match &self.owner {
            Some(owner) if owner.id == id => self.owner.take(),
            _ => None,
        }
    }

    fn owner_id(&self) -> Option<u64> {
        self.owner.as_ref().map(|owner| owner.id)
    }

    fn feed(&mut self, bytes: &[u8]) {
        if let Some(owner) = self.owner.as_mut() {
            owner.splitter.feed(bytes);
        }
    }
}

static PRINT_ROUTE: Mutex<PrintRoute> = Mutex::new(PrintRoute::new());

static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(1);

extern "C" fn print_trampoline(msg: *const c_char, len: usize, _is_error: bool) {
    if msg.is_null() {
        return;
    }
    // SAFETY: the library passes `len` readable bytes at `msg`.
    let bytes = unsafe { std::slice::from_raw_parts(msg.cast::<u8>(), len) };
    PRINT_ROUTE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .feed(bytes);
}

/// A native TinyStan model library
pub struct DylibModule {
    create_model: CreateModelFn,
    destroy_model: DestroyModelFn,
    param_names: ParamNamesFn,
    num_free_params: NumFreeParamsFn,
    separator_char: SeparatorCharFn,
    sample: SampleFn,
    pathfinder: PathfinderFn,
    error_message: ErrorMessageFn,
    error_type: ErrorTypeFn,
    destroy_error: DestroyErrorFn,
    api_version: VersionFn,
    stan_version: VersionFn,
    set_print_callback: SetPrintCallbackFn,
    /// Identifies this module on the print route
    id: u64,
    path: PathBuf,
    /// Keeps every function pointer above valid
    _library: Library,
}

impl DylibModule {
    /// Load the library at `path` and resolve every TinyStan symbol
    ///
    /// # Safety
    ///
    /// See [`LibraryLoader::open`].
    pub unsafe fn open(path: &Path) -> Result<Self, LoadError> {
        let library = Library::new(path).map_err(|e| LoadError::LoadFailed(e.to_string()))?;
        let library_name = path.display().to_string();

        macro_rules! symbol {
            ($name:literal) => {{
                let sym = library
                    .get(concat!($name, "\0").as_bytes())
                    .map_err(|_| LoadError::SymbolNotFound {
                        library: library_name.clone(),
                        symbol: $name.to_string(),
                    })?;
                *sym
            }};
        }

        Ok(Self {
            create_model: symbol!("tinystan_create_model"),
            destroy_model: symbol!("tinystan_destroy_model"),
            param_names: symbol!("tinystan_model_param_names"),
            num_free_params: symbol!("tinystan_model_num_free_params"),
            separator_char: symbol!("tinystan_separator_char"),
            sample: symbol!("tinystan_sample"),
            pathfinder: symbol!("tinystan_pathfinder"),
            error_message: symbol!("tinystan_get_error_message"),
            error_type: symbol!("tinystan_get_error_type"),
            destroy_error: symbol!("tinystan_destroy_error"),
            api_version: symbol!("tinystan_api_version"),
            stan_version: symbol!("tinystan_stan_version"),
            set_print_callback: symbol!("tinystan_set_print_callback"),
            id: NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed),
            path: path.to_path_buf(),
            _library: library,
        })
    }

    /// File the module was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn void_ptr(addr: usize) -> *mut c_void {
    addr as *mut c_void
}

fn err_ptr(slot: ErrorSlot) -> *mut *mut c_void {
    slot.ptr().addr() as *mut *mut c_void
}

impl ForeignModule for DylibModule {
    fn malloc(&self, n_bytes: usize) -> RawPtr {
        let Some(total) = n_bytes.checked_add(ALLOC_HEADER) else {
            return RawPtr::NULL;
        };
        let Ok(layout) = Layout::from_size_align(total, ALLOC_HEADER) else {
            return RawPtr::NULL;
        };
        // SAFETY: `layout` has a non-zero size.
        let base = unsafe { alloc(layout) };
        if base.is_null() {
            return RawPtr::NULL;
        }
        // SAFETY: the block is at least ALLOC_HEADER bytes and suitably aligned.
        unsafe { base.cast::<usize>().write(total) };
        RawPtr::from_addr(base as usize + ALLOC_HEADER)
    }

    unsafe fn free(&self, ptr: RawPtr) {
        if ptr.is_null() {
            return;
        }
        let base = (ptr.addr() - ALLOC_HEADER) as *mut u8;
        let total = base.cast::<usize>().read();
        dealloc(base, Layout::from_size_align_unchecked(total, ALLOC_HEADER));
    }

    unsafe fn write_bytes(&self, dst: RawPtr, bytes: &[u8]) {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.addr() as *mut u8, bytes.len());
    }

    unsafe fn read_f64s(&self, src: F64Ptr, count: usize) -> Vec<f64> {
        if count == 0 {
            return Vec::new();
        }
        std::slice::from_raw_parts(src.addr() as *const f64, count).to_vec()
    }

    unsafe fn read_i32(&self, src: RawPtr) -> i32 {
        (src.addr() as *const c_int).read()
    }

    unsafe fn read_error_slot(&self, slot: ErrorSlot) -> ErrorPtr {
        ErrorPtr::from_addr(err_ptr(slot).read() as usize)
    }

    unsafe fn read_cstr(&self, s: CStrPtr) -> Vec<u8> {
        CStr::from_ptr(s.addr() as *const c_char).to_bytes().to_vec()
    }

    unsafe fn create_model(&self, data: CStrPtr, seed: u32, err: ErrorSlot) -> ModelPtr {
        let model = (self.create_model)(data.addr() as *const c_char, seed, err_ptr(err));
        ModelPtr::from_addr(model as usize)
    }

    unsafe fn destroy_model(&self, model: ModelPtr) {
        (self.destroy_model)(void_ptr(model.addr()))
    }

    unsafe fn model_param_names(&self, model: ModelPtr) -> CStrPtr {
        CStrPtr::from_addr((self.param_names)(void_ptr(model.addr())) as usize)
    }

    unsafe fn model_num_free_params(&self, model: ModelPtr) -> usize {
        (self.num_free_params)(void_ptr(model.addr()))
    }

    fn separator_char(&self) -> u8 {
        // SAFETY: takes no arguments and returns a constant.
        unsafe { (self.separator_char)() as u8 }
    }

    unsafe fn sample(&self, a: &SampleArgs) -> i32 {
        (self.sample)(
            void_ptr(a.model.addr()),
            a.num_chains,
            a.inits.addr() as *const c_char,
            a.seed,
            a.id,
            a.init_radius,
            a.num_warmup,
            a.num_samples,
            a.metric,
            a.init_inv_metric.addr() as *const f64,
            a.adapt,
            a.delta,
            a.gamma,
            a.kappa,
            a.t0,
            a.init_buffer,
            a.term_buffer,
            a.window,
            a.save_warmup,
            a.stepsize,
            a.stepsize_jitter,
            a.max_depth,
            a.refresh,
            a.num_threads,
            a.out.ptr().addr() as *mut f64,
            a.out.len(),
            a.metric_out.ptr().addr() as *mut f64,
            err_ptr(a.err),
        )
    }

    unsafe fn pathfinder(&self, a: &PathfinderArgs) -> i32 {
        (self.pathfinder)(
            void_ptr(a.model.addr()),
            a.num_paths,
            a.inits.addr() as *const c_char,
            a.seed,
            a.id,
            a.init_radius,
            a.num_draws,
            a.max_history_size,
            a.init_alpha,
            a.tol_obj,
            a.tol_rel_obj,
            a.tol_grad,
            a.tol_rel_grad,
            a.tol_param,
            a.num_iterations,
            a.num_elbo_draws,
            a.num_multi_draws,
            a.calculate_lp,
            a.psis_resample,
            a.refresh,
            a.num_threads,
            a.out.ptr().addr() as *mut f64,
            a.out.len(),
            err_ptr(a.err),
        )
    }

    unsafe fn get_error_message(&self, err: ErrorPtr) -> CStrPtr {
        CStrPtr::from_addr((self.error_message)(void_ptr(err.addr())) as usize)
    }

    unsafe fn get_error_type(&self, err: ErrorPtr) -> i32 {
        (self.error_type)(void_ptr(err.addr()))
    }

    unsafe fn destroy_error(&self, err: ErrorPtr) {
        (self.destroy_error)(void_ptr(err.addr()))
    }

    unsafe fn api_version(&self, major: RawPtr, minor: RawPtr, patch: RawPtr) {
        (self.api_version)(
            major.addr() as *mut c_int,
            minor.addr() as *mut c_int,
            patch.addr() as *mut c_int,
        )
    }

    unsafe fn stan_version(&self, major: RawPtr, minor: RawPtr, patch: RawPtr) {
        (self.stan_version)(
            major.addr() as *mut c_int,
            minor.addr() as *mut c_int,
            patch.addr() as *mut c_int,
        )
    }

    fn set_print_hook(&self, hook: Option<PrintHook>) {
        let mut route = PRINT_ROUTE.lock().unwrap_or_else(PoisonError::into_inner);
        // Dropped after the lock, since a splitter flushes into its hook.
        let replaced = match hook {
            Some(hook) => {
                let previous = route.install(RouteOwner {
                    id: self.id,
                    detach: self.set_print_callback,
                    splitter: LineSplitter::new(hook),
                });
                if let Some(previous) = previous.as_ref().filter(|p| p.id != self.id) {
                    tracing::debug!(module = previous.id, "print route taken over");
                    // SAFETY: an owner releases the route before its library
                    // unloads, so `detach` is still valid.
                    unsafe { (previous.detach)(None) };
                }
                // SAFETY: the trampoline matches TINYSTAN_PRINT_CALLBACK.
                unsafe { (self.set_print_callback)(Some(print_trampoline)) };
                previous
            }
            None => {
                // SAFETY: a null callback detaches printing.
                unsafe { (self.set_print_callback)(None) };
                route.release(self.id)
            }
        };
        drop(route);
        drop(replaced);
    }
}

impl Drop for DylibModule {
    fn drop(&mut self) {
        let owns_route = PRINT_ROUTE
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .owner_id()
            == Some(self.id);
        if owns_route {
            self.set_print_hook(None);
        }
    }
}
