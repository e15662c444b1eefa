//! Model binding - one loaded module and its model handle lifecycle
//!
//! `StanModel` owns a `ForeignModule`. It is the only code that creates or
//! destroys model handles: `with_model` creates one per invocation and
//! destroys it on every exit path.

use crate::error::StanResult;
use crate::ffi::callbacks::{PrintCapture, PrintSink};
use crate::ffi::errors::decode_and_destroy;
use crate::ffi::marshal::encode_text;
use crate::ffi::module::ForeignModule;
use crate::ffi::safety::ForeignArena;
use crate::ffi::types::{ModelPtr, RawPtr};
use crate::params::ModelData;
use tracing::debug;

/// Destroys the model handle when the invocation scope ends
struct ModelGuard<'m, M: ForeignModule + ?Sized> {
    module: &'m M,
    model: ModelPtr,
}

impl<M: ForeignModule + ?Sized> Drop for ModelGuard<'_, M> {
    fn drop(&mut self) {
        debug!(model = ?self.model, "destroying model");
        // SAFETY: the handle was produced by `create_model` and only this
        // guard destroys it.
        unsafe { self.module.destroy_model(self.model) };
    }
}

/// A loaded TinyStan model
pub struct StanModel<M: ForeignModule> {
    module: M,
    separator: u8,
    capture: Option<PrintCapture>,
}

impl<M: ForeignModule> StanModel<M> {
    /// Bind a module; with a sink, foreign print output is routed to it
    pub fn load(module: M, print_sink: Option<PrintSink>) -> Self {
        let separator = module.separator_char();
        let capture = print_sink.map(PrintCapture::new);
        if let Some(capture) = &capture {
            module.set_print_hook(Some(capture.hook()));
        }
        debug!(
            separator = %char::from(separator).escape_default(),
            print_capture = capture.is_some(),
            "loaded module"
        );
        Self {
            module,
            separator,
            capture,
        }
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    /// Byte used to join several init records
    pub fn separator(&self) -> u8 {
        self.separator
    }

    pub(crate) fn capture(&self) -> Option<&PrintCapture> {
        self.capture.as_ref()
    }

    /// Print output accumulated and not yet cleared by the sink
    pub fn captured_output(&self) -> Option<String> {
        self.capture.as_ref().map(PrintCapture::accumulated)
    }

    /// Run `body` against a fresh model built from `data`
    ///
    /// `body` receives the handle and an arena for its own buffers. The
    /// arena is released first, then the handle is destroyed, whether
    /// `body` returns, fails or unwinds. A creation failure never reaches
    /// `body`.
    pub fn with_model<T, F>(&self, data: &ModelData, seed: u32, body: F) -> StanResult<T>
    where
        F: FnOnce(ModelPtr, &mut ForeignArena<'_, M>) -> StanResult<T>,
    {
        let text = data.to_text()?;
        let model = self.create_model(&text, seed)?;
        let guard = ModelGuard {
            module: &self.module,
            model,
        };
        let mut arena = ForeignArena::new(&self.module);
        body(guard.model, &mut arena)
    }

    fn create_model(&self, data: &str, seed: u32) -> StanResult<ModelPtr> {
        let mut arena = ForeignArena::new(&self.module);
        let data_ptr = encode_text(&mut arena, data)?;
        let err = arena.alloc_error_slot()?;
        debug!(bytes = data.len(), seed, "creating model");

        // SAFETY: `data_ptr` and `err` are live allocations owned by `arena`.
        let model = unsafe { self.module.create_model(data_ptr, seed, err) };
        arena.release(data_ptr.raw());

        if model.is_null() {
            // SAFETY: `err` is still live and was filled by the failed call.
            return Err(unsafe { decode_and_destroy(&self.module, err, self.capture()) });
        }
        debug!(model = ?model, "created model");
        Ok(model)
    }

    /// Version of Stan the module was built against
    pub fn stan_version(&self) -> StanResult<(i32, i32, i32)> {
        // SAFETY: each cell is a live four-byte allocation.
        self.read_triple(|module, major, minor, patch| unsafe {
            module.stan_version(major, minor, patch)
        })
    }

    /// Version of the TinyStan interface the module exports
    pub fn api_version(&self) -> StanResult<(i32, i32, i32)> {
        // SAFETY: each cell is a live four-byte allocation.
        self.read_triple(|module, major, minor, patch| unsafe {
            module.api_version(major, minor, patch)
        })
    }

    /// Stan version as `major.minor.patch`
    pub fn version(&self) -> StanResult<String> {
        let (major, minor, patch) = self.stan_version()?;
        Ok(format!("{}.{}.{}", major, minor, patch))
    }

    fn read_triple<F>(&self, call: F) -> StanResult<(i32, i32, i32)>
    where
        F: FnOnce(&M, RawPtr, RawPtr, RawPtr),
    {
        let mut arena = ForeignArena::new(&self.module);
        let major = arena.alloc_i32()?;
        let minor = arena.alloc_i32()?;
        let patch = arena.alloc_i32()?;
        call(&self.module, major, minor, patch);

        // SAFETY: the cells are live until `arena` drops at the end of scope.
        let triple = unsafe {
            (
                self.module.read_i32(major),
                self.module.read_i32(minor),
                self.module.read_i32(patch),
            )
        };
        Ok(triple)
    }
}

impl<M: ForeignModule> Drop for StanModel<M> {
    fn drop(&mut self) {
        if self.capture.is_some() {
            self.module.set_print_hook(None);
        }
    }
}
