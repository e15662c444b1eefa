//! Scoped ownership of foreign allocations
//!
//! `ForeignArena` is the only code that calls `ForeignModule::free`. Every
//! buffer it hands out is released exactly once: either early through
//! `release`, or when the arena goes out of scope (normal return, `?`
//! propagation or unwinding).

use crate::error::{StanError, StanResult};
use crate::ffi::module::ForeignModule;
use crate::ffi::types::{ErrorSlot, F64Buffer, RawPtr, F64_BYTES, I32_BYTES, PTR_BYTES};

/// Deferred-release list of foreign buffers bound to one scope
pub struct ForeignArena<'m, M: ForeignModule + ?Sized> {
    module: &'m M,
    live: Vec<RawPtr>,
}

impl<'m, M: ForeignModule + ?Sized> ForeignArena<'m, M> {
    pub fn new(module: &'m M) -> Self {
        Self {
            module,
            live: Vec::new(),
        }
    }

    /// The module this arena allocates from
    pub fn module(&self) -> &'m M {
        self.module
    }

    /// Obtain `n_bytes` of foreign memory and take ownership of it
    pub fn acquire(&mut self, n_bytes: usize) -> StanResult<RawPtr> {
        let ptr = self.module.malloc(n_bytes);
        if ptr.is_null() {
            return Err(StanError::Allocation { bytes: n_bytes });
        }
        self.live.push(ptr);
        Ok(ptr)
    }

    /// Buffer for `count` doubles
    pub fn alloc_f64s(&mut self, count: usize) -> StanResult<F64Buffer> {
        let bytes = count
            .checked_mul(F64_BYTES)
            .ok_or(StanError::Allocation { bytes: usize::MAX })?;
        let ptr = self.acquire(bytes)?;
        Ok(F64Buffer::new(ptr.as_f64(), count))
    }

    /// Cell for one `int` out-parameter
    pub fn alloc_i32(&mut self) -> StanResult<RawPtr> {
        self.acquire(I32_BYTES)
    }

    /// Cell a failing call writes its error token into
    ///
    /// Zeroed so a call that fails without reporting leaves a null token.
    pub fn alloc_error_slot(&mut self) -> StanResult<ErrorSlot> {
        let ptr = self.acquire(PTR_BYTES)?;
        // SAFETY: `ptr` was just allocated with PTR_BYTES bytes.
        unsafe { self.module.write_bytes(ptr, &[0u8; PTR_BYTES]) };
        Ok(ErrorSlot::new(ptr))
    }

    /// Free one registered buffer before the scope ends
    ///
    /// Unknown or already-released pointers are ignored, so a buffer can
    /// never be freed twice through the arena.
    pub fn release(&mut self, ptr: RawPtr) {
        if let Some(index) = self.live.iter().position(|p| *p == ptr) {
            let ptr = self.live.swap_remove(index);
            // SAFETY: `ptr` came from `malloc` on this module and was still registered.
            unsafe { self.module.free(ptr) };
        }
    }

    /// Free every registered buffer
    pub fn release_all(&mut self) {
        for ptr in self.live.drain(..) {
            // SAFETY: each registered pointer came from `malloc` and is freed once here.
            unsafe { self.module.free(ptr) };
        }
    }

    /// Number of buffers still owned by the arena
    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

impl<M: ForeignModule + ?Sized> Drop for ForeignArena<'_, M> {
    fn drop(&mut self) {
        if !self.live.is_empty() {
            tracing::trace!(count = self.live.len(), "releasing foreign buffers");
        }
        self.release_all();
    }
}
