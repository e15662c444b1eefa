//! Error channel - turn a foreign error object into a `StanError`
//!
//! This is the only code that inspects or destroys error tokens.

use crate::error::StanError;
use crate::ffi::callbacks::PrintCapture;
use crate::ffi::marshal::decode_text;
use crate::ffi::module::ForeignModule;
use crate::ffi::types::{ErrorKind, ErrorPtr, ErrorSlot};

/// Destroys the error object when dropped, whatever happened while reading it
struct ErrorGuard<'m, M: ForeignModule + ?Sized> {
    module: &'m M,
    token: ErrorPtr,
}

impl<M: ForeignModule + ?Sized> Drop for ErrorGuard<'_, M> {
    fn drop(&mut self) {
        // SAFETY: the token was read from a slot filled by a failed call and
        // is destroyed nowhere else.
        unsafe { self.module.destroy_error(self.token) };
    }
}

/// Decode the error a failed call left in `slot` and destroy it
///
/// The message is also forwarded to the print capture, if one is installed.
///
/// # Safety
///
/// `slot` must be a live error slot that was passed to the call which just
/// failed.
pub unsafe fn decode_and_destroy<M: ForeignModule + ?Sized>(
    module: &M,
    slot: ErrorSlot,
    capture: Option<&PrintCapture>,
) -> StanError {
    let token = module.read_error_slot(slot);
    let (kind, message) = if token.is_null() {
        (
            ErrorKind::Generic,
            "Unknown error: the call failed without an error object".to_string(),
        )
    } else {
        let guard = ErrorGuard { module, token };
        let kind = ErrorKind::from_code(module.get_error_type(guard.token));
        let message = decode_text(module, module.get_error_message(guard.token));
        drop(guard);
        (kind, message)
    };

    let error = StanError::Foreign { kind, message };
    tracing::warn!(kind = kind.display_name(), "{}", error);
    if let Some(capture) = capture {
        capture.emit(&error.to_string());
    }
    error
}
