//! FFI type system - typed tokens for the foreign boundary
//!
//! Every address that crosses the boundary is an integer-sized token. Each
//! resource kind gets its own newtype so the compiler rejects passing, say,
//! an error token where a model handle is expected:
//! - `RawPtr`: untyped foreign allocation (malloc/free)
//! - `CStrPtr`: null-terminated byte string
//! - `F64Ptr`: array of doubles
//! - `ModelPtr`: model instance handle
//! - `ErrorPtr`: error object token
//!
//! `ErrorSlot` and `F64Buffer` pair an allocation with what it holds.

use std::fmt;

macro_rules! foreign_token {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// The null token
            pub const NULL: $name = $name(0);

            /// Wrap a foreign address
            pub const fn from_addr(addr: usize) -> Self {
                $name(addr)
            }

            /// The foreign address
            pub const fn addr(self) -> usize {
                self.0
            }

            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }
    };
}

foreign_token!(
    /// Untyped foreign allocation, as returned by `malloc`
    RawPtr
);
foreign_token!(
    /// Null-terminated byte string in foreign memory
    CStrPtr
);
foreign_token!(
    /// Array of `f64` in foreign memory
    F64Ptr
);
foreign_token!(
    /// Opaque model instance living on the far side of the boundary
    ModelPtr
);
foreign_token!(
    /// Opaque error object produced by a failed foreign call
    ErrorPtr
);

impl RawPtr {
    /// Reinterpret an allocation as a C string
    pub const fn as_cstr(self) -> CStrPtr {
        CStrPtr(self.0)
    }

    /// Reinterpret an allocation as an array of doubles
    pub const fn as_f64(self) -> F64Ptr {
        F64Ptr(self.0)
    }
}

impl CStrPtr {
    /// The allocation behind the string
    pub const fn raw(self) -> RawPtr {
        RawPtr(self.0)
    }
}

/// Pointer-sized cell that a failing call writes its `ErrorPtr` into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorSlot(RawPtr);

impl ErrorSlot {
    pub const fn new(ptr: RawPtr) -> Self {
        ErrorSlot(ptr)
    }

    pub const fn ptr(self) -> RawPtr {
        self.0
    }
}

/// Foreign array of doubles with a known element count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct F64Buffer {
    ptr: F64Ptr,
    len: usize,
}

impl F64Buffer {
    pub const fn new(ptr: F64Ptr, len: usize) -> Self {
        Self { ptr, len }
    }

    /// A null buffer (passed where an output is not requested)
    pub const fn null() -> Self {
        Self {
            ptr: F64Ptr::NULL,
            len: 0,
        }
    }

    pub const fn ptr(self) -> F64Ptr {
        self.ptr
    }

    pub const fn len(self) -> usize {
        self.len
    }

    pub const fn is_empty(self) -> bool {
        self.len == 0
    }

    pub const fn raw(self) -> RawPtr {
        RawPtr(self.ptr.0)
    }
}

/// Category of a foreign error object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Generic,
    Config,
    Interrupt,
}

impl ErrorKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ErrorKind::Config,
            2 => ErrorKind::Interrupt,
            _ => ErrorKind::Generic,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ErrorKind::Generic => "generic",
            ErrorKind::Config => "config",
            ErrorKind::Interrupt => "interrupt",
        }
    }
}

/// Size in bytes of one `f64` element
pub const F64_BYTES: usize = std::mem::size_of::<f64>();

/// Size in bytes of one `int` out-parameter
pub const I32_BYTES: usize = std::mem::size_of::<i32>();

/// Size in bytes of a foreign pointer cell
pub const PTR_BYTES: usize = std::mem::size_of::<usize>();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_tokens() {
        assert!(RawPtr::NULL.is_null());
        assert!(ModelPtr::NULL.is_null());
        assert!(!ErrorPtr::from_addr(8).is_null());
    }

    #[test]
    fn test_reinterpret_keeps_address() {
        let raw = RawPtr::from_addr(0x40);
        assert_eq!(raw.as_cstr().addr(), 0x40);
        assert_eq!(raw.as_f64().addr(), 0x40);
    }

    #[test]
    fn test_f64_buffer_raw_roundtrip() {
        let buffer = F64Buffer::new(F64Ptr::from_addr(0x80), 12);
        assert_eq!(buffer.raw(), RawPtr::from_addr(0x80));
        assert_eq!(buffer.len(), 12);
        assert!(F64Buffer::null().is_empty());
    }

    #[test]
    fn test_error_kind_codes() {
        assert_eq!(ErrorKind::from_code(0), ErrorKind::Generic);
        assert_eq!(ErrorKind::from_code(1), ErrorKind::Config);
        assert_eq!(ErrorKind::from_code(2), ErrorKind::Interrupt);
        assert_eq!(ErrorKind::from_code(17), ErrorKind::Generic);
    }

    #[test]
    fn test_debug_shows_kind() {
        assert_eq!(format!("{:?}", ModelPtr::from_addr(16)), "ModelPtr(0x10)");
    }
}
