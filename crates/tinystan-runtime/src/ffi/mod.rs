//! Foreign Function Interface (FFI) infrastructure
//!
//! Everything that touches the TinyStan function table lives here:
//! - Typed tokens for foreign addresses (`types`)
//! - The function table itself (`module`) and its native backend (`loader`)
//! - Scoped ownership of foreign buffers (`safety`)
//! - String and matrix marshaling (`marshal`)
//! - Foreign error objects (`errors`) and print output (`callbacks`)
//!
//! # Safety
//!
//! FFI operations involve `unsafe` code and careful memory management.
//! All unsafe code is isolated in this module with safe wrappers.

pub mod callbacks;
pub mod errors;
pub mod loader;
pub mod marshal;
pub mod module;
pub mod safety;
pub mod types;

pub use callbacks::{LineSplitter, PrintCapture, PrintSink};
pub use loader::{DylibModule, LibraryLoader, LoadError};
pub use module::{ForeignModule, PathfinderArgs, PrintHook, SampleArgs};
pub use safety::ForeignArena;
pub use types::{CStrPtr, ErrorKind, ErrorPtr, ErrorSlot, F64Buffer, F64Ptr, ModelPtr, RawPtr};
