//! TinyStan Runtime - memory-safe binding over the TinyStan function table
//!
//! This library provides:
//! - Scoped ownership of foreign memory and model handles
//! - Marshaling of model data, initial values and draw buffers
//! - Decoding of foreign error objects
//! - Print output capture
//! - The `sample` and `pathfinder` inference procedures

/// TinyStan runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Public API modules
pub mod draws;
pub mod error;
pub mod ffi;
pub mod inference;
pub mod model;
pub mod params;

// Re-export commonly used types
pub use draws::{MetricOutput, StanDraws};
pub use error::{StanError, StanResult};
pub use ffi::{DylibModule, ForeignModule, LibraryLoader, LoadError, PrintSink};
pub use model::StanModel;
pub use params::{
    ModelData, PathfinderParams, SamplerParams, HMC_SAMPLER_VARIABLES, PATHFINDER_VARIABLES,
};
pub use tinystan_config::{Inits, Metric, PathfinderOverrides, SamplerOverrides};
