//! TinyStan Configuration System
//!
//! Provides the configuration records consumed by the TinyStan binding:
//! - Partial overrides for the two inference procedures (sampling, pathfinder)
//! - Run files (tinystan.toml)
//! - Configuration precedence and environment overrides
//!
//! # Configuration Hierarchy
//!
//! Settings are merged in the following order (later overrides earlier):
//! 1. Built-in defaults (owned by the runtime)
//! 2. Run file (./tinystan.toml, searched upward, else ~/.tinystan/tinystan.toml)
//! 3. Environment variables (TINYSTAN_*)
//! 4. CLI flags
//!
//! # Example
//!
//! ```no_run
//! use tinystan_config::ConfigLoader;
//! use std::path::Path;
//!
//! let loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("{:?}", config.run.sample.num_chains);
//! ```

pub mod loader;
pub mod overrides;
pub mod run;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

pub use loader::{Config, ConfigLoader};
pub use overrides::{Inits, Metric, PathfinderOverrides, SamplerOverrides};
pub use run::{ModelSection, RunConfig};
