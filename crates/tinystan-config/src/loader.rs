//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::run::{ModelSection, RunConfig};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Run file name searched for by the loader
pub const RUN_FILE_NAME: &str = "tinystan.toml";

/// Configuration loader
///
/// Loads configuration and merges it with proper precedence:
/// 1. Run file (./tinystan.toml, nearest ancestor, else ~/.tinystan/tinystan.toml) - lowest priority
/// 2. Environment variables (TINYSTAN_*) - overrides run file
/// 3. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Stop the upward search at this directory
    ceiling: Option<PathBuf>,

    /// Directory holding the per-user fallback run file
    user_dir: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Run configuration after environment overrides
    pub run: RunConfig,

    /// The run file that was loaded, if any
    pub source: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            ceiling: None,
            user_dir: Self::user_config_dir(),
        }
    }

    /// Do not search above `dir`
    pub fn with_ceiling(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ceiling = Some(dir.into());
        self
    }

    /// Read the fallback run file from `dir` instead of ~/.tinystan, or skip it
    pub fn with_user_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.user_dir = dir;
        self
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find tinystan.toml, then applies
    /// environment overrides.
    pub fn load_from_directory(&self, start_dir: &Path) -> ConfigResult<Config> {
        let (source, run) = self.find_run_config(start_dir)?;
        let run = self.apply_env_overrides(run)?;
        Ok(Config { run, source })
    }

    /// Load configuration from a specific run file
    pub fn load_from_file(&self, config_path: &Path) -> ConfigResult<Config> {
        let run = RunConfig::load_from_file(config_path)?;
        let run = self.apply_env_overrides(run)?;
        Ok(Config {
            run,
            source: Some(config_path.to_path_buf()),
        })
    }

    /// Find the run file by walking up the directory tree, falling back to
    /// the per-user one
    fn find_run_config(&self, start_dir: &Path) -> ConfigResult<(Option<PathBuf>, RunConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(RUN_FILE_NAME);

            if config_path.exists() {
                let run = RunConfig::load_from_file(&config_path)?;
                return Ok((Some(config_path), run));
            }

            if self.ceiling.as_deref() == Some(current.as_path()) {
                break;
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }

        match self.user_dir.as_ref().map(|dir| dir.join(RUN_FILE_NAME)) {
            Some(user_path) if user_path.exists() => {
                let run = RunConfig::load_from_file(&user_path)?;
                Ok((Some(user_path), run))
            }
            _ => Ok((None, RunConfig::default())),
        }
    }

    /// Apply environment variable overrides to the run config
    ///
    /// Recognized: TINYSTAN_LIBRARY, TINYSTAN_SEED, TINYSTAN_NUM_THREADS.
    /// Seed and thread count apply to both procedures.
    fn apply_env_overrides(&self, mut config: RunConfig) -> ConfigResult<RunConfig> {
        if let Ok(library) = env::var("TINYSTAN_LIBRARY") {
            config
                .model
                .get_or_insert_with(ModelSection::default)
                .library = Some(PathBuf::from(library));
        }

        if let Ok(seed) = env::var("TINYSTAN_SEED") {
            let seed = parse_env::<u32>("TINYSTAN_SEED", &seed)?;
            config.sample.seed = Some(seed);
            config.pathfinder.seed = Some(seed);
        }

        if let Ok(threads) = env::var("TINYSTAN_NUM_THREADS") {
            let threads = parse_env::<i32>("TINYSTAN_NUM_THREADS", &threads)?;
            config.sample.num_threads = Some(threads);
            config.pathfinder.num_threads = Some(threads);
        }

        Ok(config)
    }

    /// Per-user configuration directory (~/.tinystan), if there is a home
    pub fn user_config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".tinystan"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: name.to_string(),
        reason: format!("cannot parse '{}'", value),
    })
}

impl Config {
    /// Get the configured model library
    pub fn library(&self) -> Option<&Path> {
        self.run.library()
    }

    /// Get the configured data file
    pub fn data(&self) -> Option<&Path> {
        self.run.data()
    }

    /// Check if a run file was found
    pub fn has_run_file(&self) -> bool {
        self.source.is_some()
    }
}
