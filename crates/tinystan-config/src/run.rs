//! Run Configuration (tinystan.toml)
//!
//! Handles the run file that names a compiled model library, its data, and
//! the sampler / pathfinder settings to use with it.

use crate::overrides::{PathfinderOverrides, SamplerOverrides};
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Run configuration from tinystan.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Model library and data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelSection>,

    /// Sampler settings
    #[serde(default)]
    pub sample: SamplerOverrides,

    /// Pathfinder settings
    #[serde(default)]
    pub pathfinder: PathfinderOverrides,
}

/// `[model]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ModelSection {
    /// Compiled model library (path or short name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<PathBuf>,

    /// JSON data file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<PathBuf>,
}

impl RunConfig {
    /// Load a run configuration from a file
    ///
    /// Relative `library` and `data` paths are resolved against the
    /// directory containing the file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let mut config = Self::parse(&content).map_err(|e| match e {
            ConfigError::TomlParseError { error, .. } => ConfigError::TomlParseError {
                file: path.to_path_buf(),
                error,
            },
            other => other,
        })?;

        if let (Some(base), Some(model)) = (path.parent(), config.model.as_mut()) {
            model.library = model.library.take().map(|p| resolve_relative(base, p));
            model.data = model.data.take().map(|p| resolve_relative(base, p));
        }

        Ok(config)
    }

    /// Parse and validate run configuration text
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::TomlParseError {
            file: PathBuf::from("<string>"),
            error: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the run configuration
    ///
    /// Only checks what can be judged without the runtime defaults; the
    /// count preconditions are enforced when the overrides are merged.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(model) = &self.model {
            if let Some(library) = &model.library {
                if library.as_os_str().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "model.library".to_string(),
                        reason: "path cannot be empty".to_string(),
                    });
                }
            }
        }

        for (field, value) in [
            ("sample.delta", self.sample.delta),
            ("sample.stepsize", self.sample.stepsize),
            ("sample.init_radius", self.sample.init_radius),
            ("pathfinder.init_radius", self.pathfinder.init_radius),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(ConfigError::InvalidValue {
                        field: field.to_string(),
                        reason: format!("expected a non-negative number, got {}", v),
                    });
                }
            }
        }

        Ok(())
    }

    /// Model library, if configured
    pub fn library(&self) -> Option<&Path> {
        self.model.as_ref().and_then(|m| m.library.as_deref())
    }

    /// Data file, if configured
    pub fn data(&self) -> Option<&Path> {
        self.model.as_ref().and_then(|m| m.data.as_deref())
    }
}

fn resolve_relative(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() || base.as_os_str().is_empty() {
        path
    } else {
        base.join(path)
    }
}
