//! Subcommands and the plumbing they share
//!
//! Precedence for every setting: command-line flag, then tinystan.toml (with
//! its TINYSTAN_* environment overrides), then the runtime's defaults.

pub mod pathfinder;
pub mod sample;
pub mod version;

use anyhow::{bail, Context, Result};
use clap::Args;
use std::fs;
use std::path::{Path, PathBuf};
use tinystan_config::{Config, ConfigLoader};
use tinystan_runtime::{
    DylibModule, Inits, LibraryLoader, Metric, ModelData, PathfinderOverrides, PrintSink,
    SamplerOverrides, StanDraws, StanModel,
};

/// Arguments shared by `sample` and `pathfinder`
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Compiled model library (path or short name)
    pub library: Option<String>,

    /// JSON data file
    #[arg(long, short = 'd')]
    pub data: Option<PathBuf>,

    /// JSON file with initial values (one object, or an array with one per chain/path)
    #[arg(long)]
    pub inits: Option<PathBuf>,

    /// Run file to read instead of searching for tinystan.toml
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Random seed (drawn at random when unset)
    #[arg(long)]
    pub seed: Option<u32>,

    /// Worker threads (-1 = all cores)
    #[arg(long, allow_negative_numbers = true)]
    pub threads: Option<i32>,

    /// Output file for the draws (JSON). Defaults to stdout.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

/// Sampler flags
#[derive(Args, Debug, Clone, Default)]
pub struct SampleFlags {
    /// Number of chains
    #[arg(long)]
    pub chains: Option<usize>,

    /// Warmup iterations per chain
    #[arg(long)]
    pub warmup: Option<i32>,

    /// Sampling iterations per chain
    #[arg(long)]
    pub samples: Option<i32>,

    /// Mass matrix (unit, dense, diagonal)
    #[arg(long)]
    pub metric: Option<Metric>,

    /// Also return the adapted inverse metric
    #[arg(long)]
    pub save_metric: bool,

    /// Keep warmup draws in the output
    #[arg(long)]
    pub save_warmup: bool,

    /// Progress is printed every N iterations (0 = never)
    #[arg(long)]
    pub refresh: Option<i32>,
}

impl SampleFlags {
    /// The flags as the topmost override layer
    pub fn overrides(&self, run: &RunArgs) -> Result<SamplerOverrides> {
        Ok(SamplerOverrides {
            num_chains: self.chains,
            seed: run.seed,
            num_warmup: self.warmup,
            num_samples: self.samples,
            metric: self.metric,
            save_metric: self.save_metric.then_some(true),
            save_warmup: self.save_warmup.then_some(true),
            refresh: self.refresh,
            num_threads: run.threads,
            inits: read_inits(run.inits.as_deref())?,
            ..Default::default()
        })
    }
}

/// Pathfinder flags
#[derive(Args, Debug, Clone, Default)]
pub struct PathfinderFlags {
    /// Number of single-path runs
    #[arg(long)]
    pub paths: Option<usize>,

    /// Draws per path
    #[arg(long)]
    pub draws: Option<i32>,

    /// Draws kept after importance resampling
    #[arg(long)]
    pub multi_draws: Option<i32>,

    /// Return every path's draws instead of resampling them
    #[arg(long)]
    pub no_psis: bool,

    /// Skip computing lp__ for the approximate draws
    #[arg(long)]
    pub no_lp: bool,

    /// Progress is printed every N iterations (0 = never)
    #[arg(long)]
    pub refresh: Option<i32>,
}

impl PathfinderFlags {
    /// The flags as the topmost override layer
    pub fn overrides(&self, run: &RunArgs) -> Result<PathfinderOverrides> {
        Ok(PathfinderOverrides {
            num_paths: self.paths,
            seed: run.seed,
            num_draws: self.draws,
            num_multi_draws: self.multi_draws,
            psis_resample: self.no_psis.then_some(false),
            calculate_lp: self.no_lp.then_some(false),
            refresh: self.refresh,
            num_threads: run.threads,
            inits: read_inits(run.inits.as_deref())?,
            ..Default::default()
        })
    }
}

/// Load an explicit run file, or search for tinystan.toml from the working directory
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let loader = ConfigLoader::new();
    let config = match path {
        Some(path) => loader
            .load_from_file(path)
            .with_context(|| format!("Failed to load run file: {}", path.display()))?,
        None => loader.load_from_directory(&std::env::current_dir()?)?,
    };
    if let Some(source) = &config.source {
        tracing::debug!(path = %source.display(), "using run file");
    }
    Ok(config)
}

/// Library named on the command line, else in the run file
pub fn resolve_library(cli: Option<&str>, config: &Config) -> Result<String> {
    if let Some(library) = cli {
        return Ok(library.to_string());
    }
    match config.library() {
        Some(path) => Ok(path.to_string_lossy().into_owned()),
        None => bail!(
            "No model library given: pass one, set TINYSTAN_LIBRARY, or add [model] library to tinystan.toml"
        ),
    }
}

/// Model data from the command line, else from the run file, else empty
pub fn read_data(cli: Option<&Path>, config: &Config) -> Result<ModelData> {
    match cli.or_else(|| config.data()) {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read data file: {}", path.display()))?;
            Ok(ModelData::Text(text))
        }
        None => Ok(ModelData::default()),
    }
}

/// Initial values from a JSON file
pub fn read_inits(path: Option<&Path>) -> Result<Option<Inits>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read inits file: {}", path.display()))?;
    let inits = serde_json::from_str(&text)
        .with_context(|| format!("Invalid JSON in inits file: {}", path.display()))?;
    Ok(Some(inits))
}

/// Open a model library, streaming its print output to stderr
pub fn open_model(library: &str) -> Result<StanModel<DylibModule>> {
    let loader = LibraryLoader::new();
    // SAFETY: the library is expected to be a TinyStan model build; its
    // symbols are resolved against the TinyStan C signatures.
    let module = unsafe { loader.open(library) }
        .with_context(|| format!("Failed to load model library: {}", library))?;
    tracing::info!(path = %module.path().display(), "model library loaded");

    let sink: PrintSink = Box::new(|output: &mut String| {
        eprint!("{}", output);
        output.clear();
    });
    Ok(StanModel::load(module, Some(sink)))
}

/// Log the mean of every variable
pub fn log_summary(draws: &StanDraws) {
    for name in &draws.param_names {
        if let Some(mean) = draws.mean(name) {
            tracing::info!(variable = %name, mean, "summary");
        }
    }
}

/// Write the draws as pretty JSON to `output`, or stdout
pub fn write_draws(draws: &StanDraws, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(draws)?;
    match output {
        Some(path) => {
            fs::write(path, json)
                .with_context(|| format!("Failed to write output file: {}", path.display()))?;
            tracing::info!(path = %path.display(), draws = draws.num_draws(), "draws written");
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn empty_config() -> Config {
        Config {
            run: Default::default(),
            source: None,
        }
    }

    #[test]
    fn test_sample_flags_only_override_what_was_given() {
        let run = RunArgs {
            seed: Some(42),
            ..Default::default()
        };
        let flags = SampleFlags {
            chains: Some(2),
            save_metric: true,
            ..Default::default()
        };
        let overrides = flags.overrides(&run).unwrap();

        assert_eq!(overrides.num_chains, Some(2));
        assert_eq!(overrides.seed, Some(42));
        assert_eq!(overrides.save_metric, Some(true));
        assert_eq!(overrides.save_warmup, None);
        assert_eq!(overrides.num_samples, None);
    }

    #[test]
    fn test_pathfinder_negative_flags() {
        let flags = PathfinderFlags {
            no_psis: true,
            ..Default::default()
        };
        let overrides = flags.overrides(&RunArgs::default()).unwrap();
        assert_eq!(overrides.psis_resample, Some(false));
        assert_eq!(overrides.calculate_lp, None);
    }

    #[test]
    fn test_flags_override_run_file() {
        let mut config = empty_config();
        config.run.sample.num_chains = Some(8);
        config.run.sample.num_samples = Some(200);

        let flags = SampleFlags {
            chains: Some(1),
            ..Default::default()
        };
        let merged = config
            .run
            .sample
            .overlay(&flags.overrides(&RunArgs::default()).unwrap());
        assert_eq!(merged.num_chains, Some(1));
        assert_eq!(merged.num_samples, Some(200));
    }

    #[test]
    fn test_resolve_library_requires_a_source() {
        let err = resolve_library(None, &empty_config()).unwrap_err();
        assert!(err.to_string().contains("No model library given"));
        assert_eq!(
            resolve_library(Some("bernoulli"), &empty_config()).unwrap(),
            "bernoulli"
        );
    }

    #[test]
    fn test_read_inits_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("inits.json");
        fs::write(&path, r#"[{"theta": 0.1}, {"theta": 0.9}]"#).unwrap();

        let inits = read_inits(Some(&path)).unwrap().unwrap();
        assert_eq!(inits.per_chain_len(), Some(2));
        assert!(read_inits(None).unwrap().is_none());
    }

    #[test]
    fn test_read_data_defaults_to_empty() {
        let data = read_data(None, &empty_config()).unwrap();
        assert_eq!(data, ModelData::default());
    }
}
