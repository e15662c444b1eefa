use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{PathfinderFlags, RunArgs, SampleFlags};

/// Run inference on compiled TinyStan models.
///
/// Loads a model library built by TinyStan, feeds it JSON data and writes
/// the draws as JSON. Settings come from flags, then tinystan.toml, then
/// built-in defaults.
///
/// EXAMPLES:
///     tinystan sample bernoulli --data bernoulli.data.json
///     tinystan sample ./bernoulli_model.so --chains 2 --seed 42 -o draws.json
///     tinystan pathfinder bernoulli --data bernoulli.data.json --no-psis
///     tinystan version bernoulli
///
/// ENVIRONMENT VARIABLES:
///     TINYSTAN_LIBRARY      Model library when none is given
///     TINYSTAN_SEED         Seed for both procedures
///     TINYSTAN_NUM_THREADS  Thread count for both procedures
#[derive(Parser)]
#[command(name = "tinystan")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Draw from the posterior with NUTS
    ///
    /// EXAMPLES:
    ///     tinystan sample bernoulli --data bernoulli.data.json
    ///     tinystan sample bernoulli --metric dense --save-metric
    #[command(visible_alias = "s")]
    Sample {
        #[command(flatten)]
        run: RunArgs,
        #[command(flatten)]
        flags: SampleFlags,
    },

    /// Approximate the posterior with multi-path pathfinder
    ///
    /// EXAMPLES:
    ///     tinystan pathfinder bernoulli --data bernoulli.data.json
    ///     tinystan pathfinder bernoulli --paths 8 --no-psis
    #[command(visible_alias = "p")]
    Pathfinder {
        #[command(flatten)]
        run: RunArgs,
        #[command(flatten)]
        flags: PathfinderFlags,
    },

    /// Print the Stan and TinyStan API versions of a model library
    Version {
        /// Compiled model library (path or short name)
        library: Option<String>,
        /// Run file to read instead of searching for tinystan.toml
        #[arg(long)]
        config: Option<std::path::PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Sample { run, flags } => commands::sample::run(&run, &flags),
        Commands::Pathfinder { run, flags } => commands::pathfinder::run(&run, &flags),
        Commands::Version { library, config } => {
            commands::version::run(library.as_deref(), config.as_deref())
        }
    }
}
