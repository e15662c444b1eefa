//! Pathfinder command - approximate draws from a compiled model

use super::{
    load_config, log_summary, open_model, read_data, resolve_library, write_draws,
    PathfinderFlags, RunArgs,
};
use anyhow::{Context, Result};

/// Run pathfinder and write its draws
pub fn run(args: &RunArgs, flags: &PathfinderFlags) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let library = resolve_library(args.library.as_deref(), &config)?;
    let data = read_data(args.data.as_deref(), &config)?;
    let overrides = config.run.pathfinder.overlay(&flags.overrides(args)?);

    let model = open_model(&library)?;
    let draws = model
        .pathfinder(&data, &overrides)
        .with_context(|| format!("Pathfinder failed for {}", library))?;

    log_summary(&draws);
    write_draws(&draws, args.output.as_deref())
}
