//! Sample command - NUTS draws from a compiled model

use super::{
    load_config, log_summary, open_model, read_data, resolve_library, write_draws, RunArgs,
    SampleFlags,
};
use anyhow::{Context, Result};

/// Run the sampler and write its draws
pub fn run(args: &RunArgs, flags: &SampleFlags) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let library = resolve_library(args.library.as_deref(), &config)?;
    let data = read_data(args.data.as_deref(), &config)?;
    let overrides = config.run.sample.overlay(&flags.overrides(args)?);

    let model = open_model(&library)?;
    let draws = model
        .sample(&data, &overrides)
        .with_context(|| format!("Sampling failed for {}", library))?;

    log_summary(&draws);
    write_draws(&draws, args.output.as_deref())
}
