//! Version command - report what a model library was built with

use super::{load_config, open_model, resolve_library};
use anyhow::Result;
use std::path::Path;

pub fn run(library: Option<&str>, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let library = resolve_library(library, &config)?;
    let model = open_model(&library)?;

    let (major, minor, patch) = model.api_version()?;
    println!("tinystan {}", tinystan_runtime::VERSION);
    println!("Stan {}", model.version()?);
    println!("TinyStan API {}.{}.{}", major, minor, patch);
    Ok(())
}
