// CLI command implementations

pub mod graph;
pub mod index;
pub mod languages;
pub mod serve;
pub mod stats;

use std::path::Path;

use anyhow::{Context, Result};
use repograph::config::Config;

/// `--config PATH` when given, otherwise `.repograph.toml` in the working directory
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path).with_context(|| format!("cannot load config {}", path.display())),
        None => Ok(Config::from_project_dir(".")),
    }
}
