//! Engine configuration file
//!
//! ```toml
//! [engine]
//! parallelism = 4
//! min_idle_us = 25
//! max_idle_us = 1000
//! thread_name_prefix = "sluice"
//! ```
//!
//! Every key is optional. Values come from the engine defaults, then the
//! file, then command-line flags.

use anyhow::{Context, Result};
use serde::Deserialize;
use sluice_exec::ExecConfig;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Parsed configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub engine: EngineSection,
}

/// `[engine]` section
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    pub parallelism: Option<usize>,
    pub min_idle_us: Option<u64>,
    pub max_idle_us: Option<u64>,
    pub thread_name_prefix: Option<String>,
}

impl ConfigFile {
    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load and parse a configuration file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Layer the file over `base`
    pub fn apply(&self, base: ExecConfig) -> ExecConfig {
        let engine = &self.engine;
        let mut config = base;
        if let Some(parallelism) = engine.parallelism {
            config = config.with_parallelism(parallelism);
        }
        let min_idle = engine
            .min_idle_us
            .map_or(config.min_idle, Duration::from_micros);
        let max_idle = engine
            .max_idle_us
            .map_or(config.max_idle, Duration::from_micros);
        config = config.with_idle_backoff(min_idle, max_idle);
        if let Some(prefix) = &engine.thread_name_prefix {
            config = config.with_thread_name_prefix(prefix.clone());
        }
        config
    }
}

/// Engine configuration from defaults, the optional file, and flags
pub fn effective_config(path: Option<&Path>, parallelism: Option<usize>) -> Result<ExecConfig> {
    let file = match path {
        Some(path) => ConfigFile::load_from_path(path)?,
        None => ConfigFile::default(),
    };

    let mut config = file.apply(ExecConfig::default());
    if let Some(parallelism) = parallelism {
        config = config.with_parallelism(parallelism);
    }
    config.validate()?;
    Ok(config)
}
