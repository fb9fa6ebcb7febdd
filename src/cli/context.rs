//! Command execution context
//!
//! Loads configuration once, applies command-line overrides and builds the engine so
//! handlers only deal with their own command.

use std::path::PathBuf;

use offsync::store::SqliteStore;
use offsync::{EngineConfig, OfflineEngine, Result};

use crate::cli::{GlobalOptions, OutputFormat};

/// Context for command execution containing the engine and runtime options.
pub struct CommandContext {
    pub engine: OfflineEngine,
    /// Output format preference
    pub format: OutputFormat,
    /// Config file that was (or would have been) read
    pub config_path: PathBuf,
}

impl CommandContext {
    /// Load config, apply overrides and open the engine.
    ///
    /// The CLI has no connectivity signal, so every sync attempt goes to the network
    /// and a connection failure halts the pass.
    pub fn new(opts: &GlobalOptions) -> Result<Self> {
        let config_path = EngineConfig::resolve_path(opts.config_ref())?;
        let config = Self::load_config(opts)?;
        let engine = OfflineEngine::builder(config).build()?;

        Ok(Self {
            engine,
            format: opts.format,
            config_path,
        })
    }

    /// Configuration with `--store` and `--base-url` applied
    pub fn load_config(opts: &GlobalOptions) -> Result<EngineConfig> {
        let mut config = EngineConfig::load_at(opts.config_ref())?;
        opts.apply_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// Database file in use
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.engine.config().store.path {
            Some(path) => Ok(path.clone()),
            None => Ok(SqliteStore::default_path()?),
        }
    }
}
