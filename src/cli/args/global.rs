//! Global CLI options shared across all commands

use std::path::PathBuf;

use offsync::EngineConfig;

use crate::cli::{Cli, OutputFormat};

/// Global CLI options passed to all command handlers.
///
/// Precedence is CLI flag > environment variable > config file > default. This struct
/// holds the CLI/env layer; the config file is applied in `CommandContext`.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    /// Output format (table, json)
    pub format: OutputFormat,

    /// Custom config file path
    pub config: Option<String>,

    /// Database file overriding `store.path` from the config
    pub store: Option<String>,

    /// Remote base URL overriding `remote.base_url` from the config
    pub base_url: Option<String>,
}

impl GlobalOptions {
    /// Create GlobalOptions from a parsed CLI struct.
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            format: cli.format,
            config: cli.config.clone(),
            store: cli.store.clone(),
            base_url: cli.base_url.clone(),
        }
    }

    /// Get config path as `Option<&str>`.
    pub fn config_ref(&self) -> Option<&str> {
        self.config.as_deref()
    }

    /// Overlay `--store` and `--base-url` onto a loaded config
    pub fn apply_overrides(&self, config: &mut EngineConfig) {
        if let Some(store) = &self.store {
            config.store.path = Some(PathBuf::from(store));
        }
        if let Some(base_url) = &self.base_url {
            config.remote.base_url = base_url.clone();
        }
    }
}
