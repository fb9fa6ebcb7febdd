//! CLI command definitions and handlers

use clap::{Parser, Subcommand};

use offsync::HttpMethod;

pub mod actions;
pub mod args;
pub mod cache;
pub mod context;
pub mod display;
pub mod status;
pub mod sync;

pub use args::{GlobalOptions, OutputFormat};
pub use context::CommandContext;

/// offsync - inspect and drive an offline-first sync store
#[derive(Parser, Debug)]
#[command(name = "offsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (table, json)
    #[arg(
        long,
        global = true,
        env = "OFFSYNC_FORMAT",
        default_value = "table",
        hide_env = true
    )]
    pub format: OutputFormat,

    /// Override config file location
    #[arg(long, global = true, env = "OFFSYNC_CONFIG", hide_env = true)]
    pub config: Option<String>,

    /// Override the database file
    #[arg(long, global = true, env = "OFFSYNC_STORE", hide_env = true)]
    pub store: Option<String>,

    /// Override the remote base URL
    #[arg(long, global = true, env = "OFFSYNC_BASE_URL", hide_env = true)]
    pub base_url: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true, env = "OFFSYNC_DEBUG", hide_env = true)]
    pub debug: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show queue, cache and last sync status
    Status,

    /// List unconfirmed actions in replay order
    Pending,

    /// List failed actions awaiting acknowledgement
    Failed,

    /// Discard a failed action
    ClearFailed {
        /// Action ID
        id: String,
    },

    /// Give a failed action a fresh retry budget
    Retry {
        /// Action ID
        id: String,
    },

    /// Queue a mutation for later replay
    #[command(after_help = "EXAMPLES:\n  \
            offsync enqueue note.create /notes --data '{\"title\":\"x\"}'\n  \
            offsync enqueue note.delete /notes/7 --method DELETE --max-retries 3")]
    Enqueue {
        /// Application-defined action kind
        kind: String,

        /// Endpoint, relative to remote.base_url or absolute
        endpoint: String,

        /// HTTP method
        #[arg(long, short = 'X', default_value = "POST")]
        method: HttpMethod,

        /// JSON request body
        #[arg(long, short = 'd')]
        data: Option<String>,

        /// Retry budget (defaults to queue.default_max_retries)
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Drain the queue against the remote now
    Sync,

    /// Manage the read cache
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Display version information
    Version,
}

/// Read cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache statistics
    Stats,

    /// Remove expired entries and synced actions past retention
    Sweep,

    /// Remove every cache entry
    Clear,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_enqueue() {
        let cli = Cli::parse_from([
            "offsync",
            "enqueue",
            "note.update",
            "/notes/1",
            "-X",
            "patch",
            "--data",
            "{}",
            "--format",
            "json",
        ]);

        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Enqueue {
                kind,
                endpoint,
                method,
                data,
                max_retries,
            } => {
                assert_eq!(kind, "note.update");
                assert_eq!(endpoint, "/notes/1");
                assert_eq!(method, HttpMethod::Patch);
                assert_eq!(data.as_deref(), Some("{}"));
                assert_eq!(max_retries, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_method() {
        let result = Cli::try_parse_from(["offsync", "enqueue", "k", "/x", "-X", "TRACE"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_cache_subcommand() {
        let cli = Cli::parse_from(["offsync", "cache", "sweep"]);
        assert!(matches!(cli.command, Commands::Cache(CacheCommands::Sweep)));
    }
}
