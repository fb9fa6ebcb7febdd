//! offsync CLI - inspect and drive an offline-first sync store

use clap::Parser;
use log::LevelFilter;

mod cli;
mod output;

use cli::{CacheCommands, Cli, Commands, GlobalOptions};
use offsync::Result;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if debug {
        builder.filter_level(LevelFilter::Debug);
    }
    let _ = builder.try_init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    log::debug!("Debug mode enabled");

    let opts = GlobalOptions::from_cli(&cli);

    match cli.command {
        Commands::Status => cli::status::run(&opts).await,
        Commands::Pending => cli::actions::pending(&opts).await,
        Commands::Failed => cli::actions::failed(&opts).await,
        Commands::ClearFailed { id } => cli::actions::clear_failed(&opts, &id).await,
        Commands::Retry { id } => cli::actions::retry(&opts, &id).await,
        Commands::Enqueue {
            kind,
            endpoint,
            method,
            data,
            max_retries,
        } => {
            cli::actions::enqueue(
                &opts,
                &kind,
                &endpoint,
                method,
                data.as_deref(),
                max_retries,
            )
            .await
        }
        Commands::Sync => cli::sync::run(&opts).await,
        Commands::Cache(cache_cmd) => match cache_cmd {
            CacheCommands::Stats => cli::cache::stats(&opts).await,
            CacheCommands::Sweep => cli::cache::sweep(&opts).await,
            CacheCommands::Clear => cli::cache::clear(&opts).await,
        },
        Commands::Version => {
            println!("offsync version {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
