//! Sync command

use colored::Colorize;

use offsync::{Result, SyncSession};

use crate::cli::display::format_duration;
use crate::cli::{CommandContext, GlobalOptions, OutputFormat};
use crate::output;

/// Drain the queue once and report the session
pub async fn run(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    if ctx.engine.config().remote.base_url.is_empty() {
        log::warn!("remote.base_url is not set; only absolute endpoints can be replayed");
    }

    let session = ctx.engine.sync().await?;
    let stats = ctx.engine.queue_stats().await?;

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "session": session,
                "remaining": {
                    "pending": stats.pending,
                    "failed": stats.failed,
                },
            });
            println!("{}", output::format_json(&json)?);
        }
        OutputFormat::Table => {
            print_session(&session);
            println!(
                "Remaining:  {} pending, {} failed",
                stats.pending, stats.failed
            );
        }
    }
    Ok(())
}

/// Human summary of a session
pub fn print_session(session: &SyncSession) {
    let took = format_duration(session.finished_at - session.started_at);
    if session.halted && session.items_attempted == 0 {
        println!("{} Sync did not start: offline", "✗".red());
        return;
    }

    let marker = if session.halted || session.items_failed > 0 {
        "⚠".yellow()
    } else {
        "✓".green()
    };
    println!("{} Sync pass finished in {}", marker, took);
    println!("Attempted:  {}", session.items_attempted);
    println!("Synced:     {}", session.items_succeeded.to_string().green());
    if session.items_failed > 0 {
        println!("Failed:     {}", session.items_failed.to_string().red());
    }
    if session.items_retried > 0 {
        println!("Retrying:   {}", session.items_retried);
    }
    if session.items_deferred > 0 {
        println!("Deferred:   {}", session.items_deferred);
    }
    if session.items_evicted > 0 {
        println!("Evicted:    {}", session.items_evicted);
    }
    if session.halted {
        println!("{}", "Connectivity lost; remaining actions stay queued".yellow());
    }
}
