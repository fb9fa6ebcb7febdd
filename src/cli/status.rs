//! Status command implementation

use colored::Colorize;

use offsync::Result;

use crate::cli::display::{format_local, format_size};
use crate::cli::{CommandContext, GlobalOptions, OutputFormat};
use crate::output;

/// Show configuration, queue, cache and last sync state
pub async fn run(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let config = ctx.engine.config();
    let store_path = ctx.store_path()?;
    let queue = ctx.engine.queue_stats().await?;
    let cache = ctx.engine.cache_stats().await?;
    let last = ctx.engine.last_session().await?;

    if ctx.format == OutputFormat::Json {
        let json = serde_json::json!({
            "config_path": ctx.config_path.display().to_string(),
            "config_found": ctx.config_path.exists(),
            "store_path": store_path.display().to_string(),
            "base_url": config.remote.base_url,
            "queue": queue,
            "cache": cache,
            "last_session": last,
        });
        println!("{}", output::format_json(&json)?);
        return Ok(());
    }

    println!("{}\n", "offsync Status".bold());

    if ctx.config_path.exists() {
        println!("Config file: {}", ctx.config_path.display().to_string().cyan());
    } else {
        println!(
            "Config file: {} {}",
            ctx.config_path.display().to_string().cyan(),
            "(not found, using defaults)".dimmed()
        );
    }
    println!("Store:       {}", store_path.display().to_string().cyan());
    if config.remote.base_url.is_empty() {
        println!("{} No remote base URL configured", "○".dimmed());
    } else {
        println!("{} Remote: {}", "✓".green(), config.remote.base_url);
    }

    println!();
    println!("{}", "Queue".bold());
    println!("  Pending:   {} / {}", queue.pending + queue.syncing, queue.capacity);
    if queue.failed > 0 {
        println!("  Failed:    {}", queue.failed.to_string().red());
        println!("  → Run 'offsync failed' to review");
    } else {
        println!("  Failed:    0");
    }
    println!("  Synced:    {} (kept for audit)", queue.synced);
    if queue.evicted_total > 0 {
        println!(
            "  {} {} actions evicted at capacity",
            "⚠".yellow(),
            queue.evicted_total
        );
    }

    println!();
    println!("{}", "Cache".bold());
    println!(
        "  Entries:   {} valid, {} expired ({})",
        cache.valid_entries,
        cache.expired_entries,
        format_size(cache.total_size_bytes)
    );

    println!();
    match last {
        Some(session) => {
            let marker = if session.halted || session.items_failed > 0 {
                "⚠".yellow()
            } else {
                "✓".green()
            };
            println!(
                "{} Last sync {}: {} synced, {} failed, {} retrying{}",
                marker,
                format_local(session.finished_at),
                session.items_succeeded,
                session.items_failed,
                session.items_retried,
                if session.halted { " (halted)" } else { "" }
            );
        }
        None => println!("{} Never synced", "○".dimmed()),
    }
    println!();

    Ok(())
}
