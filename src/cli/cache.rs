//! Cache management commands

use offsync::Result;

use crate::cli::display::{format_local, format_size};
use crate::cli::{CommandContext, GlobalOptions, OutputFormat};
use crate::output;

/// Show cache statistics
pub async fn stats(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let stats = ctx.engine.cache_stats().await?;
    let path = ctx.store_path()?.display().to_string();

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "total_entries": stats.total_entries,
                "valid_entries": stats.valid_entries,
                "expired_entries": stats.expired_entries,
                "total_size_bytes": stats.total_size_bytes,
                "total_size_human": format_size(stats.total_size_bytes),
                "oldest_entry": stats.oldest_entry,
                "newest_entry": stats.newest_entry,
                "path": path,
            });
            println!("{}", output::format_json(&json)?);
        }
        OutputFormat::Table => {
            println!("Cache Status");
            println!("────────────────────────────────────────");
            println!("Location:       {}", path);
            println!("Valid entries:  {}", stats.valid_entries);
            println!("Expired:        {}", stats.expired_entries);
            println!("Total size:     {}", format_size(stats.total_size_bytes));
            if let Some(oldest) = stats.oldest_entry {
                println!("Oldest entry:   {}", format_local(oldest));
            }
            if let Some(newest) = stats.newest_entry {
                println!("Newest entry:   {}", format_local(newest));
            }
        }
    }
    Ok(())
}

/// Remove expired cache entries and synced actions past retention
pub async fn sweep(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let (expired, purged) = ctx.engine.sweep().await?;

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "expired_entries_removed": expired,
                "synced_actions_purged": purged,
            });
            println!("{}", output::format_json(&json)?);
        }
        OutputFormat::Table => {
            println!("Removed {} expired cache entries", expired);
            println!("Purged {} synced actions past retention", purged);
        }
    }
    Ok(())
}

/// Clear all cache entries
pub async fn clear(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let removed = ctx.engine.cache().clear().await?;

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "entries_removed": removed,
                "success": true,
            });
            println!("{}", output::format_json(&json)?);
        }
        OutputFormat::Table => {
            if removed > 0 {
                println!("Cleared {} cache entries", removed);
            } else {
                println!("Cache was already empty");
            }
        }
    }
    Ok(())
}
