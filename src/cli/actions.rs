//! Action queue commands

use chrono::Utc;
use colored::Colorize;

use offsync::{HttpMethod, NewAction, Result};

use crate::cli::display::ActionDisplay;
use crate::cli::{CommandContext, GlobalOptions, OutputFormat};
use crate::output;

/// List unconfirmed actions in replay order
pub async fn pending(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let actions = ctx.engine.list_pending().await?;

    let now = Utc::now();
    let rows: Vec<ActionDisplay> = actions.iter().map(|a| ActionDisplay::new(a, now)).collect();
    output::print_list(&rows, ctx.format, "No pending actions.")
}

/// List failed actions
pub async fn failed(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let actions = ctx.engine.list_failed().await?;

    let now = Utc::now();
    let rows: Vec<ActionDisplay> = actions.iter().map(|a| ActionDisplay::new(a, now)).collect();
    output::print_list(&rows, ctx.format, "No failed actions.")?;

    if ctx.format == OutputFormat::Table && !rows.is_empty() {
        println!(
            "\n  → {} to replay, {} to discard",
            "offsync retry <ID>".cyan(),
            "offsync clear-failed <ID>".cyan()
        );
    }
    Ok(())
}

/// Discard a failed action
pub async fn clear_failed(opts: &GlobalOptions, id: &str) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    ctx.engine.clear_failed(id).await?;

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({ "id": id, "cleared": true });
            println!("{}", output::format_json(&json)?);
        }
        OutputFormat::Table => println!("{} Cleared failed action {}", "✓".green(), id),
    }
    Ok(())
}

/// Move a failed action back to PENDING with a fresh retry budget
pub async fn retry(opts: &GlobalOptions, id: &str) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    ctx.engine.retry_failed(id).await?;

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({ "id": id, "state": "PENDING" });
            println!("{}", output::format_json(&json)?);
        }
        OutputFormat::Table => {
            println!("{} Action {} re-queued", "✓".green(), id);
            println!("  → Run {} to replay it now", "offsync sync".cyan());
        }
    }
    Ok(())
}

/// Queue a mutation
pub async fn enqueue(
    opts: &GlobalOptions,
    kind: &str,
    endpoint: &str,
    method: HttpMethod,
    data: Option<&str>,
    max_retries: Option<u32>,
) -> Result<()> {
    let payload = data
        .map(|d| serde_json::from_str::<serde_json::Value>(d))
        .transpose()?;

    let ctx = CommandContext::new(opts)?;
    let mut action = NewAction::new(kind, method, endpoint);
    action.payload = payload;
    action.max_retries = max_retries;
    let id = ctx.engine.enqueue(action).await?;

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "id": id,
                "kind": kind,
                "method": method,
                "endpoint": endpoint,
                "state": "PENDING",
            });
            println!("{}", output::format_json(&json)?);
        }
        OutputFormat::Table => println!("{} Queued {} ({} {})", "✓".green(), id, method, endpoint),
    }
    Ok(())
}
