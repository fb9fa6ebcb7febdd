//! Display models for table and JSON output

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

use offsync::{ActionState, PendingAction};

/// Queued action display model for table/JSON output.
#[derive(Debug, Clone, Tabled, Serialize)]
pub struct ActionDisplay {
    #[tabled(rename = "ACTION ID")]
    pub id: String,

    #[tabled(rename = "KIND")]
    pub kind: String,

    #[tabled(rename = "METHOD")]
    pub method: String,

    #[tabled(rename = "ENDPOINT")]
    pub endpoint: String,

    #[tabled(rename = "STATE")]
    pub state: String,

    /// Attempts used of the budget (e.g., "2/5")
    #[tabled(rename = "RETRIES")]
    pub retries: String,

    /// When the action was queued (e.g., "2h ago")
    #[tabled(rename = "QUEUED")]
    pub queued: String,

    /// Backoff deadline for pending actions, last error for failed ones
    #[tabled(rename = "DETAIL")]
    pub detail: String,
}

impl ActionDisplay {
    pub fn new(action: &PendingAction, now: DateTime<Utc>) -> Self {
        let detail = match action.state {
            ActionState::Failed => action
                .last_error
                .as_deref()
                .map(|e| truncate_string(e, 60))
                .unwrap_or_default(),
            _ => match action.next_eligible_at {
                Some(at) if at > now => format!("retry in {}", format_duration(at - now)),
                _ => action
                    .last_error
                    .as_deref()
                    .map(|e| truncate_string(e, 60))
                    .unwrap_or_default(),
            },
        };

        Self {
            id: action.id.clone(),
            kind: action.kind.clone(),
            method: action.method.to_string(),
            endpoint: action.endpoint.clone(),
            state: action.state.to_string(),
            retries: format!("{}/{}", action.retry_count, action.max_retries),
            queued: format_relative_time(action.created_at, now),
            detail,
        }
    }
}

/// Truncate string to max length with ellipsis
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Format a timestamp as relative time (e.g., "5m ago", "2h ago")
pub fn format_relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(at);

    let seconds = duration.num_seconds();
    if seconds < 0 {
        return "just now".to_string();
    }
    if seconds < 60 {
        return format!("{}s ago", seconds);
    }

    let minutes = duration.num_minutes();
    if minutes < 60 {
        return format!("{}m ago", minutes);
    }

    let hours = duration.num_hours();
    if hours < 24 {
        return format!("{}h ago", hours);
    }

    format!("{}d ago", duration.num_days())
}

/// Format a duration compactly (e.g., "1h 2m", "5m 10s", "45s")
pub fn format_duration(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Format bytes as human-readable size
pub fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Local date/time for a UTC timestamp
pub fn format_local(at: DateTime<Utc>) -> String {
    at.with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use offsync::HttpMethod;

    fn action(state: ActionState) -> PendingAction {
        let now = Utc::now();
        PendingAction {
            id: "a-1".to_string(),
            seq: 0,
            kind: "note.create".to_string(),
            endpoint: "/notes".to_string(),
            method: HttpMethod::Post,
            payload: None,
            created_at: now - Duration::minutes(5),
            updated_at: now,
            retry_count: 2,
            max_retries: 5,
            state,
            next_eligible_at: Some(now + Duration::seconds(90)),
            last_error: Some("server error (503)".to_string()),
        }
    }

    #[test]
    fn test_pending_action_shows_backoff() {
        let a = action(ActionState::Pending);
        let display = ActionDisplay::new(&a, a.updated_at);
        assert_eq!(display.retries, "2/5");
        assert_eq!(display.queued, "5m ago");
        assert_eq!(display.detail, "retry in 1m 30s");
        assert_eq!(display.method, "POST");
    }

    #[test]
    fn test_failed_action_shows_error() {
        let a = action(ActionState::Failed);
        let display = ActionDisplay::new(&a, a.updated_at);
        assert_eq!(display.state, "FAILED");
        assert_eq!(display.detail, "server error (503)");
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(45)), "45s");
        assert_eq!(format_duration(Duration::seconds(310)), "5m 10s");
        assert_eq!(format_duration(Duration::seconds(3720)), "1h 2m");
    }
}
