//! Classification of a single delivery attempt

use crate::config::AuthExpiryPolicy;
use crate::error::RemoteError;
use crate::events::FailureReason;
use crate::remote::RemoteResponse;

/// What the coordinator does with an attempted action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx; the action is applied remotely
    Delivered,
    /// Transient failure; spend one unit of retry budget
    Retry(String),
    /// Cannot succeed by retrying
    Reject(FailureReason),
    /// The network went away; return the action to PENDING without spending budget
    /// and stop the pass
    Offline(String),
}

/// Map a remote result onto the action lifecycle
pub fn classify(
    result: &Result<RemoteResponse, RemoteError>,
    auth_expiry: AuthExpiryPolicy,
) -> Outcome {
    let response = match result {
        Ok(response) => response,
        Err(RemoteError::Offline(msg)) => return Outcome::Offline(msg.clone()),
        Err(RemoteError::InvalidUrl(msg)) => {
            return Outcome::Reject(FailureReason::InvalidRequest {
                message: msg.clone(),
            });
        }
        Err(err @ (RemoteError::Timeout | RemoteError::Transport(_))) => {
            return Outcome::Retry(err.to_string());
        }
    };

    let status = response.status;
    match status {
        200..=299 => Outcome::Delivered,
        401 => match auth_expiry {
            AuthExpiryPolicy::Retry => Outcome::Retry("authentication expired (401)".to_string()),
            AuthExpiryPolicy::Fail => Outcome::Reject(rejected(response)),
        },
        408 => Outcome::Retry("remote timed out (408)".to_string()),
        429 => Outcome::Retry("rate limited (429)".to_string()),
        500..=599 => Outcome::Retry(format!("server error ({})", status)),
        _ => Outcome::Reject(rejected(response)),
    }
}

fn rejected(response: &RemoteResponse) -> FailureReason {
    let message = match response.status {
        400..=499 => response.body_excerpt(),
        other => format!("unexpected status {}: {}", other, response.body_excerpt()),
    };
    FailureReason::Rejected {
        status: response.status,
        message,
    }
}
