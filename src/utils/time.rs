//! Time and identity utilities

use chrono::Utc;

/// Get the current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Detect the identity of the producing agent from the environment.
///
/// Checked in order: `AGENT_ID`, then `USER` (Linux/Mac), then
/// `USERNAME` (Windows). Falls back to "anonymous-agent".
pub fn detect_agent_identity() -> String {
    use std::env;

    env::var("AGENT_ID")
        .or_else(|_| env::var("USER"))
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| "anonymous-agent".to_string())
}
