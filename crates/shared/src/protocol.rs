use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::MachineStatus;

pub const LIVE_LOG_SNIPPET_MAX_CHARS: usize = 140;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LiveAvailability {
    Available,
    Unavailable,
    #[default]
    Unknown,
}

impl LiveAvailability {
    /// Status shown for the live machine; `Unknown` keeps the stored one.
    pub fn overlay(self, stored: MachineStatus) -> MachineStatus {
        match self {
            LiveAvailability::Available => MachineStatus::Free,
            LiveAvailability::Unavailable => MachineStatus::Running,
            LiveAvailability::Unknown => stored,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStatusSnapshot {
    pub availability: LiveAvailability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_snippet: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Accepts the shapes the feed has been seen to return: a bare boolean, a
/// status word, or an object carrying `available` or `status`.
pub fn normalize_availability(payload: &Value) -> LiveAvailability {
    match payload {
        Value::Bool(true) => LiveAvailability::Available,
        Value::Bool(false) => LiveAvailability::Unavailable,
        Value::String(word) => availability_from_word(word),
        Value::Object(map) => {
            if let Some(available) = map.get("available").filter(|v| !v.is_null()) {
                return match available {
                    Value::Bool(_) | Value::String(_) => normalize_availability(available),
                    _ => LiveAvailability::Unknown,
                };
            }
            match map.get("status") {
                Some(status @ (Value::Bool(_) | Value::String(_))) => {
                    normalize_availability(status)
                }
                _ => LiveAvailability::Unknown,
            }
        }
        _ => LiveAvailability::Unknown,
    }
}

fn availability_from_word(word: &str) -> LiveAvailability {
    match word.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "available" | "free" | "idle" | "ready" => LiveAvailability::Available,
        "false" | "no" | "unavailable" | "busy" | "running" | "in_use" | "in use"
        | "occupied" | "washing" => LiveAvailability::Unavailable,
        _ => LiveAvailability::Unknown,
    }
}

/// Reduces a log payload (text, list of lines, or `{ "message": .. }`) to a
/// single trimmed line of at most [`LIVE_LOG_SNIPPET_MAX_CHARS`] characters.
pub fn normalize_log_snippet(payload: &Value) -> Option<String> {
    let text = match payload {
        Value::String(text) => Some(text.clone()),
        Value::Array(lines) => lines.iter().rev().find_map(normalize_log_snippet),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(message)) => Some(message.clone()),
            _ => None,
        },
        _ => None,
    }?;

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(LIVE_LOG_SNIPPET_MAX_CHARS).collect())
}
