use std::{fs, path::Path, time::Duration as StdDuration};

use chrono::Duration;
use tracing::warn;
use url::Url;

use crate::bookings::ApprovalMode;

pub const DEFAULT_SETTINGS_FILE: &str = "hostel.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_url: String,
    pub tick_interval_secs: u64,
    pub approval_mode: ApprovalMode,
    /// Delay used whenever automatic approval is on, whichever source set it.
    pub auto_approve_after: Duration,
    pub live_status_url: Option<Url>,
    pub live_log_url: Option<Url>,
    pub live_machine_label: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/hostel.db".into(),
            tick_interval_secs: 60,
            approval_mode: ApprovalMode::Manual,
            auto_approve_after: Duration::seconds(120),
            live_status_url: None,
            live_log_url: None,
            live_machine_label: None,
        }
    }
}

impl Settings {
    pub fn tick_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.tick_interval_secs.max(1))
    }
}

/// Defaults, then `hostel.toml` in the working directory, then environment.
pub fn load_settings() -> Settings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE))
}

pub fn load_settings_from(path: &Path) -> Settings {
    let mut settings = Settings::default();
    if let Ok(raw) = fs::read_to_string(path) {
        apply_file_settings(&mut settings, &raw);
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

pub(crate) fn apply_file_settings(settings: &mut Settings, raw: &str) {
    let table = match toml::from_str::<toml::Table>(raw) {
        Ok(table) => table,
        Err(err) => {
            warn!(error = %err, "ignoring unreadable settings file");
            return;
        }
    };

    for (key, value) in &table {
        let value = match value {
            toml::Value::String(s) => s.clone(),
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            other => {
                warn!(%key, value = %other, "unsupported settings value; ignoring");
                continue;
            }
        };
        apply_setting(settings, key, &value);
    }
}

pub(crate) fn apply_env_overrides(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    const KEYS: [&str; 7] = [
        "database_url",
        "tick_interval_secs",
        "approval_mode",
        "auto_approve_after_secs",
        "live_status_url",
        "live_log_url",
        "live_machine_label",
    ];

    for key in KEYS {
        let upper = key.to_ascii_uppercase();
        for env_key in [format!("HOSTEL_{upper}"), format!("APP__{upper}")] {
            if let Some(value) = lookup(&env_key) {
                apply_setting(settings, key, &value);
            }
        }
    }
}

fn apply_setting(settings: &mut Settings, key: &str, value: &str) {
    let value = value.trim();
    match key {
        "database_url" => settings.database_url = value.to_string(),
        "tick_interval_secs" => match value.parse::<u64>() {
            Ok(secs) if secs > 0 => settings.tick_interval_secs = secs,
            _ => warn!(%value, "tick_interval_secs must be a positive integer"),
        },
        "approval_mode" => match value.to_ascii_lowercase().as_str() {
            "manual" => settings.approval_mode = ApprovalMode::Manual,
            "auto" | "automatic" => {
                settings.approval_mode = ApprovalMode::Automatic {
                    after: settings.auto_approve_after,
                }
            }
            _ => warn!(%value, "approval_mode must be 'manual' or 'auto'"),
        },
        "auto_approve_after_secs" => match value
            .parse::<i64>()
            .ok()
            .filter(|secs| *secs >= 0)
            .and_then(Duration::try_seconds)
        {
            Some(delay) => {
                settings.auto_approve_after = delay;
                if let ApprovalMode::Automatic { after } = &mut settings.approval_mode {
                    *after = delay;
                }
            }
            None => warn!(%value, "auto_approve_after_secs must be a non-negative number of seconds in range"),
        },
        "live_status_url" => settings.live_status_url = parse_url(key, value),
        "live_log_url" => settings.live_log_url = parse_url(key, value),
        "live_machine_label" => {
            settings.live_machine_label = (!value.is_empty()).then(|| value.to_string())
        }
        _ => warn!(%key, "unknown setting; ignoring"),
    }
}

fn parse_url(key: &str, value: &str) -> Option<Url> {
    if value.is_empty() {
        return None;
    }
    match Url::parse(value) {
        Ok(url) => Some(url),
        Err(err) => {
            warn!(%key, %value, error = %err, "invalid url; ignoring");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
