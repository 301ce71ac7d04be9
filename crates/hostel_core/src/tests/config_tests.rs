use super::*;

use std::collections::HashMap;

#[test]
fn defaults_use_manual_approval_and_one_minute_ticks() {
    let settings = Settings::default();
    assert_eq!(settings.approval_mode, ApprovalMode::Manual);
    assert_eq!(settings.tick_interval(), StdDuration::from_secs(60));
    assert!(settings.live_status_url.is_none());
}

#[test]
fn file_settings_accept_strings_and_integers() {
    let mut settings = Settings::default();
    apply_file_settings(
        &mut settings,
        r#"
        database_url = "sqlite://./tmp/hostel.db"
        tick_interval_secs = 5
        auto_approve_after_secs = "30"
        approval_mode = "auto"
        live_status_url = "http://127.0.0.1:9000/status"
        live_machine_label = "A1-W1"
        "#,
    );

    assert_eq!(settings.database_url, "sqlite://./tmp/hostel.db");
    assert_eq!(settings.tick_interval_secs, 5);
    assert_eq!(
        settings.approval_mode,
        ApprovalMode::Automatic {
            after: Duration::seconds(30)
        }
    );
    assert_eq!(
        settings.live_status_url.as_ref().map(Url::as_str),
        Some("http://127.0.0.1:9000/status")
    );
    assert_eq!(settings.live_machine_label.as_deref(), Some("A1-W1"));
}

#[test]
fn invalid_values_keep_defaults() {
    let mut settings = Settings::default();
    apply_file_settings(
        &mut settings,
        r#"
        tick_interval_secs = "soon"
        approval_mode = "whenever"
        live_status_url = "not a url"
        "#,
    );
    assert_eq!(settings, Settings::default());
}

#[test]
fn unreadable_file_is_ignored() {
    let mut settings = Settings::default();
    apply_file_settings(&mut settings, "this is = = not toml");
    assert_eq!(settings, Settings::default());
}

#[test]
fn app_prefixed_env_wins_over_hostel_prefixed_env() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("HOSTEL_DATABASE_URL", "sqlite://./a.db"),
        ("APP__DATABASE_URL", "sqlite://./b.db"),
        ("HOSTEL_APPROVAL_MODE", "auto"),
        ("HOSTEL_AUTO_APPROVE_AFTER_SECS", "0"),
    ]);
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings, |key| env.get(key).map(|v| v.to_string()));

    assert_eq!(settings.database_url, "sqlite://./b.db");
    assert_eq!(
        settings.approval_mode,
        ApprovalMode::Automatic {
            after: Duration::zero()
        }
    );
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let settings = load_settings_from(Path::new("./definitely/not/here/hostel.toml"));
    assert_eq!(settings.tick_interval_secs, Settings::default().tick_interval_secs);
}

#[test]
fn out_of_range_approval_delay_is_ignored() {
    let mut settings = Settings::default();
    apply_file_settings(
        &mut settings,
        "approval_mode = \"auto\"\nauto_approve_after_secs = 9223372036854775807",
    );
    assert_eq!(
        settings.approval_mode,
        ApprovalMode::Automatic {
            after: Duration::seconds(120)
        }
    );

    apply_file_settings(&mut settings, "auto_approve_after_secs = -5");
    assert_eq!(settings.auto_approve_after, Duration::seconds(120));
}

#[test]
fn file_delay_survives_env_switching_to_auto() {
    let mut settings = Settings::default();
    apply_file_settings(&mut settings, "auto_approve_after_secs = 45");
    assert_eq!(settings.approval_mode, ApprovalMode::Manual);

    let env: HashMap<&str, &str> = HashMap::from([("APP__APPROVAL_MODE", "auto")]);
    apply_env_overrides(&mut settings, |key| env.get(key).map(|v| v.to_string()));

    assert_eq!(
        settings.approval_mode,
        ApprovalMode::Automatic {
            after: Duration::seconds(45)
        }
    );
}
