mod common;

use bundlerwatch::config::{Config, ConfigError};
use bundlerwatch::rules::{Outcome, RemediableKind, RuleSet};
use bundlerwatch::SupervisionSettings;
use common::temp_config;
use std::time::Duration;

/// Config::default() matches the stock Expo setup.
#[test]
fn test_config_default_values() {
    let config = Config::default();

    assert_eq!(config.command.program, "npx");
    assert_eq!(
        config.command.args,
        vec!["expo", "start", "--port", "{port}", "--no-dev", "--minify"]
    );
    assert_eq!(config.ports.start, 19000);
    assert_eq!(config.ports.end, 19100);
    assert_eq!(config.timeouts.attempt_timeout_seconds, 300);
    assert_eq!(config.timeouts.heartbeat_seconds, 30);
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.backoff_base_seconds, 30);
    assert_eq!(config.retry.backoff_max_seconds, 300);
    assert_eq!(config.environment.max_worker_count, Some(2));
    assert_eq!(config.environment.max_old_space_mb, Some(512));
    assert_eq!(config.resources.max_disk_percent, 90.0);
    assert!(config.builtin_rules);
    assert!(config.rules.is_empty());
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_path_ends_with_expected() {
    let path = Config::config_path();
    assert!(path.ends_with("bundlerwatch/config.toml"));
}

/// Partial files fill the rest from defaults.
#[test]
fn test_partial_config_uses_defaults() {
    let (_dir, path) = temp_config(
        r#"
[ports]
start = 8081
end = 8090

[retry]
max_attempts = 5
"#,
    );

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.ports.start, 8081);
    assert_eq!(config.ports.end, 8090);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.backoff_base_seconds, 30);
    assert_eq!(config.command.program, "npx");
}

#[test]
fn test_full_config_drives_settings() {
    let (_dir, path) = temp_config(
        r#"
builtin_rules = true

[command]
program = "yarn"
args = ["expo", "start", "--port", "{port}", "--clear"]
working_dir = "/srv/app"

[environment]
max_worker_count = 4
disable_watch_mode = true

[environment.extra]
REACT_NATIVE_PACKAGER_HOSTNAME = "10.0.0.2"

[timeouts]
attempt_timeout_seconds = 120
heartbeat_seconds = 10
termination_grace_ms = 1500

[logging]
aux_log_file = "/srv/app/metro.log"

[[rules]]
pattern = "Tunnel ready"
outcome = { type = "info", label = "tunnel" }

[[rules]]
pattern = 'Waiting on (http://\S+)'
regex = true
outcome = { type = "ready" }

[[rules]]
pattern = "watchman crawl failed"
outcome = { type = "remediable", kind = "file-watcher-limit-exceeded" }
"#,
    );

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.rules.len(), 3);
    assert_eq!(
        config.rules[2].outcome,
        Outcome::Remediable {
            kind: RemediableKind::FileWatcherLimitExceeded
        }
    );

    let settings = SupervisionSettings::from_config(&config);
    assert_eq!(settings.attempt_timeout, Duration::from_secs(120));
    assert_eq!(settings.heartbeat_interval, Duration::from_secs(10));
    assert_eq!(settings.termination_grace, Duration::from_millis(1500));
    assert_eq!(settings.command.program, "yarn");
    assert!(settings
        .command
        .env
        .contains(&("EXPO_METRO_MAX_WORKERS".to_string(), "4".to_string())));
    assert!(settings.command.env.contains(&("CI".to_string(), "1".to_string())));
    assert!(settings.command.env.contains(&(
        "REACT_NATIVE_PACKAGER_HOSTNAME".to_string(),
        "10.0.0.2".to_string()
    )));

    let rules = RuleSet::from_config(&config.rules, config.builtin_rules).unwrap();
    let ready = rules.classify("Waiting on http://localhost:8081");
    assert_eq!(
        ready,
        bundlerwatch::rules::Classification::Ready("http://localhost:8081".to_string())
    );
}

#[test]
fn test_missing_explicit_file_is_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load_from(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::ReadError { .. }));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let (_dir, path) = temp_config("[ports\nstart = ");
    let err = Config::load_from(&path).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError { .. }));
    assert!(err.to_string().contains("config.toml"));
}

#[test]
fn test_inverted_port_range_fails_validation() {
    let (_dir, path) = temp_config("[ports]\nstart = 19100\nend = 19000\n");
    let err = Config::load_from(&path).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError { .. }));
}

#[test]
fn test_zero_attempts_fail_validation() {
    let mut config = Config::default();
    config.retry.max_attempts = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_backoff_base_above_cap_fails_validation() {
    let mut config = Config::default();
    config.retry.backoff_base_seconds = 600;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("backoff_base_seconds"));
}

#[test]
fn test_missing_disk_path_fails_validation() {
    let (dir, path) = temp_config("");
    let missing = dir.path().join("no-such-volume");
    std::fs::write(
        &path,
        format!("[resources]\ndisk_path = {:?}\n", missing.display().to_string()),
    )
    .unwrap();

    let err = Config::load_from(&path).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError { .. }));
    assert!(err.to_string().contains("disk_path"));
}

#[test]
fn test_bad_rule_regex_fails_validation() {
    let (_dir, path) = temp_config(
        r#"
[[rules]]
pattern = "exp://(["
regex = true
outcome = { type = "ready" }
"#,
    );
    let err = Config::load_from(&path).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError { .. }));
    assert!(err.to_string().contains("exp://(["));
}

#[test]
fn test_unknown_remediable_kind_is_parse_error() {
    let (_dir, path) = temp_config(
        r#"
[[rules]]
pattern = "boom"
outcome = { type = "remediable", kind = "reboot-the-laptop" }
"#,
    );
    let err = Config::load_from(&path).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError { .. }));
}
