//! Unit tests for configuration resolution
//!
//! Tests that manipulate FEEDMUX_CONFIG are marked with #[serial] so they
//! do not race each other on the process environment.

use feedmux_common::config::{
    load_default_config, load_toml_config, CompiledDefaults, Settings, SettingsOverrides,
    TomlConfig, CONFIG_ENV_VAR,
};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_compiled_defaults() {
    let defaults = CompiledDefaults::for_current_platform();
    assert_eq!(defaults.bind, "127.0.0.1:5790");
    assert_eq!(defaults.refresh_interval, Duration::from_secs(300));
    assert_eq!(defaults.log_level, "info");
    assert!(
        defaults.cache_dir.ends_with("feedmux") || defaults.cache_dir.ends_with("feedmux_cache")
    );
}

#[test]
fn test_resolve_without_sources_uses_defaults() {
    let settings = Settings::resolve(SettingsOverrides::default(), None).expect("resolve");
    let defaults = CompiledDefaults::for_current_platform();

    assert_eq!(settings.bind, defaults.bind);
    assert_eq!(settings.cache_dir, defaults.cache_dir);
    assert_eq!(settings.refresh_interval, defaults.refresh_interval);
    assert_eq!(settings.event_capacity, 1000);
}

#[test]
fn test_override_beats_toml() {
    let toml = TomlConfig {
        bind: Some("127.0.0.1:7000".to_string()),
        refresh_interval_secs: Some(60),
        ..Default::default()
    };
    let overrides = SettingsOverrides {
        bind: Some("127.0.0.1:8000".to_string()),
        ..Default::default()
    };

    let settings = Settings::resolve(overrides, Some(toml)).expect("resolve");
    assert_eq!(settings.bind, "127.0.0.1:8000");
    assert_eq!(settings.refresh_interval, Duration::from_secs(60));
}

#[test]
fn test_zero_refresh_interval_rejected() {
    let overrides = SettingsOverrides {
        refresh_interval_secs: Some(0),
        ..Default::default()
    };
    assert!(Settings::resolve(overrides, None).is_err());
}

#[test]
fn test_derived_paths() {
    let overrides = SettingsOverrides {
        cache_dir: Some(PathBuf::from("/tmp/feedmux-test")),
        ..Default::default()
    };
    let settings = Settings::resolve(overrides, None).expect("resolve");

    assert_eq!(settings.result_cache_dir(), PathBuf::from("/tmp/feedmux-test/cache"));
    assert_eq!(settings.ban_list_path(), PathBuf::from("/tmp/feedmux-test/banned.txt"));
    assert_eq!(settings.thumbnail_dir(), PathBuf::from("/tmp/feedmux-test/thumbnails"));
}

#[test]
fn test_load_toml_config() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        "bind = \"127.0.0.1:6000\"\nrefresh_interval_secs = 120\n\n[logging]\nlevel = \"debug\""
    )
    .expect("write");

    let config = load_toml_config(file.path()).expect("parse");
    assert_eq!(config.bind.as_deref(), Some("127.0.0.1:6000"));
    assert_eq!(config.refresh_interval_secs, Some(120));
    assert_eq!(config.logging.level.as_deref(), Some("debug"));
}

#[test]
fn test_load_toml_config_rejects_garbage() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "bind = [unterminated").expect("write");
    assert!(load_toml_config(file.path()).is_err());
}

#[test]
#[serial]
fn test_env_var_selects_config_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "event_capacity = 16").expect("write");

    env::set_var(CONFIG_ENV_VAR, file.path());
    let config = load_default_config().expect("load");
    env::remove_var(CONFIG_ENV_VAR);

    let config = config.expect("config file should be found");
    assert_eq!(config.event_capacity, Some(16));
}
