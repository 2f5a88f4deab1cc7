//! Config defaults, TOML loading, and section overrides.

use retrace::tree::CompressionPolicy;
use retrace::Config;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_config_default_trace_settings() {
    let config = Config::default();
    assert!(config.trace.compress);
    assert_eq!(config.trace.policy, CompressionPolicy::NoArgs);
}

#[test]
fn test_config_default_module_settings() {
    let config = Config::default();
    assert_eq!(config.modules.dir_name, "rt_modules");
    assert_eq!(config.modules.extensions, vec!["rt".to_string(), "rts".to_string()]);
}

#[test]
fn test_config_default_logging() {
    let config = Config::default();
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, "text");
}

#[test]
fn test_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("retrace.toml");
    fs::write(
        &path,
        "[trace]\ncompress = false\npolicy = \"full\"\n\n[logging]\nlevel = \"debug\"\n",
    )
    .unwrap();

    let config = Config::from_file(path.to_str().unwrap()).unwrap();
    assert!(!config.trace.compress);
    assert_eq!(config.trace.policy, CompressionPolicy::Full);
    assert_eq!(config.logging.level, "debug");
    // Untouched sections keep their defaults.
    assert_eq!(config.modules.dir_name, "rt_modules");
}

#[test]
fn test_config_partial_section_merges_with_defaults() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("retrace.toml");
    fs::write(&path, "[modules]\ndir_name = \"pkg\"\n").unwrap();

    let config = Config::from_file(path.to_str().unwrap()).unwrap();
    assert_eq!(config.modules.dir_name, "pkg");
    assert_eq!(config.modules.extensions, vec!["rt".to_string(), "rts".to_string()]);
    assert!(config.trace.compress);
}

#[test]
fn test_config_missing_file_falls_back_to_defaults() {
    let config = Config::from_file("/nonexistent/retrace.toml").unwrap();
    assert!(config.trace.compress);
}

#[test]
fn test_config_rejects_unknown_policy() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("retrace.toml");
    fs::write(&path, "[trace]\npolicy = \"sometimes\"\n").unwrap();
    assert!(Config::from_file(path.to_str().unwrap()).is_err());
}
