use std::fs;

use super::*;

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert_eq!(settings.logging.format, LogFormat::Compact);
    assert!(settings.reload.check_reload);
    assert_eq!(settings.reload.reload_delay_ms, 1000);
    assert_eq!(settings.cache, CacheConfig::default());
    assert_eq!(settings.pipeline.default_kind, PipelineKind::Caching);
    assert!(!settings.pipeline.enable_byte_ranges);
}

#[test]
fn zero_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.capacity = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero capacity");
    assert!(matches!(err, LoadError::Invalid { key: "cache.capacity", .. }));
}

#[test]
fn rejects_expiry_beyond_the_cap() {
    let mut raw = RawSettings::default();
    raw.cache.default_expires_secs = Some(i64::MAX);

    let err = Settings::from_raw(raw).expect_err("expiry should be capped");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.default_expires_secs",
            ..
        }
    ));
}

#[test]
fn negative_expires_collapses_to_stage_validities() {
    let mut raw = RawSettings::default();
    raw.cache.default_expires_secs = Some(-42);

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.default_expires_secs, -1);
}

#[test]
fn unknown_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("chatty".to_string());

    let err = Settings::from_raw(raw).expect_err("bad level");
    assert!(matches!(err, LoadError::Invalid { key: "logging.level", .. }));
}

#[test]
fn pipeline_kind_accepts_both_spellings() {
    for spelling in ["noncaching", "non-caching", "NonCaching"] {
        let mut raw = RawSettings::default();
        raw.pipeline.default_kind = Some(spelling.to_string());
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.pipeline.default_kind, PipelineKind::Noncaching, "{spelling}");
    }

    let mut raw = RawSettings::default();
    raw.pipeline.default_kind = Some("streaming".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn explicit_file_overrides_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("custom.toml");
    fs::write(
        &path,
        r#"
[logging]
level = "debug"
json = true

[reload]
check_reload = false
delay_ms = 250

[cache]
capacity = 16
default_expires_secs = 180

[pipeline]
enable_byte_ranges = true
default_kind = "noncaching"
"#,
    )
    .expect("write config");

    let settings = load(Some(&path)).expect("load settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.logging.format, LogFormat::Json);
    assert!(!settings.reload.check_reload);
    assert_eq!(settings.reload.reload_delay_ms, 250);
    assert_eq!(settings.cache.capacity, 16);
    assert_eq!(settings.cache.default_expires_secs, 180);
    assert!(settings.pipeline.enable_byte_ranges);
    assert_eq!(settings.pipeline.default_kind, PipelineKind::Noncaching);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = load(Some(&dir.path().join("absent.toml"))).expect_err("missing file");
    assert!(matches!(err, LoadError::Build(_)));
}
