//! Configuration layer: typed settings with layered precedence
//! (defaults → `sitemap.toml` → explicit file → environment).

use std::{path::Path, str::FromStr};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheConfig, MAX_EXPIRES_SECS};
use crate::pipeline::{PipelineConfig, PipelineKind};
use crate::processor::ReloadSettings;

const LOCAL_CONFIG_BASENAME: &str = "sitemap";
const ENV_PREFIX: &str = "SITEMAP";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub reload: ReloadSettings,
    pub cache: CacheConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings. `config_file`, when given, must exist.
///
/// Environment variables use the `SITEMAP__` prefix with `__` between
/// sections, e.g. `SITEMAP__CACHE__CAPACITY=500`.
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder =
        Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
            reload: ReloadSettings::default(),
            cache: CacheConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    reload: RawReloadSettings,
    cache: RawCacheSettings,
    pipeline: RawPipelineSettings,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            reload,
            cache,
            pipeline,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            reload: build_reload_settings(reload),
            cache: build_cache_settings(cache)?,
            pipeline: build_pipeline_settings(pipeline)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_reload_settings(reload: RawReloadSettings) -> ReloadSettings {
    let defaults = ReloadSettings::default();
    ReloadSettings {
        check_reload: reload.check_reload.unwrap_or(defaults.check_reload),
        reload_delay_ms: reload.delay_ms.unwrap_or(defaults.reload_delay_ms),
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let capacity = cache.capacity.unwrap_or(defaults.capacity);
    if capacity == 0 {
        return Err(LoadError::invalid("cache.capacity", "must be greater than zero"));
    }

    let max_entry_bytes = cache.max_entry_bytes.unwrap_or(defaults.max_entry_bytes);
    if max_entry_bytes == 0 {
        return Err(LoadError::invalid(
            "cache.max_entry_bytes",
            "must be greater than zero",
        ));
    }

    // Every negative value means "ask the stages".
    let default_expires_secs = cache
        .default_expires_secs
        .unwrap_or(defaults.default_expires_secs)
        .max(-1);
    if default_expires_secs > MAX_EXPIRES_SECS {
        return Err(LoadError::invalid(
            "cache.default_expires_secs",
            format!("must not exceed {MAX_EXPIRES_SECS} seconds"),
        ));
    }

    Ok(CacheConfig {
        enable_cache: cache.enable_cache.unwrap_or(defaults.enable_cache),
        capacity,
        default_expires_secs,
        max_entry_bytes,
    })
}

fn build_pipeline_settings(pipeline: RawPipelineSettings) -> Result<PipelineConfig, LoadError> {
    let default_kind = match pipeline.default_kind.as_deref().map(str::to_ascii_lowercase) {
        None => PipelineKind::default(),
        Some(kind) => match kind.as_str() {
            "caching" => PipelineKind::Caching,
            "noncaching" | "non-caching" => PipelineKind::Noncaching,
            other => {
                return Err(LoadError::invalid(
                    "pipeline.default_kind",
                    format!("unknown pipeline kind `{other}`"),
                ));
            }
        },
    };

    Ok(PipelineConfig {
        enable_byte_ranges: pipeline.enable_byte_ranges.unwrap_or(false),
        default_kind,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawReloadSettings {
    check_reload: Option<bool>,
    delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enable_cache: Option<bool>,
    capacity: Option<usize>,
    default_expires_secs: Option<i64>,
    max_entry_bytes: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPipelineSettings {
    enable_byte_ranges: Option<bool>,
    default_kind: Option<String>,
}

#[cfg(test)]
mod tests;
