use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};
use crate::processor::{
    METRIC_TREE_BUILD_MS, METRIC_TREE_REBUILD_FAILED_TOTAL, METRIC_TREE_REBUILD_TOTAL,
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register units and help text for every metric the crate emits. Safe to
/// call repeatedly.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "sitemap_cache_hit_total",
            Unit::Count,
            "Pipeline outputs served from the cache."
        );
        describe_counter!(
            "sitemap_cache_miss_total",
            Unit::Count,
            "Cacheable pipeline requests that had to run the pipeline."
        );
        describe_counter!(
            "sitemap_cache_store_total",
            Unit::Count,
            "Pipeline outputs written to the cache."
        );
        describe_counter!(
            "sitemap_cache_purge_total",
            Unit::Count,
            "Cache entries removed on request."
        );
        describe_counter!(
            "sitemap_cache_evict_total",
            Unit::Count,
            "Cache entries evicted for capacity or invalidity."
        );
        describe_counter!(
            METRIC_TREE_REBUILD_TOTAL,
            Unit::Count,
            "Sitemap trees compiled and published."
        );
        describe_counter!(
            METRIC_TREE_REBUILD_FAILED_TOTAL,
            Unit::Count,
            "Sitemap tree builds that failed."
        );
        describe_histogram!(
            METRIC_TREE_BUILD_MS,
            Unit::Milliseconds,
            "Sitemap tree build latency in milliseconds."
        );
    });
}
