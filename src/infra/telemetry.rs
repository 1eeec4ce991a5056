use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pagecache_hit_total",
            Unit::Count,
            "Total number of requests served from the decoded tier."
        );
        describe_counter!(
            "pagecache_miss_total",
            Unit::Count,
            "Total number of requests rendered by the origin."
        );
        describe_counter!(
            "pagecache_transfer_total",
            Unit::Count,
            "Total number of requests served after promotion from the compressed tier."
        );
        describe_counter!(
            "pagecache_disabled_total",
            Unit::Count,
            "Total number of requests seen while population was disabled."
        );
        describe_counter!(
            "pagecache_evict_total",
            Unit::Count,
            "Total number of capacity evictions, by tier."
        );
        describe_gauge!(
            "pagecache_process_memory_bytes",
            Unit::Bytes,
            "Process resident memory sampled at eviction time, by tier and cache size."
        );
        describe_counter!(
            "pagecache_patch_violation_total",
            Unit::Count,
            "Cached pages served without exactly one occurrence of a marker."
        );
        describe_counter!(
            "pagecache_decompress_failure_total",
            Unit::Count,
            "Compressed pages dropped because they could not be promoted."
        );
        describe_counter!(
            "pagecache_capture_total",
            Unit::Count,
            "Capture attempts after delivery, by outcome."
        );
        describe_histogram!(
            "pagecache_capture_ms",
            Unit::Milliseconds,
            "Time spent parsing and compressing a captured page."
        );
    });
}
