use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing::Subscriber;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, Layer, fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_CACHE_HIT, METRIC_CACHE_MISS, METRIC_CACHE_STALE, METRIC_PURGE_FAILURE,
    METRIC_STORE_ERROR, METRIC_TAG_REVALIDATE,
};
use crate::config::{LogFormat, LoggingSettings};
use crate::context::METRIC_BACKGROUND_SETTLE_MS;

use super::error::InfraError;

static DESCRIBED: Once = Once::new();

const COUNTERS: &[(&str, &str)] = &[
    (METRIC_CACHE_HIT, "Lookups answered with a fresh entry."),
    (METRIC_CACHE_MISS, "Lookups that found no usable entry."),
    (
        METRIC_CACHE_STALE,
        "Lookups whose best entry had expired or been revalidated by tag.",
    ),
    (METRIC_STORE_ERROR, "Object store reads degraded to a miss."),
    (METRIC_TAG_REVALIDATE, "Tags marked revalidated."),
    (METRIC_PURGE_FAILURE, "Shared cache purge requests that failed."),
];

/// Install the global subscriber: env filter seeded from the configured
/// level, span traces for errors, then the configured output format.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default())
        .with(output_layer(logging.format))
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("tracing subscriber already set: {err}")))
}

fn output_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let layer = fmt::layer().with_target(true);
    match format {
        // Request spans carry the request id, so keep them on every line.
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

pub fn describe_metrics() {
    DESCRIBED.call_once(|| {
        for (name, description) in COUNTERS {
            describe_counter!(*name, Unit::Count, *description);
        }
        describe_histogram!(
            METRIC_BACKGROUND_SETTLE_MS,
            Unit::Milliseconds,
            "Wait for a request's background work to settle before the body ends."
        );
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn counter_names_are_unique_and_namespaced() {
        let names: HashSet<_> = COUNTERS.iter().map(|(name, _)| *name).collect();
        assert_eq!(names.len(), COUNTERS.len());
        assert!(names.iter().all(|name| name.starts_with("revalidator_")));
        assert!(!names.contains(METRIC_BACKGROUND_SETTLE_MS));
    }
}
