//! Loader metrics.
//!
//! Instruments come from the global OpenTelemetry meter, so they are
//! no-ops until a meter provider is installed, for example with
//! [`initialize_metrics`].

use std::sync::Mutex;

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry_sdk::metrics::{Aggregation, Instrument, MeterProvider, Stream};
use prometheus::{default_registry, Encoder, TextEncoder};

use crate::errors::{Error, Result};

#[macro_export]
macro_rules! with_timer {
    ($histogram: expr, $labels: expr, $body: expr) => {{
        let now = std::time::Instant::now();
        let res = $body;
        $histogram.record(now.elapsed().as_secs_f64(), &$labels);
        res
    }};
}

/// Instruments owned by one loader.
pub(crate) struct LoaderMetrics {
    pub(crate) sessions: Counter<u64>,
    pub(crate) items: Counter<u64>,
    pub(crate) next_duration: Histogram<f64>,
}

impl LoaderMetrics {
    pub(crate) fn new() -> Self {
        let meter = global::meter("pipeloader");
        Self {
            sessions: meter
                .u64_counter("loader.sessions")
                .with_description("iteration sessions started")
                .init(),
            items: meter
                .u64_counter("loader.items")
                .with_description("elements pulled through loader iterators")
                .init(),
            next_duration: meter
                .f64_histogram("loader.next.duration")
                .with_description("time to pull one element in seconds")
                .init(),
        }
    }
}

static INSTALLED: Mutex<bool> = Mutex::new(false);

/// Install a Prometheus-backed global meter provider.
///
/// Only the first successful call installs anything; later calls
/// return `Ok(())`.
pub fn initialize_metrics() -> Result<()> {
    let mut installed = INSTALLED
        .lock()
        .map_err(|_err| Error::Configuration("metrics setup lock poisoned".to_string()))?;
    if *installed {
        return Ok(());
    }

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(default_registry().clone())
        .with_namespace("pipeloader")
        .build()
        .map_err(|err| Error::Configuration(err.to_string()))?;

    let provider = MeterProvider::builder()
        .with_reader(exporter)
        .with_view(
            opentelemetry_sdk::metrics::new_view(
                Instrument::new().name("*duration*"),
                Stream::new().aggregation(Aggregation::ExplicitBucketHistogram {
                    boundaries: vec![
                        0.0, 0.00001, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
                        5.0, 10.0,
                    ],
                    record_min_max: true,
                }),
            )
            .map_err(|err| Error::Configuration(err.to_string()))?,
        )
        .build();
    global::set_meter_provider(provider);

    *installed = true;
    tracing::debug!("Installed Prometheus meter provider");
    Ok(())
}

/// Render the Prometheus text exposition of the default registry.
pub fn render() -> Result<String> {
    let mut buf = Vec::new();
    TextEncoder::new()
        .encode(&default_registry().gather(), &mut buf)
        .map_err(|err| Error::Configuration(err.to_string()))?;
    String::from_utf8(buf).map_err(|err| Error::Configuration(err.to_string()))
}
