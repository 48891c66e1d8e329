//! OpenTelemetry metrics.
//!
//! Key metrics:
//! - pubsub_publish_total: Counter of publishes, by topic kind
//! - pubsub_publish_fanout: Histogram of subscribers reached per publish
//! - pubsub_delivery_failures_total: Counter of frames not enqueued, by reason
//! - pubsub_status_transitions_total: Counter of connection status changes
//!
//! Recording before [`init_metrics`] is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Broker metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Total number of publish operations.
    pub publish_total: Counter<u64>,
    /// Subscribers addressed by each publish.
    pub publish_fanout: Histogram<u64>,
    /// Frames that could not be enqueued.
    pub delivery_failures: Counter<u64>,
    /// Connection status transitions.
    pub status_transitions: Counter<u64>,
}

impl Metrics {
    /// Create a new metrics registry from a meter.
    fn new(meter: &Meter) -> Self {
        Self {
            publish_total: meter
                .u64_counter("pubsub_publish_total")
                .with_description("Total number of publish operations")
                .with_unit("1")
                .init(),
            publish_fanout: meter
                .u64_histogram("pubsub_publish_fanout")
                .with_description("Subscribers addressed per publish")
                .with_unit("1")
                .init(),
            delivery_failures: meter
                .u64_counter("pubsub_delivery_failures_total")
                .with_description("Frames dropped because a stream was full, closed or idle")
                .with_unit("1")
                .init(),
            status_transitions: meter
                .u64_counter("pubsub_status_transitions_total")
                .with_description("Connection status transitions")
                .with_unit("1")
                .init(),
        }
    }
}

fn manual_provider() -> SdkMeterProvider {
    let reader = ManualReader::builder().build();
    SdkMeterProvider::builder().with_reader(reader).build()
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
///
/// # Arguments
///
/// * `otel_endpoint` - Optional OTLP endpoint for metrics export
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        if let Some(endpoint) = otel_endpoint {
            use opentelemetry_otlp::{Protocol, WithExportConfig};

            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::Grpc);

            match opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_period(std::time::Duration::from_secs(10))
                .build()
            {
                Ok(provider) => {
                    global::set_meter_provider(provider);
                    tracing::info!(endpoint, "OTLP metrics exporter configured");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create OTLP exporter, metrics stay local");
                    global::set_meter_provider(manual_provider());
                }
            }
        } else {
            // Recorded but not exported.
            global::set_meter_provider(manual_provider());
        }

        let meter = global::meter("pubsub-sse");
        Metrics::new(&meter)
    });
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

/// Get the global metrics instance, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Record one publish and the number of subscribers it addressed.
pub fn record_publish(kind: &str, fanout: usize) {
    if let Some(m) = METRICS.get() {
        let attrs = [KeyValue::new("kind", kind.to_string())];
        m.publish_total.add(1, &attrs);
        m.publish_fanout.record(fanout as u64, &attrs);
    }
}

/// Record a frame that could not be enqueued.
///
/// `reason` is one of `stream_full`, `not_receiving` or `closed`.
pub fn record_delivery_failure(reason: &'static str) {
    if let Some(m) = METRICS.get() {
        m.delivery_failures
            .add(1, &[KeyValue::new("reason", reason)]);
    }
}

/// Record a connection entering `status`.
pub fn record_status_transition(status: &'static str) {
    if let Some(m) = METRICS.get() {
        m.status_transitions
            .add(1, &[KeyValue::new("status", status)]);
    }
}
