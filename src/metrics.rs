//! Prometheus exporter setup and metric descriptions.
//!
//! Metrics are recorded with the `metrics` macros at their call sites; without
//! an installed recorder they are no-ops.

use metrics::{describe_counter, describe_histogram, Unit};
use std::net::SocketAddr;
use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

/// Install the Prometheus recorder with an HTTP listener on `port`.
/// Idempotent; must be called from inside a tokio runtime.
pub fn init_metrics(port: u16) {
    INIT.call_once(|| {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
        match builder.install() {
            Ok(()) => {
                describe_metrics();
                info!("Prometheus exporter listening on http://{}/metrics", addr);
            }
            Err(e) => warn!("Prometheus exporter install failed: {}", e),
        }
    });
}

fn describe_metrics() {
    describe_counter!(
        "ingest_enqueued_total",
        Unit::Count,
        "Items submitted to the ingest queue"
    );
    describe_counter!(
        "ingest_items_total",
        Unit::Count,
        "Items that reached a terminal state, labelled by state"
    );
    describe_histogram!(
        "ingest_item_duration_seconds",
        Unit::Seconds,
        "Time to process one item end to end"
    );
    describe_counter!(
        "ingest_upserts_total",
        Unit::Count,
        "Event upserts, labelled by change type"
    );
    describe_counter!(
        "ingest_dead_letters_total",
        Unit::Count,
        "Items moved to the dead-letter queue, labelled by stage"
    );
    describe_counter!(
        "ingest_extraction_attempts_total",
        Unit::Count,
        "Requests sent to the text-generation service"
    );
    describe_counter!(
        "ingest_extraction_rate_limited_total",
        Unit::Count,
        "Requests answered with HTTP 429"
    );
    describe_histogram!(
        "ingest_extraction_duration_seconds",
        Unit::Seconds,
        "Extraction latency including retries"
    );
}
