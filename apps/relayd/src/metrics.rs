//! Prometheus exporter for relay metrics.

use metrics::describe_counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Install the recorder and serve `/metrics` on `addr`. Must run inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    describe_counter!(
        "relay_deployments_dispatched_total",
        "Signed deployment requests published"
    );
    describe_counter!(
        "relay_messages_discarded_total",
        "Messages dropped before execution, by reason"
    );
    describe_counter!(
        "relay_kubernetes_resources_total",
        "Kubernetes resources applied"
    );
    describe_counter!(
        "relay_status_dropped_total",
        "Statuses dropped because the reporter queue was full"
    );

    Ok(())
}
