//! Prometheus metrics for the rescheduler

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};
use std::sync::OnceLock;

use crate::error::Error;
use crate::libs::nodes::NodeRole;

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct MetricsInner {
    /// Movable pods per node labelled by role and node name
    node_pods: IntGaugeVec,
    /// Drain attempts labelled by outcome and node name
    drains: IntCounterVec,
    /// Node map sizes per role
    nodes: IntGaugeVec,
}

impl MetricsInner {
    fn new() -> Self {
        Self {
            node_pods: register_int_gauge_vec!(
                "rescheduler_node_pods",
                "Number of pods the rescheduler understands on each node",
                &["role", "node"]
            )
            .expect("Failed to register rescheduler_node_pods"),

            drains: register_int_counter_vec!(
                "rescheduler_node_drains_total",
                "Node drain attempts by outcome",
                &["outcome", "node"]
            )
            .expect("Failed to register rescheduler_node_drains_total"),

            nodes: register_int_gauge_vec!(
                "rescheduler_nodes",
                "Number of nodes currently seen in each role",
                &["role"]
            )
            .expect("Failed to register rescheduler_nodes"),
        }
    }
}

/// A lightweight handle to the global metrics
///
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct Metrics {
    _private: (),
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &'static MetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Update the movable pod count for a node
    ///
    /// # Arguments
    ///
    /// * `role` - The role of the node
    /// * `node` - The name of the node
    /// * `count` - The number of movable pods
    pub fn set_node_pods(&self, role: NodeRole, node: &str, count: usize) {
        self.inner()
            .node_pods
            .with_label_values(&[role.as_str(), node])
            .set(count as i64);
    }

    /// Record the outcome of a drain attempt
    ///
    /// # Arguments
    ///
    /// * `node` - The node that was drained
    /// * `success` - Whether the drain succeeded
    pub fn observe_drain(&self, node: &str, success: bool) {
        let outcome = if success { "Success" } else { "Failure" };
        self.inner()
            .drains
            .with_label_values(&[outcome, node])
            .inc();
    }

    /// Update the node map size for a role
    ///
    /// # Arguments
    ///
    /// * `role` - The role to update
    /// * `count` - The number of nodes seen in that role
    pub fn set_node_count(&self, role: NodeRole, count: usize) {
        self.inner()
            .nodes
            .with_label_values(&[role.as_str()])
            .set(count as i64);
    }
}

/// Render the metrics in the prometheus text format
async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (StatusCode::OK, buffer).into_response(),
        Err(error) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response(),
    }
}

/// Serve the metrics endpoint until the process exits
///
/// # Arguments
///
/// * `addr` - The address to bind to
pub async fn serve(addr: &str) -> Result<(), Error> {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
