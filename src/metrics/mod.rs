//! Driver controller metrics
//!
//! - [`text`]: Prometheus exposition text decoder
//! - [`extract`]: typed extraction of the driver's well-known families

pub mod extract;
pub mod text;

pub use extract::{extract, DriverMetrics};
pub use text::{decode, MetricFamilies, MetricFamily, MetricSample};

use crate::client::ApiProxy;
use crate::error::Result;
use tracing::debug;

/// Port the driver controller exposes its metrics on.
pub const CONTROLLER_METRICS_PORT: u16 = 8080;

/// Fetch and decode the controller pod's metrics through the API-server pod
/// proxy. A response that is not text surfaces as a shape error.
pub async fn fetch_controller_metrics(
    proxy: &dyn ApiProxy,
    pod_name: &str,
    namespace: &str,
) -> Result<DriverMetrics> {
    let path = format!(
        "/api/v1/namespaces/{}/pods/{}:{}/proxy/metrics",
        namespace, pod_name, CONTROLLER_METRICS_PORT
    );
    let body = proxy.get_text(&path).await?;
    debug!(pod = pod_name, bytes = body.len(), "fetched controller metrics");
    Ok(extract(&decode(&body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::MockProxy;

    #[tokio::test]
    async fn test_fetch_controller_metrics_decodes_text() {
        let proxy = MockProxy::new();
        proxy.enqueue_text(
            "GET /api/v1/namespaces/kube-system/pods/ctrl-0:8080/proxy/metrics",
            "tns_websocket_connected 1\n",
        );
        let metrics = fetch_controller_metrics(&proxy, "ctrl-0", "kube-system")
            .await
            .unwrap();
        assert_eq!(metrics.websocket_connected, Some(1.0));
    }

    #[tokio::test]
    async fn test_fetch_controller_metrics_non_text_is_shape_error() {
        let proxy = MockProxy::new();
        proxy.enqueue_json(
            "GET /api/v1/namespaces/kube-system/pods/ctrl-0:8080/proxy/metrics",
            serde_json::json!({}),
        );
        let err = fetch_controller_metrics(&proxy, "ctrl-0", "kube-system")
            .await
            .unwrap_err();
        assert!(err.is_shape_error());
    }
}
