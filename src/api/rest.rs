//! REST API Handlers
//!
//! Implements the REST endpoints the console frontend consumes: the
//! aggregated cluster view, controller metrics, the benchmark lifecycle,
//! and settings.

use crate::bench::{self, BenchmarkRunner, RunRequest};
use crate::client::ApiProxy;
use crate::cluster::{Aggregator, AggregatorConfig};
use crate::config::{Settings, SettingsStore};
use crate::metrics;
use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Benchmark start response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBenchmarkResponse {
    pub job_name: String,
    pub pvc_name: String,
    pub status: String,
}

/// History query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub namespace: Option<String>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn api_error(
    status: StatusCode,
    error: &str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        Json(ApiErrorResponse {
            error: error.into(),
            message: message.into(),
            details: None,
        }),
    )
        .into_response()
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    aggregator: Arc<Aggregator>,
    runner: Arc<BenchmarkRunner>,
    proxy: Arc<dyn ApiProxy>,
    settings: Arc<SettingsStore>,
    config: AggregatorConfig,
}

impl RestRouter {
    pub fn new(
        aggregator: Arc<Aggregator>,
        runner: Arc<BenchmarkRunner>,
        proxy: Arc<dyn ApiProxy>,
        settings: Arc<SettingsStore>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            aggregator,
            runner,
            proxy,
            settings,
            config,
        }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            aggregator: self.aggregator,
            runner: self.runner,
            proxy: self.proxy,
            settings: self.settings,
            config: self.config,
        };

        Router::new()
            // Cluster state
            .route("/v1/state", get(get_state))
            .route("/v1/refresh", post(trigger_refresh))
            // Controller metrics
            .route("/v1/metrics", get(get_metrics))
            // Benchmark lifecycle
            .route("/v1/benchmark", get(get_benchmark))
            .route("/v1/benchmark", post(start_benchmark))
            .route("/v1/benchmark", delete(delete_benchmark))
            .route("/v1/benchmark/history", get(benchmark_history))
            // Settings
            .route("/v1/settings", get(get_settings))
            .route("/v1/settings", put(put_settings))
            // Health endpoint
            .route("/health", get(health_check))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    aggregator: Arc<Aggregator>,
    runner: Arc<BenchmarkRunner>,
    proxy: Arc<dyn ApiProxy>,
    settings: Arc<SettingsStore>,
    config: AggregatorConfig,
}

// =============================================================================
// Handlers
// =============================================================================

/// Current aggregated view
async fn get_state(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.aggregator.current().as_ref().clone())
}

/// Kick off a new refresh cycle
async fn trigger_refresh(State(state): State<AppState>) -> impl IntoResponse {
    state.aggregator.refresh();
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "refreshing" })),
    )
}

/// Controller pod metrics
async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let view = state.aggregator.current();
    let Some(pod_name) = view
        .controller_pods
        .first()
        .and_then(|p| p.metadata.name.as_deref())
    else {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "no_controller_pod",
            "No driver controller pod found",
        );
    };

    match metrics::fetch_controller_metrics(
        state.proxy.as_ref(),
        pod_name,
        &state.config.driver_namespace,
    )
    .await
    {
        Ok(metrics) => (StatusCode::OK, Json(metrics)).into_response(),
        Err(e) => {
            error!(pod = pod_name, "metrics fetch failed: {}", e);
            api_error(StatusCode::BAD_GATEWAY, "metrics_fetch_failed", e.to_string())
        }
    }
}

/// Current benchmark state
async fn get_benchmark(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.runner.state())
}

/// Start a benchmark run
async fn start_benchmark(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> impl IntoResponse {
    if request.storage_class.is_empty() {
        return api_error(
            StatusCode::BAD_REQUEST,
            "missing_storage_class",
            "storageClass must be set",
        );
    }

    info!(
        storage_class = %request.storage_class,
        namespace = %request.namespace,
        "benchmark run requested"
    );
    let (job_name, pvc_name) = state.runner.start(request);
    (
        StatusCode::ACCEPTED,
        Json(StartBenchmarkResponse {
            job_name,
            pvc_name,
            status: "started".into(),
        }),
    )
        .into_response()
}

/// Stop the active run and delete its resources
async fn delete_benchmark(State(state): State<AppState>) -> impl IntoResponse {
    match state.runner.cleanup_active().await {
        Ok(Some(run)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "cleaned",
                "jobName": run.job_name,
                "pvcName": run.pvc_name,
            })),
        )
            .into_response(),
        Ok(None) => api_error(
            StatusCode::CONFLICT,
            "no_active_run",
            "No benchmark run to clean up",
        ),
        Err(e) => {
            error!("benchmark cleanup failed: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "cleanup_failed", e.to_string())
        }
    }
}

/// Past benchmark runs, from the cluster
async fn benchmark_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    match bench::list_jobs(state.proxy.as_ref(), query.namespace.as_deref()).await {
        Ok(jobs) => (StatusCode::OK, Json(jobs)).into_response(),
        Err(e) => {
            error!("history listing failed: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "history_failed",
                e.to_string(),
            )
        }
    }
}

/// Current settings
async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.settings.current())
}

/// Replace settings
async fn put_settings(
    State(state): State<AppState>,
    Json(settings): Json<Settings>,
) -> impl IntoResponse {
    match state.settings.update(settings) {
        Ok(saved) => (StatusCode::OK, Json(saved)).into_response(),
        Err(e) => {
            error!("settings update failed: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "settings_write_failed",
                e.to_string(),
            )
        }
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
