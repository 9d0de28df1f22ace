//! Admin HTTP surface: liveness, readiness, Prometheus metrics.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use voxline_core::ports::{SessionStore, SttEngine, TtsEngine};
use voxline_store::StoreApi;

use crate::registry::CallRegistry;

/// Per-dependency budget for the readiness probes.
const PROBE_BUDGET: Duration = Duration::from_secs(3);

/// Everything the admin handlers read from.
pub struct AdminDeps {
    pub registry: Arc<CallRegistry>,
    pub sessions: Arc<dyn SessionStore>,
    pub stt: Arc<dyn SttEngine>,
    pub tts: Arc<dyn TtsEngine>,
    pub store: Arc<StoreApi>,
    pub metrics: PrometheusHandle,
}

/// Build the admin router.
pub fn router(deps: Arc<AdminDeps>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .route("/metrics", get(metrics_text))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(deps)
}

/// Serve the admin surface until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    deps: Arc<AdminDeps>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "Admin server listening");

    axum::serve(listener, router(deps))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    tracing::info!("Admin server stopped");
    Ok(())
}

/// Liveness: the process responds and reports KV reachability.
async fn health(State(deps): State<Arc<AdminDeps>>) -> impl IntoResponse {
    let kv = match tokio::time::timeout(PROBE_BUDGET, deps.sessions.ping()).await {
        Ok(Ok(())) => "connected",
        _ => "disconnected",
    };

    Json(json!({
        "status": "ok",
        "active_calls": deps.registry.len(),
        "kv": kv,
    }))
}

/// Readiness: every downstream dependency answers within the budget.
async fn ready(State(deps): State<Arc<AdminDeps>>) -> impl IntoResponse {
    let (kv, store, stt, tts) = tokio::join!(
        probe(deps.sessions.ping()),
        probe(deps.store.client().probe()),
        probe(deps.stt.probe()),
        probe(deps.tts.probe()),
    );

    let all_ready = [&kv, &store, &stt, &tts].iter().all(|s| s.as_str() == "ok");
    let body = Json(json!({
        "status": if all_ready { "ready" } else { "not_ready" },
        "dependencies": {
            "kv": kv,
            "store": store,
            "stt": stt,
            "tts": tts,
        }
    }));

    if all_ready {
        (StatusCode::OK, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body)
    }
}

/// Prometheus text exposition.
async fn metrics_text(State(deps): State<Arc<AdminDeps>>) -> impl IntoResponse {
    deps.metrics.render()
}

/// Run one probe under the shared budget, mapping the outcome to a label.
async fn probe<E: std::fmt::Display>(
    fut: impl Future<Output = Result<(), E>>,
) -> String {
    match tokio::time::timeout(PROBE_BUDGET, fut).await {
        Ok(Ok(())) => "ok".to_string(),
        Ok(Err(e)) => format!("error: {e}"),
        Err(_) => "timeout".to_string(),
    }
}
