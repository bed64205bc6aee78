// src/status.rs
//! Read-only status endpoints: liveness, Prometheus metrics, followed feeds.

use axum::{extract::State, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::ingest::SiteTable;
use crate::shutdown;

#[derive(Clone)]
pub struct StatusState {
    pub sites: SiteTable,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Serialize)]
pub struct FeedView {
    pub site: String,
    pub kind: String,
    pub query: String,
    pub polling: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_query_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_post_time: Option<i64>,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/metrics", get(metrics))
        .route("/feeds", get(feeds))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn metrics(State(state): State<StatusState>) -> String {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

async fn feeds(State(state): State<StatusState>) -> Json<Vec<FeedView>> {
    let mut out = Vec::new();
    for (site, handle) in state.sites.iter() {
        let (queued, busy) = handle.registry.snapshot();
        out.extend(queued.into_iter().map(|f| FeedView {
            site: site.name().to_string(),
            kind: f.kind.to_string(),
            query: f.query,
            polling: false,
            last_query_time: Some(f.last_query_time.to_rfc3339()),
            last_post_time: Some(f.last_post_time),
        }));
        out.extend(busy.into_iter().map(|k| FeedView {
            site: site.name().to_string(),
            kind: k.kind.to_string(),
            query: k.query,
            polling: true,
            last_query_time: None,
            last_post_time: None,
        }));
    }
    Json(out)
}

/// Serve until shutdown is requested.
pub async fn serve(
    addr: std::net::SocketAddr,
    state: StatusState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(target: "status", %addr, "status server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown::requested(&mut shutdown_rx).await })
        .await?;
    Ok(())
}
