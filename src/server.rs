//! HTTP endpoints serving the published feeds.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;

use crate::feed::SnapshotStore;
use crate::stats::{FeedMetrics, FeedMetricsSnapshot, RequestCounter, render_prometheus};

const INDEX_HTML: &str = include_str!("index.html");

/// Read handles for everything the server exposes.
#[derive(Clone)]
pub struct AppState {
    pub trip_updates: SnapshotStore,
    pub trip_update_metrics: Arc<FeedMetrics>,
    /// Present only when alerts are published.
    pub alerts: Option<(SnapshotStore, Arc<FeedMetrics>)>,
    pub trip_update_requests: Arc<RequestCounter>,
    pub alert_requests: Arc<RequestCounter>,
}

impl AppState {
    pub fn new(
        trip_updates: SnapshotStore,
        trip_update_metrics: Arc<FeedMetrics>,
        alerts: Option<(SnapshotStore, Arc<FeedMetrics>)>,
    ) -> Self {
        Self {
            trip_updates,
            trip_update_metrics,
            alerts,
            trip_update_requests: Arc::new(RequestCounter::new(
                "path_train_gtfsrt_trip_feed_num_requests",
                "Number of requests for the trip update feed",
            )),
            alert_requests: Arc::new(RequestCounter::new(
                "path_train_gtfsrt_port_authority_alert_feed_num_requests",
                "Number of requests for the Port Authority alert feed",
            )),
        }
    }

    fn metrics(&self) -> Vec<&FeedMetrics> {
        let mut metrics = vec![self.trip_update_metrics.as_ref()];
        if let Some((_, m)) = &self.alerts {
            metrics.push(m.as_ref());
        }
        metrics
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/gtfsrt", get(trip_update_feed))
        .route("/port_authority_alerts", get(alert_feed))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/health", get(health))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

fn protobuf(store: &SnapshotStore) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/x-protobuf")],
        store.get(),
    )
        .into_response()
}

async fn trip_update_feed(State(state): State<AppState>) -> Response {
    let resp = protobuf(&state.trip_updates);
    state.trip_update_requests.record(resp.status().as_u16());
    resp
}

async fn alert_feed(State(state): State<AppState>) -> Response {
    let resp = match &state.alerts {
        Some((store, _)) => protobuf(store),
        None => (StatusCode::NOT_FOUND, "alerts are not published").into_response(),
    };
    state.alert_requests.record(resp.status().as_u16());
    resp
}

async fn metrics(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render_prometheus(
            &state.metrics(),
            &[
                state.trip_update_requests.as_ref(),
                state.alert_requests.as_ref(),
            ],
        ),
    )
        .into_response()
}

#[derive(Serialize)]
struct FeedStatus {
    feed: &'static str,
    #[serde(flatten)]
    metrics: FeedMetricsSnapshot,
}

async fn status(State(state): State<AppState>) -> Response {
    let feeds: Vec<FeedStatus> = state
        .metrics()
        .into_iter()
        .map(|m| FeedStatus {
            feed: m.feed(),
            metrics: m.snapshot(),
        })
        .collect();
    match serde_json::to_string_pretty(&feeds) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn health() -> &'static str {
    "OK"
}
