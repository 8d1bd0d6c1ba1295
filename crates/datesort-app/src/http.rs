//! Optional read-only HTTP listener exposing metrics and recent events.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use datesort_events::{EventBus, EventEnvelope};
use datesort_pipeline::ShutdownHandle;
use datesort_telemetry::{Metrics, MetricsSnapshot};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{AppError, AppResult};

const DEFAULT_EVENT_LIMIT: usize = 100;
const MAX_EVENT_LIMIT: usize = 1_000;

/// Shared state for the metrics routes.
#[derive(Clone)]
pub struct MetricsState {
    metrics: Metrics,
    events: EventBus,
}

impl MetricsState {
    /// Bundle the services the routes read from.
    #[must_use]
    pub const fn new(metrics: Metrics, events: EventBus) -> Self {
        Self { metrics, events }
    }
}

/// Build the metrics router.
#[must_use]
pub fn router(state: MetricsState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/metrics/snapshot", get(snapshot))
        .route("/events", get(events))
        .with_state(state)
}

/// Bind the metrics listener.
///
/// # Errors
///
/// Returns an error if `addr` cannot be bound.
pub async fn bind(addr: SocketAddr) -> AppResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| AppError::MetricsServer {
            operation: "metrics_server.bind",
            addr,
            source,
        })
}

/// Serve the metrics routes on `listener`, bound to `addr`, until `shutdown`
/// is requested.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(
    listener: TcpListener,
    addr: SocketAddr,
    state: MetricsState,
    shutdown: ShutdownHandle,
) -> AppResult<()> {
    info!(addr = %addr, "metrics listener started");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.requested().await })
        .await
        .map_err(|source| AppError::MetricsServer {
            operation: "metrics_server.serve",
            addr,
            source,
        })
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<MetricsState>) -> Response {
    match state.metrics.render() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(Body::from(body))
            .unwrap_or_else(|err| {
                error!(error = %err, "failed to build metrics response");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }),
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn snapshot(State(state): State<MetricsState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

#[derive(Debug, Default, Deserialize)]
struct EventsQuery {
    limit: Option<usize>,
}

async fn events(
    State(state): State<MetricsState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<EventEnvelope>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .min(MAX_EVENT_LIMIT);
    Json(state.events.recent(limit))
}
