// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Liveness/readiness probes and the plain-text metrics scrape.

pub mod metrics;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

pub use metrics::Metrics;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub kv_reachable: bool,
}

/// `GET /health`: aggregate status, always 200 — degraded state is reported
/// in the body rather than the status code, so load balancers don't flap.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let kv_reachable = probe_kv(&state).await;
    Json(HealthResponse { status: if kv_reachable { "ok" } else { "degraded" }, kv_reachable })
}

/// `GET /liveness`: process-alive probe. Never touches the KV store — a
/// wedged Redis connection shouldn't trigger a container restart.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// `GET /readiness`: ready to serve, meaning the KV store answers.
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    if probe_kv(&state).await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// `GET /metrics`: plain-text Prometheus exposition of the process's rolling
/// counters.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn probe_kv(state: &AppState) -> bool {
    state.kv.set("health:probe", "1", Some(30)).await.is_ok()
}
