// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for the relay broker: the axum `Router`, auth middleware,
//! and the handler modules for every client-facing and operational
//! endpoint.

pub mod auth;
pub mod http;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::health;
use crate::state::AppState;

/// Build the axum `Router` with every route in spec §6.1, auth middleware
/// layered over the client-facing surface, and CORS/tracing over all of it.
pub fn build_router(state: Arc<AppState>) -> Router {
    let max_body_bytes = state.config.max_body_bytes;
    Router::new()
        // Anthropic-shaped Messages API, native path + alias.
        .route("/api/v1/messages", post(http::messages_handler))
        .route("/claude/v1/messages", post(http::messages_handler))
        // OpenAI-shaped envelope over the same Claude-family dispatch.
        .route("/openai/claude/v1/messages", post(http::openai_messages_handler))
        // Gemini pass-through; the model and streaming-ness live in the path.
        .route("/gemini/v1beta/{*rest}", post(http::gemini_handler))
        // Key introspection / usage aggregates.
        .route("/api/v1/models", get(http::models_handler))
        .route("/api/v1/key-info", get(http::key_info_handler))
        .route("/api/v1/usage", get(http::usage_handler))
        // Health/metrics, unauthenticated.
        .route("/health", get(health::health))
        .route("/liveness", get(health::liveness))
        .route("/readiness", get(health::readiness))
        .route("/metrics", get(health::metrics))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}
