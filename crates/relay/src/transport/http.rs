// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-facing handlers: Anthropic/OpenAI-shim/Gemini Messages dispatch,
//! key introspection, and usage aggregates.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::account::Provider;
use crate::accounting::{DailyRollup, QuotaOutcome};
use crate::apikey::{ApiKeyRecord, ApiKeyState, OverdrawPolicy, Quotas};
use crate::crypto::sha256_hex;
use crate::error::RelayError;
use crate::relay::MessagesRequest;
use crate::state::AppState;

/// Claude-family providers tried in order for the Anthropic-shaped
/// endpoints. The client never names which credential flavor backs a
/// request; the scheduler resolves to whichever pool actually has a usable
/// account, so the handler just walks the chain until one accepts.
const CLAUDE_PROVIDER_CHAIN: [Provider; 3] =
    [Provider::ClaudeOauth, Provider::ClaudeConsole, Provider::Bedrock];

/// `POST /api/v1/messages`, `POST /claude/v1/messages`.
pub async fn messages_handler(
    State(state): State<Arc<AppState>>,
    Extension(key): Extension<Arc<ApiKeyRecord>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch_claude_family(&state, key, headers, body, "/v1/messages", false).await
}

/// `POST /openai/claude/v1/messages`.
pub async fn openai_messages_handler(
    State(state): State<Arc<AppState>>,
    Extension(key): Extension<Arc<ApiKeyRecord>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch_claude_family(&state, key, headers, body, "/v1/messages", true).await
}

/// `POST /gemini/v1beta/*`: pass-through, model and streaming-ness are both
/// carried in the path rather than the body.
pub async fn gemini_handler(
    State(state): State<Arc<AppState>>,
    Extension(key): Extension<Arc<ApiKeyRecord>>,
    Path(rest): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.metrics.inc_requests();
    let model = extract_gemini_model(&rest);

    if let Some(resp) = reject_unsupported_model(&key, &model) {
        state.metrics.inc_requests_errored();
        return resp;
    }

    let body_json: Option<Value> = serde_json::from_slice(&body).ok();
    let estimated_tokens = estimate_tokens(body_json.as_ref());
    let mut key = (*key).clone();

    match state.accounting.check_quota(&key, estimated_tokens).await {
        Ok(QuotaOutcome::Allow) => {}
        Ok(QuotaOutcome::ThrottleFor { retry_after_secs }) => {
            state.metrics.inc_requests_errored();
            return RelayError::QuotaExceeded { retry_after_secs }.into_response();
        }
        Err(_) => {
            state.metrics.inc_requests_errored();
            return RelayError::Internal.into_response();
        }
    }

    let streaming = rest.contains("streamGenerateContent");
    let fingerprint = session_fingerprint(body_json.as_ref());
    let req = MessagesRequest {
        provider: Provider::Gemini,
        upstream_path: format!("/v1beta/{rest}"),
        method: reqwest::Method::POST,
        headers,
        body,
        model,
        streaming,
        openai_shim: false,
        session_fingerprint: fingerprint,
    };

    let result = state.relay.dispatch(&mut key, req, CancellationToken::new()).await;
    state.accounting.release_concurrency(&key.id).await.ok();
    finish(&state, result)
}

async fn dispatch_claude_family(
    state: &Arc<AppState>,
    key: Arc<ApiKeyRecord>,
    headers: HeaderMap,
    body: Bytes,
    upstream_path: &str,
    openai_shim: bool,
) -> Response {
    state.metrics.inc_requests();
    let body_json: Option<Value> = serde_json::from_slice(&body).ok();
    let model = body_json
        .as_ref()
        .and_then(|v| v.get("model"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_owned();

    if let Some(resp) = reject_unsupported_model(&key, &model) {
        state.metrics.inc_requests_errored();
        return resp;
    }

    let mut key = (*key).clone();
    let estimated_tokens = estimate_tokens(body_json.as_ref());

    match state.accounting.check_quota(&key, estimated_tokens).await {
        Ok(QuotaOutcome::Allow) => {}
        Ok(QuotaOutcome::ThrottleFor { retry_after_secs }) => {
            state.metrics.inc_requests_errored();
            return RelayError::QuotaExceeded { retry_after_secs }.into_response();
        }
        Err(_) => {
            state.metrics.inc_requests_errored();
            return RelayError::Internal.into_response();
        }
    }

    let streaming = wants_streaming(&headers, body_json.as_ref());
    let fingerprint = session_fingerprint(body_json.as_ref());
    let cancel = CancellationToken::new();

    let mut last_err = RelayError::NoAccountAvailable { retry_after_secs: 5 };
    let mut outcome = None;
    for provider in CLAUDE_PROVIDER_CHAIN {
        let req = MessagesRequest {
            provider,
            upstream_path: upstream_path.to_owned(),
            method: reqwest::Method::POST,
            headers: headers.clone(),
            body: body.clone(),
            model: model.clone(),
            streaming,
            openai_shim,
            session_fingerprint: fingerprint.clone(),
        };
        match state.relay.dispatch(&mut key, req, cancel.clone()).await {
            Ok(resp) => {
                outcome = Some(Ok(resp));
                break;
            }
            Err(RelayError::NoAccountAvailable { retry_after_secs }) => {
                last_err = RelayError::NoAccountAvailable { retry_after_secs };
                continue;
            }
            Err(e) => {
                outcome = Some(Err(e));
                break;
            }
        }
    }

    state.accounting.release_concurrency(&key.id).await.ok();
    finish(state, outcome.unwrap_or(Err(last_err)))
}

fn finish(state: &Arc<AppState>, result: Result<Response, RelayError>) -> Response {
    match result {
        Ok(resp) => resp,
        Err(e) => {
            state.metrics.inc_requests_errored();
            e.into_response()
        }
    }
}

/// `BadRequest` when the client's own allow-list doesn't cover `model`; an
/// empty allow-list means the key isn't restricted.
fn reject_unsupported_model(key: &ApiKeyRecord, model: &str) -> Option<Response> {
    if key.allowed_model_patterns.is_empty() {
        return None;
    }
    let allowed = key.allowed_model_patterns.iter().any(|p| model_glob_match(p, model));
    if allowed {
        None
    } else {
        Some(RelayError::BadRequest(format!("model `{model}` not permitted for this key")).into_response())
    }
}

fn model_glob_match(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}

fn estimate_tokens(body_json: Option<&Value>) -> u64 {
    body_json.and_then(|v| v.get("max_tokens")).and_then(|v| v.as_u64()).unwrap_or(1024)
}

fn wants_streaming(headers: &HeaderMap, body_json: Option<&Value>) -> bool {
    let accepts_sse = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false);
    accepts_sse || body_json.and_then(|v| v.get("stream")).and_then(|v| v.as_bool()).unwrap_or(false)
}

/// `models/{name}:generateContent` → `{name}`.
fn extract_gemini_model(rest: &str) -> String {
    let before_colon = rest.split(':').next().unwrap_or(rest);
    before_colon.strip_prefix("models/").unwrap_or(before_colon).to_owned()
}

/// Session fingerprint: SHA-256 over a stable projection of the request —
/// the system prompt plus a prefix of the first user message — so repeated
/// calls in the same conversation land on the same sticky mapping.
fn session_fingerprint(body_json: Option<&Value>) -> String {
    let mut projection = String::new();
    if let Some(v) = body_json {
        match v.get("system") {
            Some(Value::String(s)) => projection.push_str(s),
            Some(Value::Array(parts)) => {
                for part in parts {
                    if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                        projection.push_str(text);
                    }
                }
            }
            _ => {}
        }
        if let Some(messages) = v.get("messages").and_then(|m| m.as_array()) {
            let first_user = messages.iter().find(|m| m.get("role").and_then(|r| r.as_str()) == Some("user"));
            if let Some(content) = first_user.and_then(|m| m.get("content")) {
                match content {
                    Value::String(s) => projection.push_str(&s.chars().take(200).collect::<String>()),
                    Value::Array(parts) => {
                        if let Some(text) = parts.iter().find_map(|p| p.get("text").and_then(|t| t.as_str())) {
                            projection.push_str(&text.chars().take(200).collect::<String>());
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    sha256_hex(&projection)
}

#[derive(Debug, Serialize)]
struct ModelsResponse {
    models: Vec<String>,
}

/// `GET /api/v1/models`: the key's own allow-list.
pub async fn models_handler(Extension(key): Extension<Arc<ApiKeyRecord>>) -> Json<ModelsResponse> {
    Json(ModelsResponse { models: key.allowed_model_patterns.clone() })
}

#[derive(Debug, Serialize)]
struct KeyInfoResponse {
    id: String,
    display_name: String,
    state: ApiKeyState,
    quotas: Quotas,
    daily_cost_limit: Option<f64>,
    overdrawn: bool,
    created_at: u64,
    last_used_at: u64,
    expires_at: Option<u64>,
}

/// `GET /api/v1/key-info`: quotas, usage-to-date, and expiry for the caller.
pub async fn key_info_handler(Extension(key): Extension<Arc<ApiKeyRecord>>) -> Json<KeyInfoResponse> {
    Json(KeyInfoResponse {
        id: key.id.clone(),
        display_name: key.display_name.clone(),
        state: key.state,
        quotas: key.quotas.clone(),
        daily_cost_limit: key.daily_cost_limit,
        overdrawn: key.overdrawn,
        created_at: key.created_at,
        last_used_at: key.last_used_at,
        expires_at: key.expires_at,
    })
}

#[derive(Debug, Serialize)]
struct UsageResponse {
    daily: DailyRollup,
    monthly: DailyRollup,
}

/// `GET /api/v1/usage`: today's and this-month's aggregates, summed across
/// every model the key has used. Best-effort keyspace scan, diagnostic only.
pub async fn usage_handler(
    State(state): State<Arc<AppState>>,
    Extension(key): Extension<Arc<ApiKeyRecord>>,
) -> Json<UsageResponse> {
    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let month_prefix = chrono::Utc::now().format("%Y-%m").to_string();

    let mut daily = DailyRollup::default();
    let mut monthly = DailyRollup::default();

    let keys = state.kv.scan_prefix("usage:daily:").await.unwrap_or_default();
    for full_key in keys {
        let Some(rest) = full_key.strip_prefix("usage:daily:") else { continue };
        let mut parts = rest.splitn(3, ':');
        let date = parts.next().unwrap_or("");
        let key_id = parts.next().unwrap_or("");
        if key_id != key.id {
            continue;
        }
        let Ok(fields) = state.kv.hash_get_all(&full_key).await else { continue };
        if fields.is_empty() {
            continue;
        }
        let rollup = crate::accounting::rollup::from_fields(&fields);

        if date == today {
            merge_rollup(&mut daily, &rollup);
        }
        if date.starts_with(&month_prefix) {
            merge_rollup(&mut monthly, &rollup);
        }
    }

    Json(UsageResponse { daily, monthly })
}

fn merge_rollup(into: &mut DailyRollup, from: &DailyRollup) {
    into.requests += from.requests;
    into.input_tokens += from.input_tokens;
    into.output_tokens += from.output_tokens;
    into.cache_creation_input_tokens += from.cache_creation_input_tokens;
    into.cache_read_input_tokens += from.cache_read_input_tokens;
    into.cost += from.cost;
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod http_tests;
