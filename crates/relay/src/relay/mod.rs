// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relay Engine: rewrites headers, dials the scheduled account, streams or
//! buffers the response, captures usage, and translates upstream failures
//! into the client-facing error taxonomy.

pub mod dial;
pub mod ingress;
pub mod openai_shim;
pub mod sse;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::account::{AccountRepository, Provider};
use crate::accounting::{Accounting, UsageRecord};
use crate::apikey::ApiKeyRecord;
use crate::breaker::{Admission as BreakerAdmission, CircuitBreaker};
use crate::config::RelayConfig;
use crate::credential::manager::{CredentialManager, EnsureFreshError};
use crate::error::{clamp_retry_after, RelayError};
use crate::health::Metrics;
use crate::scheduler::{Scheduler, SchedulerError};

use dial::Dialer;
use sse::{SseParser, UsageAccumulator};

/// One client-facing relay request, already auth-checked and quota-admitted.
pub struct MessagesRequest {
    pub provider: Provider,
    pub upstream_path: String,
    pub method: reqwest::Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub model: String,
    pub streaming: bool,
    pub openai_shim: bool,
    pub session_fingerprint: String,
}

pub struct RelayEngine {
    config: Arc<RelayConfig>,
    accounts: Arc<AccountRepository>,
    credentials: Arc<CredentialManager>,
    scheduler: Arc<Scheduler>,
    breaker: Arc<CircuitBreaker>,
    accounting: Arc<Accounting>,
    metrics: Arc<Metrics>,
    dialer: Dialer,
}

impl RelayEngine {
    pub fn new(
        config: Arc<RelayConfig>,
        accounts: Arc<AccountRepository>,
        credentials: Arc<CredentialManager>,
        scheduler: Arc<Scheduler>,
        breaker: Arc<CircuitBreaker>,
        accounting: Arc<Accounting>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let dialer = Dialer::new(&config);
        Self { config, accounts, credentials, scheduler, breaker, accounting, metrics, dialer }
    }

    /// Select an account, dial it, and return the client-facing response.
    /// Releases the scheduler's in-flight slot on every exit path.
    pub async fn dispatch(
        &self,
        key: &mut ApiKeyRecord,
        req: MessagesRequest,
        cancel: CancellationToken,
    ) -> Result<axum::response::Response, RelayError> {
        let account_id = self
            .scheduler
            .select(key, req.provider, &req.model, &req.session_fingerprint)
            .await
            .map_err(scheduler_err)?;

        let outcome = self.try_account(key, &req, &account_id, &cancel).await;
        self.scheduler.release(&account_id).await.ok();
        outcome
    }

    async fn try_account(
        &self,
        key: &mut ApiKeyRecord,
        req: &MessagesRequest,
        account_id: &str,
        cancel: &CancellationToken,
    ) -> Result<axum::response::Response, RelayError> {
        let mut token = self.credentials.ensure_fresh(account_id).await.map_err(ensure_fresh_err)?;
        let is_retryable_method = matches!(req.method, reqwest::Method::GET | reqwest::Method::HEAD);

        let mut attempt = 0u32;
        let mut retried_401 = false;

        loop {
            let admission = self.breaker.admit(account_id).await.unwrap_or(BreakerAdmission::Allowed { is_probe: false });
            let retry_after = match admission {
                BreakerAdmission::Denied { retry_after_secs } => Some(retry_after_secs),
                BreakerAdmission::Allowed { .. } => None,
            };
            if let Some(retry_after_secs) = retry_after {
                self.commit_zero_usage(key, req, false).await;
                return Err(RelayError::NoAccountAvailable { retry_after_secs });
            }

            let account = self.accounts.get(account_id).await.map_err(|_| RelayError::Internal)?;
            let client = if req.streaming {
                self.dialer.streaming_client_for(&account.view()).await
            } else {
                self.dialer.client_for(&account.view()).await
            };

            let mut headers = req.headers.clone();
            ingress::strip_client_headers(&mut headers);
            ingress::inject_upstream_credential(&mut headers, req.provider, &token);
            ingress::inject_beta_headers(&mut headers, req.provider, &self.config.beta_features);

            let url = format!("{}{}", self.config.provider_base_url(req.provider), req.upstream_path);
            let body = if req.openai_shim {
                let parsed: serde_json::Value = serde_json::from_slice(&req.body).unwrap_or(serde_json::Value::Null);
                serde_json::to_vec(&openai_shim::request_to_anthropic(&parsed)).unwrap_or_default()
            } else {
                req.body.to_vec()
            };

            let built = client.request(req.method.clone(), &url).headers(headers).body(body);

            self.metrics.inc_upstream_requests();
            let send_result = tokio::select! {
                res = built.send() => res,
                _ = cancel.cancelled() => {
                    self.commit_zero_usage(key, req, true).await;
                    return Err(RelayError::Internal);
                }
            };

            let response = match send_result {
                Ok(response) => response,
                Err(_) => {
                    self.metrics.inc_upstream_errors();
                    self.breaker.record_failure(account_id).await.ok();
                    if is_retryable_method && attempt < self.config.max_retries {
                        attempt += 1;
                        backoff(attempt).await;
                        continue;
                    }
                    self.commit_zero_usage(key, req, false).await;
                    return Err(RelayError::UpstreamError);
                }
            };

            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !retried_401 {
                retried_401 = true;
                match self.credentials.force_refresh(account_id).await {
                    Ok(fresh) => {
                        token = fresh;
                        continue;
                    }
                    Err(_) => {
                        self.commit_zero_usage(key, req, false).await;
                        return Err(RelayError::UpstreamUnauthorized);
                    }
                }
            }
            if status == StatusCode::UNAUTHORIZED {
                self.commit_zero_usage(key, req, false).await;
                return Err(RelayError::UpstreamUnauthorized);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after_secs = response
                    .headers()
                    .get(axum::http::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60)
                    .max(60);
                self.mark_rate_limited(account_id, retry_after_secs).await;
                self.commit_zero_usage(key, req, false).await;
                return Err(RelayError::UpstreamRateLimited { retry_after_secs: clamp_retry_after(retry_after_secs as i64) });
            }

            if status.is_server_error() {
                self.metrics.inc_upstream_errors();
                self.breaker.record_failure(account_id).await.ok();
                if is_retryable_method && attempt < self.config.max_retries {
                    attempt += 1;
                    backoff(attempt).await;
                    continue;
                }
                self.commit_zero_usage(key, req, false).await;
                return Err(RelayError::UpstreamError);
            }

            self.breaker.record_success(account_id).await.ok();
            self.bump_last_used(account_id).await;

            return if req.streaming {
                self.stream_response(key, req, account_id, response, cancel.clone()).await
            } else {
                self.buffer_response(key, req, account_id, response).await
            };
        }
    }

    async fn buffer_response(
        &self,
        key: &mut ApiKeyRecord,
        req: &MessagesRequest,
        account_id: &str,
        response: reqwest::Response,
    ) -> Result<axum::response::Response, RelayError> {
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let content_type = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("application/json"));
        let raw = response.bytes().await.map_err(|_| RelayError::UpstreamError)?;

        if let Some(usage) = usage::extract_from_body(&raw, &req.model) {
            self.accounting.commit(key, req.provider.as_str(), &usage.model.clone(), &usage).await.ok();
        }

        let out_body = if req.openai_shim {
            let parsed: serde_json::Value = serde_json::from_slice(&raw).unwrap_or(serde_json::Value::Null);
            serde_json::to_vec(&openai_shim::response_to_openai(&parsed)).unwrap_or_default()
        } else {
            raw.to_vec()
        };

        let mut builder = axum::response::Response::builder().status(status).header(axum::http::header::CONTENT_TYPE, content_type);
        builder = with_diagnostic_headers(builder, account_id, &req.session_fingerprint);
        builder.body(Body::from(out_body)).map_err(|_| RelayError::Internal)
    }

    async fn stream_response(
        &self,
        key: &ApiKeyRecord,
        req: &MessagesRequest,
        account_id: &str,
        response: reqwest::Response,
        cancel: CancellationToken,
    ) -> Result<axum::response::Response, RelayError> {
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let content_type = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("text/event-stream"));

        let (tx, rx) = mpsc::channel::<Bytes>(16);
        let mut upstream = response.bytes_stream();
        let accounting = self.accounting.clone();
        let metrics = self.metrics.clone();
        let provider_str = req.provider.as_str();
        let model = req.model.clone();
        let mut key = key.clone();
        let openai_shim = req.openai_shim;
        let idle_timeout = self.config.stream_idle_timeout();
        let message_id = format!("chatcmpl-{}", uuid::Uuid::new_v4());

        tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut acc = UsageAccumulator::new();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        metrics.inc_client_disconnects();
                        let mut usage = acc.clone().finish().unwrap_or_default();
                        usage.client_disconnect = true;
                        if !model.is_empty() {
                            usage.model = model.clone();
                        }
                        accounting.commit(&mut key, provider_str, &usage.model.clone(), &usage).await.ok();
                        return;
                    }
                    chunk = tokio::time::timeout(idle_timeout, upstream.next()) => {
                        let chunk = match chunk {
                            Ok(chunk) => chunk,
                            // Idle-read timeout: no bytes arrived within the
                            // stream's idle budget. Treat like an upstream
                            // close so usage captured so far is still committed.
                            Err(_) => {
                                if let Some(usage) = acc.finish() {
                                    accounting.commit(&mut key, provider_str, &usage.model.clone(), &usage).await.ok();
                                }
                                return;
                            }
                        };
                        match chunk {
                            Some(Ok(bytes)) => {
                                if let Ok(text) = std::str::from_utf8(&bytes) {
                                    for payload in parser.push(text) {
                                        acc.ingest(&payload);
                                        if openai_shim {
                                            if let Ok(event) = serde_json::from_str::<serde_json::Value>(&payload) {
                                                if let Some(translated) =
                                                    openai_shim::stream_event_to_openai(&event, &message_id, &model)
                                                {
                                                    let frame = format!("data: {translated}\n\n");
                                                    if tx.send(Bytes::from(frame)).await.is_err() {
                                                        return;
                                                    }
                                                }
                                            }
                                            continue;
                                        }
                                        if tx.send(bytes.clone()).await.is_err() {
                                            return;
                                        }
                                    }
                                } else if !openai_shim && tx.send(bytes).await.is_err() {
                                    return;
                                }
                            }
                            Some(Err(_)) => return,
                            None => {
                                if openai_shim && tx.send(Bytes::from_static(b"data: [DONE]\n\n")).await.is_err() {
                                    return;
                                }
                                if let Some(usage) = acc.finish() {
                                    accounting.commit(&mut key, provider_str, &usage.model.clone(), &usage).await.ok();
                                }
                                return;
                            }
                        }
                    }
                }
            }
        });

        let body_stream = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (Ok::<_, std::io::Error>(item), rx)) });

        let mut builder = axum::response::Response::builder().status(status).header(axum::http::header::CONTENT_TYPE, content_type);
        builder = with_diagnostic_headers(builder, account_id, &req.session_fingerprint);
        builder.body(Body::from_stream(body_stream)).map_err(|_| RelayError::Internal)
    }

    /// Emit a zero-token usage event on an error exit from `try_account` so
    /// in-flight accounting is never silently dropped, per the "never
    /// swallow" rule: every error path still commits a usage event, even
    /// with zero tokens.
    async fn commit_zero_usage(&self, key: &mut ApiKeyRecord, req: &MessagesRequest, client_disconnect: bool) {
        let usage = UsageRecord { model: req.model.clone(), client_disconnect, ..Default::default() };
        self.accounting.commit(key, req.provider.as_str(), &req.model, &usage).await.ok();
    }

    async fn mark_rate_limited(&self, account_id: &str, retry_after_secs: u64) {
        if let Ok(mut account) = self.accounts.get(account_id).await {
            let now = epoch_secs();
            account.state = crate::account::AccountStatus::RateLimited;
            account.cooldown_until = now + retry_after_secs;
            let _ = self.accounts.put(&account).await;
        }
    }

    /// Fire-and-forget `lastUsedAt` bump, matching the API-key service's
    /// established pattern for this same class of non-blocking update.
    async fn bump_last_used(&self, account_id: &str) {
        if let Ok(mut account) = self.accounts.get(account_id).await {
            account.last_used_at = epoch_secs();
            let _ = self.accounts.put(&account).await;
        }
    }
}

fn with_diagnostic_headers(
    builder: axum::http::response::Builder,
    account_id: &str,
    session_fingerprint: &str,
) -> axum::http::response::Builder {
    let builder = match HeaderValue::from_str(account_id) {
        Ok(value) => builder.header(HeaderName::from_static("x-relay-account-id"), value),
        Err(_) => builder,
    };
    match HeaderValue::from_str(session_fingerprint) {
        Ok(value) => builder.header(HeaderName::from_static("x-relay-session"), value),
        Err(_) => builder,
    }
}

async fn backoff(attempt: u32) {
    let base_ms = 1000u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
    let jitter_ms = rand::rng().random_range(0..250);
    tokio::time::sleep(Duration::from_millis(base_ms.min(30_000) + jitter_ms)).await;
}

fn scheduler_err(err: SchedulerError) -> RelayError {
    match err {
        SchedulerError::NoAccountAvailable { retry_after_secs } => RelayError::NoAccountAvailable { retry_after_secs },
        SchedulerError::Kv(_) | SchedulerError::Repository(_) => RelayError::Internal,
    }
}

fn ensure_fresh_err(err: EnsureFreshError) -> RelayError {
    match err {
        EnsureFreshError::AccountUnauthorized(_) => RelayError::UpstreamUnauthorized,
        EnsureFreshError::RefreshTransient(_) => RelayError::UpstreamError,
        EnsureFreshError::AccountNotFound(_)
        | EnsureFreshError::Envelope(_)
        | EnsureFreshError::Kv(_)
        | EnsureFreshError::Repository(_) => RelayError::Internal,
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
