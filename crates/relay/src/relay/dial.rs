// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-account proxy-aware outbound HTTP client, cached by account id.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::account::AccountView;
use crate::config::RelayConfig;

/// Which timeout budget a dialed client should carry: buffered requests use
/// the short `request_timeout`, streaming requests use the much longer
/// `stream_timeout` (idle-read enforcement happens separately, at the
/// stream-consumption loop, since reqwest's `.timeout()` bounds only total
/// request duration).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Buffered,
    Streaming,
}

/// Builds and caches one [`reqwest::Client`] per (account, purpose), honoring
/// the account's `outboundProxy` (HTTP/HTTPS/SOCKS5) or the process-wide
/// default proxy. Accounts with neither share one of two default clients —
/// buffered and streaming each get their own default, since they carry
/// different timeouts.
pub struct Dialer {
    clients: RwLock<HashMap<(String, Purpose), reqwest::Client>>,
    default_buffered: reqwest::Client,
    default_streaming: reqwest::Client,
    default_proxy: Option<String>,
    request_timeout: Duration,
    stream_timeout: Duration,
}

impl Dialer {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            default_buffered: build_client(config.request_timeout(), None),
            default_streaming: build_client(config.stream_timeout(), None),
            default_proxy: config.default_proxy.clone(),
            request_timeout: config.request_timeout(),
            stream_timeout: config.stream_timeout(),
        }
    }

    /// Client for this account's dial, built once and cached thereafter.
    pub async fn client_for(&self, account: &AccountView) -> reqwest::Client {
        self.client_for_purpose(account, Purpose::Buffered).await
    }

    /// Client for this account's dial, using the streaming timeout budget.
    pub async fn streaming_client_for(&self, account: &AccountView) -> reqwest::Client {
        self.client_for_purpose(account, Purpose::Streaming).await
    }

    async fn client_for_purpose(&self, account: &AccountView, purpose: Purpose) -> reqwest::Client {
        let proxy_url = account.outbound_proxy.as_ref().map(|p| p.to_url()).or_else(|| self.default_proxy.clone());

        let Some(proxy_url) = proxy_url else {
            return match purpose {
                Purpose::Buffered => self.default_buffered.clone(),
                Purpose::Streaming => self.default_streaming.clone(),
            };
        };

        let cache_key = (account.id.clone(), purpose);
        if let Some(client) = self.clients.read().await.get(&cache_key) {
            return client.clone();
        }

        let timeout = match purpose {
            Purpose::Buffered => self.request_timeout,
            Purpose::Streaming => self.stream_timeout,
        };
        let client = build_client(timeout, Some(&proxy_url));
        self.clients.write().await.insert(cache_key, client.clone());
        client
    }
}

fn build_client(request_timeout: Duration, proxy_url: Option<&str>) -> reqwest::Client {
    let mut builder = reqwest::Client::builder()
        .timeout(request_timeout)
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90));

    if let Some(proxy_url) = proxy_url {
        if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
            builder = builder.proxy(proxy);
        }
    }

    builder.build().unwrap_or_default()
}

#[cfg(test)]
#[path = "dial_tests.rs"]
mod dial_tests;
