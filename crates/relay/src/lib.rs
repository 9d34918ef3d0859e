// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relaybroker: multi-tenant reverse proxy and credential broker between
//! self-issued API keys and upstream LLM providers (Claude OAuth, Claude
//! Console, Gemini, Bedrock).

pub mod account;
pub mod accounting;
pub mod apikey;
pub mod breaker;
pub mod config;
pub mod credential;
pub mod crypto;
pub mod error;
pub mod health;
pub mod keystore;
pub mod relay;
pub mod scheduler;
pub mod state;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::account::AccountRepository;
use crate::accounting::{Accounting, PricingTable};
use crate::apikey::ApiKeyService;
use crate::breaker::CircuitBreaker;
use crate::config::RelayConfig;
use crate::credential::manager::CredentialManager;
use crate::crypto::envelope::{derive_key, EncryptionKey};
use crate::health::Metrics;
use crate::keystore::{InMemoryKv, KvStore, RedisKv};
use crate::relay::RelayEngine;
use crate::scheduler::Scheduler;
use crate::state::AppState;
use crate::transport::build_router;

/// Composition root: build every component in dependency order, wire the
/// router, and serve until the shutdown signal fires. Reverse teardown is
/// implicit in `axum::serve`'s graceful-shutdown drain, which waits for
/// in-flight relays to finish releasing their counters and committing
/// accounting before the listener closes.
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();
    let config = Arc::new(config);

    let kv = connect_kv(&config, shutdown.clone()).await;

    let encryption_key = Arc::new(
        EncryptionKey::from_bytes(&derive_key(&config.encryption_key))
            .map_err(|e| anyhow::anyhow!("invalid encryption key: {e}"))?,
    );

    let accounts = Arc::new(AccountRepository::new(kv.clone()));
    let api_keys = Arc::new(ApiKeyService::new(kv.clone()));
    let metrics = Arc::new(Metrics::new());
    let credentials = CredentialManager::new(kv.clone(), accounts.clone(), encryption_key, metrics.clone());
    let breaker = Arc::new(CircuitBreaker::new(kv.clone()));
    let scheduler = Arc::new(Scheduler::new(kv.clone(), accounts.clone(), breaker.clone()));
    let pricing = load_pricing_table(&config)?;
    let accounting = Arc::new(Accounting::new(kv.clone(), api_keys.clone(), pricing));

    let relay = RelayEngine::new(
        config.clone(),
        accounts.clone(),
        credentials.clone(),
        scheduler.clone(),
        breaker.clone(),
        accounting.clone(),
        metrics.clone(),
    );

    let state = Arc::new(AppState {
        config: (*config).clone(),
        shutdown: shutdown.clone(),
        kv,
        accounts,
        api_keys,
        credentials,
        scheduler,
        breaker,
        accounting,
        relay,
        metrics,
    });

    tracing::info!(%addr, "relaybroker listening");
    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;

    let sigterm_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining in-flight relays");
        sigterm_shutdown.cancel();
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_with_drain(shutdown))
        .await?;

    Ok(())
}

/// Wait for the shutdown token, then give in-flight relays a bounded window
/// to finish their cancellation path (release in-flight counters, commit
/// partial accounting) before the listener actually stops accepting drains.
/// Caps the grace period at 5s rather than waiting indefinitely.
async fn shutdown_with_drain(shutdown: CancellationToken) {
    shutdown.cancelled().await;
    tokio::time::sleep(Duration::from_secs(5)).await;
}

/// Connect to Redis; on failure, degrade to the in-process KV fallback.
async fn connect_kv(config: &RelayConfig, shutdown: CancellationToken) -> Arc<dyn KvStore> {
    match RedisKv::connect(&config.kv_url).await {
        Ok(redis) => {
            tracing::info!(url = %config.kv_url, "connected to redis kv store");
            Arc::new(redis)
        }
        Err(e) => {
            tracing::warn!(err = %e, "redis unreachable, degrading to in-process kv fallback");
            let mem = InMemoryKv::new();
            mem.spawn_ttl_sweep(shutdown);
            mem
        }
    }
}

fn load_pricing_table(config: &RelayConfig) -> anyhow::Result<PricingTable> {
    let Some(path) = &config.pricing_table_path else {
        return Ok(PricingTable::new());
    };
    let raw = std::fs::read_to_string(path)?;
    PricingTable::load_json(&raw).map_err(|e| anyhow::anyhow!("invalid pricing table at {}: {e}", path.display()))
}
