// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared application state: the composition root's assembled components,
//! handed to every handler via `axum::extract::State`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::account::AccountRepository;
use crate::accounting::Accounting;
use crate::apikey::ApiKeyService;
use crate::breaker::CircuitBreaker;
use crate::config::RelayConfig;
use crate::credential::manager::CredentialManager;
use crate::health::Metrics;
use crate::keystore::KvStore;
use crate::relay::RelayEngine;
use crate::scheduler::Scheduler;

pub struct AppState {
    pub config: RelayConfig,
    pub shutdown: CancellationToken,
    pub kv: Arc<dyn KvStore>,
    pub accounts: Arc<AccountRepository>,
    pub api_keys: Arc<ApiKeyService>,
    pub credentials: Arc<CredentialManager>,
    pub scheduler: Arc<Scheduler>,
    pub breaker: Arc<CircuitBreaker>,
    pub accounting: Arc<Accounting>,
    pub relay: RelayEngine,
    pub metrics: Arc<Metrics>,
}
