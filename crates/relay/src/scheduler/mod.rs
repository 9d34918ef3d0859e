// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unified scheduler: picks an upstream account for a request.
//!
//! Selection order (first match wins): dedicated binding, group binding,
//! sticky session, shared pool ordered by (priority, inflight, lastUsedAt)
//! with a deterministic accountId tie-break.

pub mod sticky;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::account::{AccountRepository, AccountView, Provider, SelectionPolicy};
use crate::apikey::ApiKeyRecord;
use crate::breaker::{Admission, CircuitBreaker};
use crate::keystore::{keys, KvError, KvStore};

use sticky::StickySessions;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("no upstream account available, retry after {retry_after_secs}s")]
    NoAccountAvailable { retry_after_secs: u64 },
    #[error("kv store error: {0}")]
    Kv(#[from] KvError),
    #[error("account repository error: {0}")]
    Repository(#[from] crate::account::AccountRepositoryError),
}

pub struct Scheduler {
    kv: Arc<dyn KvStore>,
    accounts: Arc<AccountRepository>,
    breaker: Arc<CircuitBreaker>,
    sticky: StickySessions,
}

impl Scheduler {
    pub fn new(kv: Arc<dyn KvStore>, accounts: Arc<AccountRepository>, breaker: Arc<CircuitBreaker>) -> Self {
        let sticky = StickySessions::new(kv.clone());
        Self { kv, accounts, breaker, sticky }
    }

    /// Select an account for `key` serving `provider`/`model`, honoring the
    /// key's bindings and the request's session fingerprint for stickiness.
    /// On success, the chosen account's in-flight counter has already been
    /// incremented; callers must call [`Scheduler::release`] when the request
    /// completes or is cancelled.
    pub async fn select(
        &self,
        key: &ApiKeyRecord,
        provider: Provider,
        model: &str,
        session_fingerprint: &str,
    ) -> Result<String, SchedulerError> {
        if let Some(account_id) = &key.dedicated_binding {
            if let Ok(account) = self.accounts.get(account_id).await {
                if self.candidate_ok(&account.view(), provider, model).await
                    && self.try_admit(&account.view()).await?
                {
                    self.sticky.bind(session_fingerprint, account_id).await?;
                    return Ok(account_id.clone());
                }
            }
        }

        if let Some(group_id) = &key.group_binding {
            if let Ok(group) = self.accounts.get_group(group_id).await {
                if let Some(account_id) = self.select_from_group(&group, provider, model).await? {
                    self.sticky.bind(session_fingerprint, &account_id).await?;
                    return Ok(account_id);
                }
            }
        }

        if let Some(account_id) = self.sticky.lookup(session_fingerprint).await? {
            if let Ok(account) = self.accounts.get(&account_id).await {
                if self.candidate_ok(&account.view(), provider, model).await
                    && self.try_admit(&account.view()).await?
                {
                    self.sticky.refresh(session_fingerprint, &account_id).await?;
                    return Ok(account_id);
                }
            }
        }

        let all = self.accounts.list_all().await?;
        let mut candidates: Vec<AccountView> = Vec::new();
        for account in &all {
            let view = account.view();
            if view.provider == provider && self.candidate_ok(&view, provider, model).await {
                candidates.push(view);
            }
        }

        let mut inflight = Vec::with_capacity(candidates.len());
        for view in &candidates {
            let n = self.inflight_count(&view.id).await?;
            inflight.push(n);
        }
        let mut indexed: Vec<usize> = (0..candidates.len()).collect();
        indexed.sort_by(|&a, &b| {
            let va = &candidates[a];
            let vb = &candidates[b];
            va.priority
                .cmp(&vb.priority)
                .then(inflight[a].cmp(&inflight[b]))
                .then(va.last_used_at.cmp(&vb.last_used_at))
                .then(va.id.cmp(&vb.id))
        });

        let mut min_cooldown: Option<u64> = None;
        for idx in indexed {
            let view = &candidates[idx];
            if self.try_admit(view).await? {
                self.sticky.bind(session_fingerprint, &view.id).await?;
                return Ok(view.id.clone());
            }
            if view.cooldown_until > 0 {
                min_cooldown = Some(min_cooldown.map_or(view.cooldown_until, |m| m.min(view.cooldown_until)));
            }
        }

        let now = epoch_secs();
        let retry_after = min_cooldown
            .map(|c| c.saturating_sub(now).clamp(1, 60))
            .unwrap_or(5);
        Err(SchedulerError::NoAccountAvailable { retry_after_secs: retry_after })
    }

    /// Release the in-flight slot claimed by [`Scheduler::select`] once a
    /// request completes or is cancelled.
    pub async fn release(&self, account_id: &str) -> Result<(), KvError> {
        self.kv.incr_by(&keys::inflight(account_id), -1).await?;
        Ok(())
    }

    async fn select_from_group(
        &self,
        group: &crate::account::AccountGroup,
        provider: Provider,
        model: &str,
    ) -> Result<Option<String>, SchedulerError> {
        let mut members = Vec::new();
        for id in &group.member_account_ids {
            if let Ok(account) = self.accounts.get(id).await {
                let view = account.view();
                if view.provider == provider && self.candidate_ok(&view, provider, model).await {
                    members.push(view);
                }
            }
        }

        match group.selection_policy {
            SelectionPolicy::Priority => {
                members.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));
            }
            SelectionPolicy::RoundRobin | SelectionPolicy::LeastLoaded => {
                let mut inflight = Vec::with_capacity(members.len());
                for m in &members {
                    inflight.push(self.inflight_count(&m.id).await?);
                }
                let mut indexed: Vec<usize> = (0..members.len()).collect();
                indexed.sort_by(|&a, &b| inflight[a].cmp(&inflight[b]).then(members[a].id.cmp(&members[b].id)));
                members = indexed.into_iter().map(|i| members[i].clone()).collect();
            }
        }

        for view in &members {
            if self.try_admit(view).await? {
                return Ok(Some(view.id.clone()));
            }
        }
        Ok(None)
    }

    async fn candidate_ok(&self, view: &AccountView, provider: Provider, model: &str) -> bool {
        if view.provider != provider {
            return false;
        }
        let now = epoch_secs();
        if !usable(view, now) {
            return false;
        }
        if !view.allowed_model_patterns.is_empty() && !view.allowed_model_patterns.iter().any(|p| model_matches(p, model)) {
            return false;
        }
        !matches!(self.breaker.admit(&view.id).await, Ok(Admission::Denied { .. }))
    }

    async fn try_admit(&self, view: &AccountView) -> Result<bool, KvError> {
        let n = self.kv.incr_by(&keys::inflight(&view.id), 1).await?;
        if n as u32 > view.max_concurrent {
            self.kv.incr_by(&keys::inflight(&view.id), -1).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn inflight_count(&self, account_id: &str) -> Result<i64, KvError> {
        Ok(self.kv.incr_by(&keys::inflight(account_id), 0).await.unwrap_or(0))
    }
}

fn usable(view: &AccountView, now: u64) -> bool {
    use crate::account::AccountStatus;
    match view.state {
        AccountStatus::Active => true,
        AccountStatus::RateLimited | AccountStatus::Cooldown => view.cooldown_until <= now,
        AccountStatus::Disabled | AccountStatus::Unauthorized => false,
    }
}

fn model_matches(pattern: &str, model: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => model.starts_with(prefix),
        None => pattern == model,
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
