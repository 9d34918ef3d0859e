// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream account and group types.
//!
//! An [`UpstreamAccount`] is exclusively mutated (for its token envelope) by
//! [`crate::credential::manager`]; every other component gets a read-only
//! [`AccountView`] projection.

pub mod repository;

pub use repository::{AccountRepository, AccountRepositoryError};

use serde::{Deserialize, Serialize};

use crate::crypto::Envelope;

/// Upstream LLM provider identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    ClaudeOauth,
    ClaudeConsole,
    Gemini,
    Bedrock,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClaudeOauth => "claude-oauth",
            Self::ClaudeConsole => "claude-console",
            Self::Gemini => "gemini",
            Self::Bedrock => "bedrock",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claude-oauth" => Some(Self::ClaudeOauth),
            "claude-console" => Some(Self::ClaudeConsole),
            "gemini" => Some(Self::Gemini),
            "bedrock" => Some(Self::Bedrock),
            _ => None,
        }
    }

    /// Whether this provider authenticates with a refreshable OAuth token
    /// (as opposed to a long-lived console/API key that the OAuth manager
    /// never touches).
    pub fn is_oauth(&self) -> bool {
        matches!(self, Self::ClaudeOauth)
    }
}

/// Scheme for an account's outbound proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyScheme {
    Http,
    Https,
    Socks5,
}

/// Per-account outbound proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundProxy {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ProxyAuth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

impl OutboundProxy {
    /// Render as a URL `reqwest::Proxy::all` / SOCKS5 dialers accept.
    pub fn to_url(&self) -> String {
        let scheme = match self.scheme {
            ProxyScheme::Http => "http",
            ProxyScheme::Https => "https",
            ProxyScheme::Socks5 => "socks5",
        };
        match &self.auth {
            Some(auth) => format!(
                "{scheme}://{}:{}@{}:{}",
                auth.username, auth.password, self.host, self.port
            ),
            None => format!("{scheme}://{}:{}", self.host, self.port),
        }
    }
}

/// Operational status of an upstream account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountStatus {
    Active,
    RateLimited,
    Cooldown,
    Disabled,
    Unauthorized,
}

/// The encrypted OAuth/API material held for an account, at rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialEnvelope {
    pub access_token: Envelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Envelope>,
    pub scopes: Vec<String>,
    pub expires_at: u64,
    pub token_type: String,
}

/// A pooled credential for one provider, owned by the account repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamAccount {
    pub id: String,
    pub provider: Provider,
    pub credential: CredentialEnvelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_proxy: Option<OutboundProxy>,
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_membership: Option<String>,
    pub state: AccountStatus,
    #[serde(default)]
    pub cooldown_until: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_used_at: u64,
    /// Provider model allow-list patterns this account may serve.
    #[serde(default)]
    pub allowed_model_patterns: Vec<String>,
    pub max_concurrent: u32,
}

impl UpstreamAccount {
    /// Read-only projection handed to the scheduler/relay — never exposes
    /// the encrypted envelope.
    pub fn view(&self) -> AccountView {
        AccountView {
            id: self.id.clone(),
            provider: self.provider,
            priority: self.priority,
            group_membership: self.group_membership.clone(),
            state: self.state,
            cooldown_until: self.cooldown_until,
            last_used_at: self.last_used_at,
            allowed_model_patterns: self.allowed_model_patterns.clone(),
            max_concurrent: self.max_concurrent,
            outbound_proxy: self.outbound_proxy.clone(),
        }
    }

    /// "Usable" per the unified scheduler's definition: active, or
    /// rate-limited with a cooldown that has already elapsed; never
    /// disabled, unauthorized, or (checked separately) circuit-broken.
    pub fn is_usable(&self, now_secs: u64) -> bool {
        match self.state {
            AccountStatus::Active => true,
            AccountStatus::RateLimited | AccountStatus::Cooldown => self.cooldown_until <= now_secs,
            AccountStatus::Disabled | AccountStatus::Unauthorized => false,
        }
    }

    pub fn supports_model(&self, model: &str) -> bool {
        if self.allowed_model_patterns.is_empty() {
            return true;
        }
        self.allowed_model_patterns.iter().any(|pattern| glob_match(pattern, model))
    }
}

/// Read-only projection of an account, safe to hand to the scheduler, relay,
/// and admin surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub id: String,
    pub provider: Provider,
    pub priority: i32,
    pub group_membership: Option<String>,
    pub state: AccountStatus,
    pub cooldown_until: u64,
    pub last_used_at: u64,
    pub allowed_model_patterns: Vec<String>,
    pub max_concurrent: u32,
    pub outbound_proxy: Option<OutboundProxy>,
}

/// Group selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    Priority,
    RoundRobin,
    LeastLoaded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountGroup {
    pub id: String,
    pub name: String,
    pub member_account_ids: Vec<String>,
    pub selection_policy: SelectionPolicy,
}

/// Minimal glob matcher supporting a single trailing `*` wildcard, which is
/// all the provider allow-lists need (e.g. `claude-3-5-*`).
fn glob_match(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
