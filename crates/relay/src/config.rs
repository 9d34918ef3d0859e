// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration for the relay broker.

use std::path::PathBuf;

use clap::Parser;

/// Configuration for the relay broker proxy.
#[derive(Debug, Clone, Parser)]
#[command(name = "relaybroker", version, about)]
pub struct RelayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "RELAY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8787, env = "RELAY_PORT")]
    pub port: u16,

    /// Symmetric secret used to derive the AES-256-GCM envelope key that
    /// protects OAuth material at rest. Hashed with SHA-256 into exactly 32
    /// bytes, so any secret with >= 32 bytes of entropy is acceptable input.
    #[arg(long, env = "RELAY_ENCRYPTION_KEY")]
    pub encryption_key: String,

    /// Signing key for the admin surface's JWTs. This crate never mints or
    /// verifies JWTs itself (the admin surface is an external collaborator)
    /// but carries the secret so it can be handed off via shared config.
    #[arg(long, env = "RELAY_JWT_SIGNING_KEY")]
    pub jwt_signing_key: Option<String>,

    /// Redis connection URL for the primary KV store. Falls back to the
    /// in-process store if unreachable at startup.
    #[arg(long, default_value = "redis://127.0.0.1:6379", env = "RELAY_KV_URL")]
    pub kv_url: String,

    /// Base URL for the Claude Console / OAuth Messages API.
    #[arg(long, default_value = "https://api.anthropic.com", env = "RELAY_CLAUDE_BASE_URL")]
    pub claude_base_url: String,

    /// Base URL for Gemini's generative-language API.
    #[arg(
        long,
        default_value = "https://generativelanguage.googleapis.com",
        env = "RELAY_GEMINI_BASE_URL"
    )]
    pub gemini_base_url: String,

    /// Base URL for Bedrock-fronted requests.
    #[arg(long, default_value = "https://bedrock-runtime.amazonaws.com", env = "RELAY_BEDROCK_BASE_URL")]
    pub bedrock_base_url: String,

    /// Anthropic `anthropic-beta` feature flags attached to OAuth/Console
    /// requests, comma-separated.
    #[arg(long, value_delimiter = ',', env = "RELAY_BETA_FEATURES")]
    pub beta_features: Vec<String>,

    /// Default outbound proxy applied to accounts that don't configure their
    /// own (`scheme://[user:pass@]host:port`).
    #[arg(long, env = "RELAY_DEFAULT_PROXY")]
    pub default_proxy: Option<String>,

    /// Path to a JSON pricing table (`[{provider, model, input_per_1k,
    /// output_per_1k}]`) used for credit decrement. Unpriced (provider,
    /// model) pairs cost 0.
    #[arg(long, env = "RELAY_PRICING_TABLE")]
    pub pricing_table_path: Option<PathBuf>,

    /// Per-request timeout (non-streaming) in seconds.
    #[arg(long, default_value_t = 300, env = "RELAY_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: u64,

    /// Total stream timeout in seconds.
    #[arg(long, default_value_t = 600, env = "RELAY_STREAM_TIMEOUT_SECS")]
    pub stream_timeout_secs: u64,

    /// Idle read timeout while streaming, in seconds.
    #[arg(long, default_value_t = 60, env = "RELAY_STREAM_IDLE_TIMEOUT_SECS")]
    pub stream_idle_timeout_secs: u64,

    /// Max retries for retryable upstream failures on idempotent methods.
    #[arg(long, default_value_t = 3, env = "RELAY_MAX_RETRIES")]
    pub max_retries: u32,

    /// Max request body size accepted from clients, in bytes.
    #[arg(long, default_value_t = 10 * 1024 * 1024, env = "RELAY_MAX_BODY_BYTES")]
    pub max_body_bytes: usize,

    /// Soft cap on open outbound connections across the process.
    #[arg(long, default_value_t = 1000, env = "RELAY_MAX_OPEN_CONNECTIONS")]
    pub max_open_connections: usize,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info", env = "RELAY_LOG_LEVEL")]
    pub log_level: String,
}

impl RelayConfig {
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stream_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stream_idle_timeout_secs)
    }

    /// Base URL for a given provider's Messages-shaped API.
    pub fn provider_base_url(&self, provider: crate::account::Provider) -> &str {
        use crate::account::Provider;
        match provider {
            Provider::ClaudeOauth | Provider::ClaudeConsole => &self.claude_base_url,
            Provider::Gemini => &self.gemini_base_url,
            Provider::Bedrock => &self.bedrock_base_url,
        }
    }
}
