// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rolling process counters, rendered as plain-text Prometheus exposition.
//! Hand-rolled rather than a metrics crate: this is a scrape endpoint, not a
//! full metrics pipeline.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    pub requests_total: AtomicU64,
    pub requests_errored_total: AtomicU64,
    pub upstream_requests_total: AtomicU64,
    pub upstream_errors_total: AtomicU64,
    pub refreshes_total: AtomicU64,
    pub refresh_failures_total: AtomicU64,
    pub client_disconnects_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_requests(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requests_errored(&self) {
        self.requests_errored_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_upstream_requests(&self) {
        self.upstream_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_upstream_errors(&self) {
        self.upstream_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_refreshes(&self) {
        self.refreshes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_refresh_failures(&self) {
        self.refresh_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_client_disconnects(&self) {
        self.client_disconnects_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut line = |name: &str, help: &str, value: u64| {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {value}");
        };

        line("relay_requests_total", "Total client requests accepted.", self.requests_total.load(Ordering::Relaxed));
        line(
            "relay_requests_errored_total",
            "Total client requests that ended in an error response.",
            self.requests_errored_total.load(Ordering::Relaxed),
        );
        line(
            "relay_upstream_requests_total",
            "Total outbound requests dialed to upstream providers.",
            self.upstream_requests_total.load(Ordering::Relaxed),
        );
        line(
            "relay_upstream_errors_total",
            "Total upstream dial attempts that failed or returned 5xx.",
            self.upstream_errors_total.load(Ordering::Relaxed),
        );
        line(
            "relay_credential_refreshes_total",
            "Total OAuth token refreshes performed.",
            self.refreshes_total.load(Ordering::Relaxed),
        );
        line(
            "relay_credential_refresh_failures_total",
            "Total OAuth token refreshes that failed.",
            self.refresh_failures_total.load(Ordering::Relaxed),
        );
        line(
            "relay_client_disconnects_total",
            "Total requests aborted mid-stream by client disconnect.",
            self.client_disconnects_total.load(Ordering::Relaxed),
        );

        out
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod metrics_tests;
