// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Incremental SSE frame parser and Anthropic usage-event extraction.
//!
//! Frames are `\n\n`-terminated blocks of `field: value` lines; only the
//! `data:` field is meaningful here. Bytes arrive in arbitrary chunk
//! boundaries, so the parser buffers until a full frame is available.

use crate::accounting::UsageRecord;

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes (assumed UTF-8, as SSE always is), returning any
    /// complete event payloads extracted so far. Leftover partial data stays
    /// buffered for the next call.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find("\n\n") {
            let frame = self.buffer[..pos].to_owned();
            self.buffer.drain(..pos + 2);

            let mut data = String::new();
            for line in frame.lines() {
                if let Some(rest) = line.strip_prefix("data: ") {
                    if !data.is_empty() {
                        data.push('\n');
                    }
                    data.push_str(rest);
                } else if let Some(rest) = line.strip_prefix("data:") {
                    if !data.is_empty() {
                        data.push('\n');
                    }
                    data.push_str(rest);
                }
            }
            if !data.is_empty() {
                events.push(data);
            }
        }

        events
    }
}

/// Accumulates usage fields across a stream's `message_start` /
/// `message_delta` / `message_stop` events. Anthropic reports `input_tokens`
/// on `message_start`, and cumulative output/cache counts on later deltas;
/// later non-null values win.
#[derive(Debug, Default, Clone)]
pub struct UsageAccumulator {
    usage: UsageRecord,
    saw_any: bool,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one decoded SSE `data:` payload (a JSON event). Unrecognized or
    /// malformed payloads are ignored — usage extraction never aborts the
    /// stream.
    pub fn ingest(&mut self, payload: &str) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) else {
            return;
        };

        if let Some(model) = value.pointer("/message/model").and_then(|v| v.as_str()) {
            self.usage.model = model.to_owned();
            self.saw_any = true;
        }

        for pointer in ["/message/usage", "/usage"] {
            if let Some(usage) = value.pointer(pointer) {
                self.merge_usage(usage);
            }
        }
    }

    fn merge_usage(&mut self, usage: &serde_json::Value) {
        self.saw_any = true;
        if let Some(v) = usage.get("input_tokens").and_then(|v| v.as_u64()) {
            self.usage.input_tokens = v;
        }
        if let Some(v) = usage.get("output_tokens").and_then(|v| v.as_u64()) {
            self.usage.output_tokens = v;
        }
        if let Some(v) = usage.get("cache_creation_input_tokens").and_then(|v| v.as_u64()) {
            self.usage.cache_creation_input_tokens = v;
        }
        if let Some(v) = usage.get("cache_read_input_tokens").and_then(|v| v.as_u64()) {
            self.usage.cache_read_input_tokens = v;
        }
    }

    pub fn finish(self) -> Option<UsageRecord> {
        self.saw_any.then_some(self.usage)
    }
}

#[cfg(test)]
#[path = "sse_tests.rs"]
mod sse_tests;
