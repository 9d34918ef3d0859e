// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stateless, purely syntactic Anthropic <-> OpenAI envelope shim for the
//! `/openai/...` namespace.

use serde_json::{json, Value};

/// Translate an OpenAI-shaped chat-completions request body into the
/// Anthropic Messages shape. Unknown fields are dropped rather than
/// propagated — this shim is a thin syntactic bridge, not a full proxy for
/// every OpenAI request option.
pub fn request_to_anthropic(openai: &Value) -> Value {
    let model = openai.get("model").cloned().unwrap_or(Value::Null);
    let max_tokens = openai.get("max_tokens").cloned().unwrap_or_else(|| json!(4096));
    let stream = openai.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let mut system = None;
    let mut messages = Vec::new();
    if let Some(Value::Array(items)) = openai.get("messages") {
        for item in items {
            let role = item.get("role").and_then(Value::as_str).unwrap_or("user");
            let content = item.get("content").cloned().unwrap_or(Value::Null);
            if role == "system" {
                system = Some(content);
                continue;
            }
            let anthropic_role = match role {
                "assistant" => "assistant",
                _ => "user",
            };
            messages.push(json!({ "role": anthropic_role, "content": content }));
        }
    }

    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": messages,
        "stream": stream,
    });
    if let Some(system) = system {
        body["system"] = system;
    }
    body
}

/// Translate a buffered Anthropic Messages response into the OpenAI
/// chat-completion shape, including the `usage` field rename.
pub fn response_to_openai(anthropic: &Value) -> Value {
    let id = anthropic.get("id").cloned().unwrap_or_else(|| json!("msg"));
    let model = anthropic.get("model").cloned().unwrap_or(Value::Null);

    let text = anthropic
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let usage = anthropic.get("usage").cloned().unwrap_or_else(|| json!({}));
    let prompt_tokens = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
    let completion_tokens = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);

    json!({
        "id": id,
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens,
        },
    })
}

/// Translate one Anthropic streaming SSE event (already parsed from its
/// `data:` payload) into an OpenAI `chat.completion.chunk` envelope, or
/// `None` for Anthropic event types with no OpenAI streaming equivalent
/// (e.g. `content_block_start`, `ping`). Caller forwards the returned value
/// as a new `data: {..}\n\n` frame; a `None` is simply dropped.
pub fn stream_event_to_openai(event: &Value, message_id: &str, model: &str) -> Option<Value> {
    let event_type = event.get("type").and_then(Value::as_str)?;

    let delta = match event_type {
        "message_start" => json!({ "role": "assistant", "content": "" }),
        "content_block_delta" => {
            let text = event.pointer("/delta/text").and_then(Value::as_str)?;
            json!({ "content": text })
        }
        "message_stop" => {
            return Some(json!({
                "id": message_id,
                "object": "chat.completion.chunk",
                "model": model,
                "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }],
            }));
        }
        _ => return None,
    };

    Some(json!({
        "id": message_id,
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [{ "index": 0, "delta": delta, "finish_reason": Value::Null }],
    }))
}

#[cfg(test)]
#[path = "openai_shim_tests.rs"]
mod openai_shim_tests;
