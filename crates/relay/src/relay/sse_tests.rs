use super::*;

#[test]
fn splits_frames_on_double_newline() {
    let mut parser = SseParser::new();
    let events = parser.push("data: {\"a\":1}\n\ndata: {\"a\":2}\n\n");
    assert_eq!(events, vec!["{\"a\":1}".to_owned(), "{\"a\":2}".to_owned()]);
}

#[test]
fn buffers_partial_frame_across_calls() {
    let mut parser = SseParser::new();
    assert!(parser.push("data: {\"a\":1}\n").is_empty());
    let events = parser.push("\n");
    assert_eq!(events, vec!["{\"a\":1}".to_owned()]);
}

#[test]
fn ignores_non_data_fields() {
    let mut parser = SseParser::new();
    let events = parser.push("event: ping\nid: 1\n\n");
    assert!(events.is_empty());
}

#[test]
fn usage_accumulator_captures_model_and_input_tokens_from_message_start() {
    let mut acc = UsageAccumulator::new();
    acc.ingest(r#"{"type":"message_start","message":{"model":"claude-3-5-sonnet","usage":{"input_tokens":42,"output_tokens":0}}}"#);
    let usage = acc.finish().expect("usage");
    assert_eq!(usage.model, "claude-3-5-sonnet");
    assert_eq!(usage.input_tokens, 42);
}

#[test]
fn usage_accumulator_applies_later_delta_over_earlier_value() {
    let mut acc = UsageAccumulator::new();
    acc.ingest(r#"{"type":"message_start","message":{"model":"m","usage":{"input_tokens":10,"output_tokens":0}}}"#);
    acc.ingest(r#"{"type":"message_delta","usage":{"output_tokens":128}}"#);
    let usage = acc.finish().expect("usage");
    assert_eq!(usage.input_tokens, 10);
    assert_eq!(usage.output_tokens, 128);
}

#[test]
fn malformed_payload_is_ignored_not_fatal() {
    let mut acc = UsageAccumulator::new();
    acc.ingest("not json");
    assert!(acc.finish().is_none());
}

#[test]
fn no_events_yields_no_usage() {
    let acc = UsageAccumulator::new();
    assert!(acc.finish().is_none());
}
