use super::*;

#[test]
fn extracts_usage_and_model_from_full_body() {
    let body = br#"{"model":"claude-3-5-sonnet","usage":{"input_tokens":12,"output_tokens":34}}"#;
    let usage = extract_from_body(body, "fallback").expect("usage");
    assert_eq!(usage.model, "claude-3-5-sonnet");
    assert_eq!(usage.input_tokens, 12);
    assert_eq!(usage.output_tokens, 34);
}

#[test]
fn falls_back_to_given_model_when_absent() {
    let body = br#"{"usage":{"input_tokens":1,"output_tokens":2}}"#;
    let usage = extract_from_body(body, "claude-3-5-sonnet").expect("usage");
    assert_eq!(usage.model, "claude-3-5-sonnet");
}

#[test]
fn missing_usage_object_yields_none() {
    let body = br#"{"model":"m"}"#;
    assert!(extract_from_body(body, "m").is_none());
}

#[test]
fn malformed_json_yields_none() {
    assert!(extract_from_body(b"not json", "m").is_none());
}
