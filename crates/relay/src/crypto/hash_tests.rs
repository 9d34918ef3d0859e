use super::*;

#[test]
fn sha256_hex_is_fixed_length() {
    let digest = sha256_hex("cr_abcdefghijklmnopqrstuvwxyz0123456789");
    assert_eq!(digest.len(), 64);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn sha256_hex_is_deterministic() {
    assert_eq!(sha256_hex("same-input"), sha256_hex("same-input"));
    assert_ne!(sha256_hex("input-a"), sha256_hex("input-b"));
}

#[test]
fn constant_time_eq_matches_equal_strings() {
    assert!(constant_time_eq("abc123", "abc123"));
}

#[test]
fn constant_time_eq_rejects_different_strings() {
    assert!(!constant_time_eq("abc123", "abc124"));
    assert!(!constant_time_eq("short", "shorter"));
    assert!(!constant_time_eq("", "x"));
}
