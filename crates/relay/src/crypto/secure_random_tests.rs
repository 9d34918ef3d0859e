use super::*;

#[test]
fn random_token_matches_plaintext_guard() {
    let re_ok = |s: &str| -> bool {
        let Some(rest) = s.strip_prefix("cr_") else { return false };
        rest.len() >= 17 && rest.len() <= 253 && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    for _ in 0..16 {
        let token = random_token("cr").expect("random token");
        assert!(re_ok(&token), "token {token} failed guard");
    }
}

#[test]
fn random_token_is_unique_across_calls() {
    let a = random_token("sk").expect("a");
    let b = random_token("sk").expect("b");
    assert_ne!(a, b);
}
