use super::*;

fn test_key() -> EncryptionKey {
    EncryptionKey::from_bytes(&[7u8; 32]).expect("valid key")
}

#[test]
fn round_trips_arbitrary_bytes() {
    let key = test_key();
    let plaintext = b"access-token-material-with-some-length-to-it";
    let sealed = key.seal(plaintext).expect("seal");
    let opened = key.open(&sealed).expect("open");
    assert_eq!(opened, plaintext);
}

#[test]
fn round_trips_empty_and_large() {
    let key = test_key();
    for len in [0usize, 1, 64 * 1024] {
        let plaintext = vec![0xABu8; len];
        let sealed = key.seal(&plaintext).expect("seal");
        let opened = key.open(&sealed).expect("open");
        assert_eq!(opened, plaintext, "len={len}");
    }
}

#[test]
fn rejects_wrong_key() {
    let key = test_key();
    let other = EncryptionKey::from_bytes(&[9u8; 32]).expect("valid key");
    let sealed = key.seal(b"secret").expect("seal");
    assert!(other.open(&sealed).is_err());
}

#[test]
fn rejects_tampered_ciphertext() {
    let key = test_key();
    let mut sealed = key.seal(b"secret").expect("seal");
    let mut raw = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &sealed.ciphertext)
        .expect("decode");
    raw[0] ^= 0xFF;
    sealed.ciphertext = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &raw);
    assert!(key.open(&sealed).is_err());
}

#[test]
fn rejects_bad_key_length() {
    assert!(EncryptionKey::from_bytes(&[0u8; 16]).is_err());
}

#[test]
fn rejects_unknown_version() {
    let key = test_key();
    let mut sealed = key.seal(b"secret").expect("seal");
    sealed.version = 99;
    assert!(matches!(key.open(&sealed), Err(EnvelopeError::UnsupportedVersion(99))));
}
