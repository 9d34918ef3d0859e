use super::*;
use crate::keystore::InMemoryKv;

#[tokio::test]
async fn bind_then_lookup_round_trips() {
    let sticky = StickySessions::new(InMemoryKv::new());
    sticky.bind("fp-1", "acct-1").await.unwrap();
    assert_eq!(sticky.lookup("fp-1").await.unwrap(), Some("acct-1".to_owned()));
}

#[tokio::test]
async fn unknown_fingerprint_is_none() {
    let sticky = StickySessions::new(InMemoryKv::new());
    assert_eq!(sticky.lookup("nope").await.unwrap(), None);
}

#[tokio::test]
async fn refresh_keeps_same_target() {
    let sticky = StickySessions::new(InMemoryKv::new());
    sticky.bind("fp-1", "acct-1").await.unwrap();
    sticky.refresh("fp-1", "acct-1").await.unwrap();
    assert_eq!(sticky.lookup("fp-1").await.unwrap(), Some("acct-1".to_owned()));
}
