// tests/txn_test.rs

//! Conditional-transaction scenario (testable property 2): a compare-and-swap only
//! succeeds when the guard condition holds, and its `or_else` branch runs otherwise.

mod common;

use etcd_coord_client::txn::{Cmp, CompareOp, Op};

#[tokio::test]
async fn conditional_put_only_applies_when_value_matches() {
    let client = common::client().await;
    let key = common::unique_key("txn/cas");

    client.kv().put(key.clone(), "v1").exec().await.unwrap();

    let response = client
        .txn()
        .if_(Cmp::value(key.clone(), CompareOp::Equal, "v1"))
        .then([Op::put(key.clone(), "v2")])
        .or_else([Op::get(key.clone())])
        .commit()
        .await
        .unwrap();
    assert!(response.succeeded);

    let value = client.kv().get(key.clone()).string().await.unwrap();
    assert_eq!(value.as_deref(), Some("v2"));

    client.kv().delete(key).exec().await.unwrap();
}

#[tokio::test]
async fn conditional_put_is_skipped_when_guard_fails() {
    let client = common::client().await;
    let key = common::unique_key("txn/guard-fails");

    client.kv().put(key.clone(), "v1").exec().await.unwrap();

    let response = client
        .txn()
        .if_(Cmp::value(key.clone(), CompareOp::Equal, "not-v1"))
        .then([Op::put(key.clone(), "v2")])
        .or_else([Op::get(key.clone())])
        .commit()
        .await
        .unwrap();
    assert!(!response.succeeded);

    let value = client.kv().get(key.clone()).string().await.unwrap();
    assert_eq!(value.as_deref(), Some("v1"));

    client.kv().delete(key).exec().await.unwrap();
}

#[tokio::test]
async fn create_revision_zero_guards_first_writer_wins() {
    let client = common::client().await;
    let key = common::unique_key("txn/first-writer");

    let first = client
        .txn()
        .if_(Cmp::create_revision(key.clone(), CompareOp::Equal, 0))
        .then([Op::put(key.clone(), "winner")])
        .commit()
        .await
        .unwrap();
    assert!(first.succeeded);

    let second = client
        .txn()
        .if_(Cmp::create_revision(key.clone(), CompareOp::Equal, 0))
        .then([Op::put(key.clone(), "loser")])
        .commit()
        .await
        .unwrap();
    assert!(!second.succeeded);

    let value = client.kv().get(key.clone()).string().await.unwrap();
    assert_eq!(value.as_deref(), Some("winner"));

    client.kv().delete(key).exec().await.unwrap();
}
