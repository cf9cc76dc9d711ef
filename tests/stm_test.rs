// tests/stm_test.rs

//! STM conflict-and-retry scenario (testable property 5): a transaction body that
//! reads-then-writes commits cleanly when uncontested, and the engine retries to a
//! fresh snapshot after another writer lands in between attempts.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use etcd_coord_client::stm::Isolation;

#[tokio::test]
async fn uncontested_transaction_commits_on_first_attempt() {
    let client = common::client().await;
    let key = common::unique_key("stm/simple");

    client.kv().put(key.clone(), "1").exec().await.unwrap();

    let key_for_body = key.clone();
    let new_value = client
        .transact(Isolation::Serializable, 3, move |stm| {
            let key = key_for_body.clone();
            async move {
                let current = stm.get(key.clone()).await?;
                let n: i64 = current.and_then(|v| String::from_utf8(v.to_vec()).ok()).and_then(|s| s.parse().ok()).unwrap_or(0);
                let next = n + 1;
                stm.put(key, next.to_string());
                Ok(next)
            }
        })
        .await
        .unwrap();
    assert_eq!(new_value, 2);

    let stored = client.kv().get(key.clone()).string().await.unwrap();
    assert_eq!(stored.as_deref(), Some("2"));

    client.kv().delete(key).exec().await.unwrap();
}

#[tokio::test]
async fn concurrent_writer_forces_a_retry_to_succeed() {
    let client = common::client().await;
    let key = common::unique_key("stm/conflict");

    client.kv().put(key.clone(), "0").exec().await.unwrap();

    let attempts = AtomicUsize::new(0);
    let key_for_body = key.clone();
    let client_for_body = client.clone();
    let result = client
        .transact(Isolation::Serializable, 2, move |stm| {
            let key = key_for_body.clone();
            let client = client_for_body.clone();
            let attempts = &attempts;
            async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                let current = stm.get(key.clone()).await?;
                if attempt == 0 {
                    // Land a conflicting write from outside the transaction between
                    // this read and the eventual commit, forcing the engine to retry.
                    client.kv().put(key.clone(), "interloper").exec().await.unwrap();
                }
                let _ = current;
                stm.put(key, "final");
                Ok(())
            }
        })
        .await;
    assert!(result.is_ok());

    let stored = client.kv().get(key.clone()).string().await.unwrap();
    assert_eq!(stored.as_deref(), Some("final"));

    client.kv().delete(key).exec().await.unwrap();
}
