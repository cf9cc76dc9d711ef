// tests/scenarios_test.rs

//! End-to-end scenarios phrased with the literal inputs/outputs they're built from:
//! a CRUD round-trip, a snapshot-isolated STM conflict that forces a retry, and a
//! lease that's revoked out from under its own keep-alive loop.

mod common;

use etcd_coord_client::lease::LeaseEvent;
use etcd_coord_client::stm::Isolation;

#[tokio::test]
async fn crud_round_trip_over_four_keys() {
    let client = common::client().await;
    let prefix = common::unique_key("scenarios/crud");
    let foo1 = format!("{prefix}/foo1");
    let foo2 = format!("{prefix}/foo2");
    let foo3 = format!("{prefix}/foo3");
    let baz = format!("{prefix}/baz");

    client.kv().put(foo1.clone(), "bar1").exec().await.unwrap();
    client.kv().put(foo2.clone(), "bar2").exec().await.unwrap();
    client.kv().put(foo3.clone(), r#"{"value":"bar3"}"#).exec().await.unwrap();
    client.kv().put(baz.clone(), "bar5").exec().await.unwrap();

    let all = client.kv().get_all().prefix(format!("{prefix}/")).strings().await.unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all.get(&foo1).map(String::as_str), Some("bar1"));
    assert_eq!(all.get(&baz).map(String::as_str), Some("bar5"));

    let fo = client.kv().get_all().prefix(format!("{prefix}/fo")).keys().await.unwrap();
    let mut fo_sorted = fo;
    fo_sorted.sort();
    assert_eq!(fo_sorted, vec![foo1.clone(), foo2.clone(), foo3.clone()]);

    let count = client.kv().get_all().prefix(format!("{prefix}/")).count().await.unwrap();
    assert_eq!(count, 4);

    client.kv().delete_range(etcd_coord_client::range::KeyRange::prefix(prefix)).exec().await.unwrap();
}

#[tokio::test]
async fn snapshot_isolation_retries_after_an_external_write_lands_mid_transaction() {
    let client = common::client().await;
    let key = common::unique_key("scenarios/snapshot-conflict");

    client.kv().put(key.clone(), "bar1").exec().await.unwrap();

    let mut seen_first_read = false;
    let key_for_body = key.clone();
    let client_for_body = client.clone();
    client
        .transact(Isolation::SerializableSnapshot, 1, move |stm| {
            let key = key_for_body.clone();
            let client = client_for_body.clone();
            let seen_first_read = &mut seen_first_read;
            async move {
                let current = stm.get_string(key.clone()).await?.unwrap_or_default();
                if !*seen_first_read {
                    *seen_first_read = true;
                    // Land an external write between this attempt's read and its
                    // commit so the pinned snapshot is stale by the time we try.
                    client.kv().put(key.clone(), "lol").exec().await.unwrap();
                }
                stm.put(key, format!("{current}{current}{current}"));
                Ok(())
            }
        })
        .await
        .unwrap();

    let stored = client.kv().get(key.clone()).string().await.unwrap();
    assert_eq!(stored.as_deref(), Some("lollollol"));

    client.kv().delete(key).exec().await.unwrap();
}

#[tokio::test]
async fn lease_revoked_out_of_band_is_reported_as_lost() {
    let client = common::client().await;

    let lease = client.lease(100).await.unwrap();
    let mut events = lease.subscribe();

    // Revoke server-side, simulating an operator invalidating the lease out from
    // under its owner; the next keep-alive round trip must surface LeaseInvalid and
    // mark the handle lost.
    lease.revoke().await.unwrap();
    let err = lease.keepalive_once().await.unwrap_err();
    assert!(matches!(err, etcd_coord_client::ClientError::LeaseInvalid));
    assert!(lease.revoked());

    let mut saw_lost = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, LeaseEvent::Lost(_)) {
            saw_lost = true;
        }
    }
    assert!(saw_lost, "lease should have emitted Lost after becoming invalid");
}
