// tests/lease_test.rs

//! Lease grant/keep-alive/expiry and lease-bound-key scenarios.

mod common;

use std::time::Duration;

use etcd_coord_client::lease::LeaseEvent;

#[tokio::test]
async fn lease_bound_key_disappears_on_revoke() {
    let client = common::client().await;
    let key = common::unique_key("lease/bound");

    let lease = client.lease(20).await.unwrap();
    lease.put(key.clone(), "v1").exec().await.unwrap();

    let value = client.kv().get(key.clone()).string().await.unwrap();
    assert_eq!(value.as_deref(), Some("v1"));

    lease.revoke().await.unwrap();

    let value = client.kv().get(key).string().await.unwrap();
    assert_eq!(value, None);
}

#[tokio::test]
async fn keepalive_loop_keeps_a_short_lived_lease_alive() {
    let client = common::client().await;
    let key = common::unique_key("lease/keepalive");

    // Shorter than the sleep below: without a working keep-alive loop the key would
    // be gone by the time we check.
    let lease = client.lease(3).await.unwrap();
    lease.put(key.clone(), "alive").exec().await.unwrap();

    tokio::time::sleep(Duration::from_secs(7)).await;

    let value = client.kv().get(key.clone()).string().await.unwrap();
    assert_eq!(value.as_deref(), Some("alive"));

    lease.revoke().await.unwrap();
}

#[tokio::test]
async fn release_stops_keepalive_and_eventually_the_key_expires() {
    let client = common::client().await;
    let key = common::unique_key("lease/released");

    let lease = client.lease(2).await.unwrap();
    lease.put(key.clone(), "v1").exec().await.unwrap();

    let mut events = lease.subscribe();
    lease.release().await;

    // The keep-alive task has stopped; the lease now expires server-side on its own.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let value = client.kv().get(key).string().await.unwrap();
    assert_eq!(value, None);

    // Drain whatever lifecycle events fired; Lost is expected once the server times
    // the lease out, but the exact ordering against our sleep isn't guaranteed.
    while let Ok(event) = events.try_recv() {
        if matches!(event, LeaseEvent::Lost(_)) {
            return;
        }
    }
}
