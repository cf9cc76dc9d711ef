// tests/kv_test.rs

//! CRUD round-trip scenarios against a real etcd (scenario 1 of the testable
//! properties: put several keys, read them back by exact key, by prefix, and by
//! count, then delete and confirm they're gone).

mod common;

use etcd_coord_client::kv::{SORT_ORDER_ASCEND, SORT_TARGET_CREATE};

#[tokio::test]
async fn put_then_get_round_trips_a_value() {
    let client = common::client().await;
    let key = common::unique_key("kv/roundtrip");

    client.kv().put(key.clone(), "bar1").exec().await.unwrap();
    let value = client.kv().get(key.clone()).string().await.unwrap();
    assert_eq!(value.as_deref(), Some("bar1"));

    client.kv().delete(key.clone()).exec().await.unwrap();
    let value = client.kv().get(key).string().await.unwrap();
    assert_eq!(value, None);
}

#[tokio::test]
async fn prefix_scan_finds_every_sibling_key() {
    let client = common::client().await;
    let prefix = common::unique_key("kv/prefix");

    for (suffix, value) in [("/foo1", "bar1"), ("/foo2", "bar2"), ("/foo3", "bar3")] {
        client.kv().put(format!("{prefix}{suffix}"), value).exec().await.unwrap();
    }
    client.kv().put(format!("{prefix}-unrelated"), "baz").exec().await.unwrap();

    let strings = client.kv().get_all().prefix(format!("{prefix}/")).strings().await.unwrap();
    assert_eq!(strings.len(), 3);
    assert_eq!(strings.get(&format!("{prefix}/foo2")).map(String::as_str), Some("bar2"));

    let count = client.kv().get_all().prefix(format!("{prefix}/")).count().await.unwrap();
    assert_eq!(count, 3);

    client.kv().delete_range(etcd_coord_client::range::KeyRange::prefix(prefix)).exec().await.unwrap();
}

#[tokio::test]
async fn get_all_sorted_by_create_revision_orders_oldest_first() {
    let client = common::client().await;
    let prefix = common::unique_key("kv/sorted");

    for suffix in ["/a", "/b", "/c"] {
        client.kv().put(format!("{prefix}{suffix}"), "v").exec().await.unwrap();
    }

    let keys = client
        .kv()
        .get_all()
        .prefix(format!("{prefix}/"))
        .sort(SORT_TARGET_CREATE, SORT_ORDER_ASCEND)
        .keys()
        .await
        .unwrap();
    assert_eq!(keys, vec![format!("{prefix}/a"), format!("{prefix}/b"), format!("{prefix}/c")]);

    client.kv().delete_range(etcd_coord_client::range::KeyRange::prefix(prefix)).exec().await.unwrap();
}

#[tokio::test]
async fn json_round_trips_a_serde_value() {
    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Widget {
        name: String,
        count: u32,
    }

    let client = common::client().await;
    let key = common::unique_key("kv/json");
    let widget = Widget { name: "sprocket".into(), count: 7 };

    let encoded = serde_json::to_vec(&widget).unwrap();
    client.kv().put(key.clone(), encoded).exec().await.unwrap();

    let decoded: Option<Widget> = client.kv().get(key.clone()).json().await.unwrap();
    assert_eq!(decoded, Some(widget));

    client.kv().delete(key).exec().await.unwrap();
}
