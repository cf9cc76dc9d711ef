//! Put a few keys, then read them back with the fluent `GetBuilder`.
//!
//! Run against a local etcd: `cargo run --example kv`.

use etcd_coord_client::{Client, ConfigBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    etcd_coord_client::init_tracing("info");

    let config = ConfigBuilder::new().hosts(["http://127.0.0.1:2379"]).build()?;
    let client = Client::connect(config).await?;

    client.kv().put("foo1", "bar1").exec().await?;
    client.kv().put("foo2", "bar2").exec().await?;
    client.kv().put("foo3", r#"{"value":"bar3"}"#).exec().await?;
    client.kv().put("baz", "bar5").exec().await?;

    let all = client.kv().get_all().strings().await?;
    println!("all keys: {all:?}");

    let prefixed = client.kv().get_all().prefix("fo").keys().await?;
    println!("keys under 'fo': {prefixed:?}");

    let count = client.kv().get_all().count().await?;
    println!("total count: {count}");

    client.shutdown().await;
    Ok(())
}
