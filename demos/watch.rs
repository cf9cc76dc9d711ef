//! Watch a key prefix and print every event as it arrives.
//!
//! Run against a local etcd: `cargo run --example watch`, then `etcdctl put foo1 bar`
//! in another shell.

use etcd_coord_client::range::KeyRange;
use etcd_coord_client::watch::{WatchEvent, WatchFilters};
use etcd_coord_client::{Client, ConfigBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    etcd_coord_client::init_tracing("info");

    let config = ConfigBuilder::new().hosts(["http://127.0.0.1:2379"]).build()?;
    let client = Client::connect(config).await?;

    let mut watcher = client
        .watch()
        .watch(KeyRange::prefix("foo"), 0, WatchFilters::default())
        .await?;

    println!("watching prefix 'foo', press Ctrl+C to exit");
    while let Some(event) = watcher.recv().await {
        match event {
            WatchEvent::Connected { revision } => println!("connected at revision {revision}"),
            WatchEvent::Disconnected(err) => println!("disconnected: {err}, reconnecting"),
            WatchEvent::Data(events) => {
                for event in events {
                    if let Some(kv) = event.kv {
                        println!(
                            "event: key={} value={}",
                            String::from_utf8_lossy(&kv.key),
                            String::from_utf8_lossy(&kv.value)
                        );
                    }
                }
            }
            WatchEvent::End => break,
            WatchEvent::Error(err) => println!("watch error: {err}"),
        }
    }

    client.shutdown().await;
    Ok(())
}
