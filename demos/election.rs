//! Campaign for leadership in an election, announce a value, then hold it until
//! interrupted.
//!
//! Run multiple copies against a local etcd to see hand-off: `cargo run --example
//! election -- A`, `cargo run --example election -- B`, ...

use etcd_coord_client::election::CampaignEvent;
use etcd_coord_client::{Client, ConfigBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    etcd_coord_client::init_tracing("info");

    let value = std::env::args().nth(1).unwrap_or_else(|| "candidate".to_string());
    let config = ConfigBuilder::new().hosts(["http://127.0.0.1:2379"]).build()?;
    let client = Client::connect(config).await?;

    let election = client.election("demo", 10);
    println!("campaigning as '{value}'...");
    let campaign = election.campaign(value.clone()).await?;
    println!("elected leader with value '{value}'");

    let mut events = campaign.subscribe();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("resigning");
            campaign.resign().await?;
        }
        event = events.recv() => {
            if let Ok(CampaignEvent::Error(err)) = event {
                println!("campaign error: {err}");
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
