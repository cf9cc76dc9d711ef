// tests/election_test.rs

//! Leader-election hand-off scenario (testable property 4): a second campaigner
//! blocks behind the first and only becomes leader once the first resigns; an
//! observer tracks the leader value through the hand-off without campaigning itself.

mod common;

use std::time::Duration;

use etcd_coord_client::election::ObserverEvent;

#[tokio::test]
async fn second_campaigner_wins_after_first_resigns() {
    let client = common::client().await;
    let name = common::unique_key("election/handoff");

    let first = client.election(&name, 10);
    let first_campaign = first.campaign("leader-a").await.unwrap();

    let second = client.election(&name, 10);
    let second_handle = tokio::spawn(async move { second.campaign("leader-b").await.unwrap() });

    // The second campaigner must not resolve while the first still holds the key.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!second_handle.is_finished());

    first_campaign.resign().await.unwrap();

    let second_campaign = tokio::time::timeout(Duration::from_secs(10), second_handle)
        .await
        .expect("second campaigner should become leader after the first resigns")
        .unwrap();
    second_campaign.resign().await.unwrap();
}

#[tokio::test]
async fn observer_tracks_leader_value_through_handoff() {
    let client = common::client().await;
    let name = common::unique_key("election/observer");

    let observer = client.election_observer(&name);
    let mut events = observer.subscribe();

    let election = client.election(&name, 10);
    let campaign = election.campaign("observed-leader").await.unwrap();

    let mut saw_leader = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            Ok(Ok(ObserverEvent::Change(Some(value)))) if value.as_ref() == b"observed-leader" => {
                saw_leader = true;
                break;
            }
            _ => continue,
        }
    }
    assert!(saw_leader, "observer should have seen the campaigned leader value");

    observer.cancel().await;
    campaign.resign().await.unwrap();
}
