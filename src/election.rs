// src/election.rs

//! Leader-election coordination: a multi-phase [`Campaign`] built atop leases, atomic
//! transactions, and watches, plus an [`ElectionObserver`] that tracks whoever
//! currently holds the election without itself campaigning.
//!
//! Every campaign for election `name` lives under the namespace `election/<name>/`;
//! a campaign's own key is `<prefix><lease-id-decimal>`, and the earliest
//! `create_revision` among keys in that prefix is, by definition, the leader.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::kv::{SORT_ORDER_ASCEND, SORT_ORDER_DESCEND, SORT_TARGET_CREATE};
use crate::lease::{Lease, LeaseEvent};
use crate::pb::{self, EventType};
use crate::pool::Pool;
use crate::range::KeyRange;
use crate::txn::{Cmp, CompareOp, Op, TxnBuilder};
use crate::watch::{WatchFilters, WatchManager};

fn own_key(prefix: &[u8], lease_id: i64) -> Bytes {
    let mut buf = Vec::with_capacity(prefix.len() + 20);
    buf.extend_from_slice(prefix);
    buf.extend_from_slice(lease_id.to_string().as_bytes());
    Bytes::from(buf)
}

/// The fixed enumeration of events a [`Campaign`] can emit.
#[derive(Debug, Clone)]
pub enum CampaignEvent {
    Elected,
    Error(ClientError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CampaignState {
    CreatingLease,
    CreatedKey,
    Follower,
    Leader,
    Resigned,
}

/// One instance's attempt to hold leadership in an election. Construct via
/// [`Election::campaign`]; the returned handle only resolves once this instance has
/// actually become leader (or failed outright) — `Follower` phases run internally.
pub struct Campaign {
    pool: Arc<Pool>,
    lease: Arc<Lease>,
    own_key: Bytes,
    create_revision: i64,
    state: Arc<SyncMutex<CampaignState>>,
    events: broadcast::Sender<CampaignEvent>,
}

impl Campaign {
    pub fn subscribe(&self) -> broadcast::Receiver<CampaignEvent> {
        self.events.subscribe()
    }

    pub fn lease(&self) -> &Arc<Lease> {
        &self.lease
    }

    /// Announces a new value for this campaign's key. Requires the campaign to still
    /// be running; if another instance has since taken this lease's key (can only
    /// happen if a prior campaign with the same lease id didn't clean up), or the
    /// campaign has resigned, this raises `NotLeader`/`NotCampaigning` and
    /// best-effort resigns.
    pub async fn proclaim(&self, value: impl Into<Bytes>) -> Result<()> {
        {
            let state = *self.state.lock();
            if state == CampaignState::Resigned {
                return Err(ClientError::NotCampaigning);
            }
        }
        let value = value.into();
        let txn = TxnBuilder::new(self.pool.clone())
            .if_(Cmp::create_revision(self.own_key.clone(), CompareOp::Equal, self.create_revision))
            .then([Op::put_with_lease(self.own_key.clone(), value, self.lease.id())]);
        let response = txn.commit().await?;
        if !response.succeeded {
            *self.state.lock() = CampaignState::Resigned;
            let _ = self.resign_best_effort().await;
            return Err(ClientError::NotLeader);
        }
        Ok(())
    }

    /// Marks the campaign resigned and revokes its lease. Idempotent; server-side
    /// deletion of `own_key` is what unblocks other instances' `Follower` watches.
    pub async fn resign(&self) -> Result<()> {
        let already = {
            let mut state = self.state.lock();
            let was_resigned = *state == CampaignState::Resigned;
            *state = CampaignState::Resigned;
            was_resigned
        };
        if already {
            return Ok(());
        }
        info!(own_key = %String::from_utf8_lossy(&self.own_key), "resigning campaign");
        self.lease.revoke().await
    }

    async fn resign_best_effort(&self) -> Result<()> {
        self.lease.revoke().await
    }
}

/// One election, scoped to `election/<name>/`. Start a [`Campaign`] with
/// [`Election::campaign`], or watch who holds it without campaigning via
/// [`Election::observe`].
pub struct Election {
    pool: Arc<Pool>,
    watches: Arc<WatchManager>,
    prefix: Bytes,
    lease_ttl: i64,
}

impl Election {
    pub fn new(pool: Arc<Pool>, watches: Arc<WatchManager>, name: impl AsRef<str>, lease_ttl: i64) -> Self {
        let prefix = Bytes::from(format!("election/{}/", name.as_ref()));
        Election { pool, watches, prefix, lease_ttl }
    }

    /// Runs the full campaign state machine — grant a lease, create this instance's
    /// key, then wait out every older key in the prefix — and resolves once this
    /// instance has become leader.
    pub async fn campaign(&self, value: impl Into<Bytes>) -> Result<Arc<Campaign>> {
        let value = value.into();
        let state = Arc::new(SyncMutex::new(CampaignState::CreatingLease));
        let (events_tx, _) = broadcast::channel(16);

        let lease = Arc::new(Lease::grant(self.pool.clone(), self.lease_ttl).await?);
        spawn_lease_loss_watcher(lease.clone(), state.clone(), events_tx.clone());

        let own_key = own_key(&self.prefix, lease.id());
        let txn = TxnBuilder::new(self.pool.clone())
            .if_(Cmp::create_revision(own_key.clone(), CompareOp::Equal, 0))
            .then([Op::put_with_lease(own_key.clone(), value.clone(), lease.id())])
            .or_else([Op::get(own_key.clone())]);
        let response = txn.commit().await?;

        let create_revision = if response.succeeded {
            response.header.as_ref().map(|h| h.revision).unwrap_or(0)
        } else {
            let existing = extract_existing_kv(&response)?;
            if existing.value != value {
                // Leftover key from a campaign that didn't clean up; re-announce.
                let reproclaim = TxnBuilder::new(self.pool.clone())
                    .if_(Cmp::create_revision(own_key.clone(), CompareOp::Equal, existing.create_revision))
                    .then([Op::put_with_lease(own_key.clone(), value.clone(), lease.id())]);
                reproclaim.commit().await?;
            }
            existing.create_revision
        };
        *state.lock() = CampaignState::CreatedKey;
        debug!(create_revision, "campaign key established");

        let campaign = Arc::new(Campaign {
            pool: self.pool.clone(),
            lease,
            own_key,
            create_revision,
            state: state.clone(),
            events: events_tx.clone(),
        });

        self.wait_for_leadership(&campaign).await?;
        *state.lock() = CampaignState::Leader;
        let _ = events_tx.send(CampaignEvent::Elected);
        info!(create_revision, "campaign elected leader");
        Ok(campaign)
    }

    /// Follower phase: repeatedly find the newest key with a smaller create_revision
    /// than ours and wait for it to be deleted, until none remain.
    async fn wait_for_leadership(&self, campaign: &Campaign) -> Result<()> {
        *campaign.state.lock() = CampaignState::Follower;
        loop {
            let range = KeyRange::prefix(self.prefix.clone());
            let response = crate::kv::Kv::new(self.pool.clone())
                .get(Bytes::new())
                .range(range)
                .max_create_revision(campaign.create_revision - 1)
                .sort(SORT_TARGET_CREATE, SORT_ORDER_DESCEND)
                .limit(1)
                .response()
                .await?;

            let Some(ahead) = response.kvs.into_iter().next() else {
                return Ok(());
            };
            let start_revision = response.header.as_ref().map(|h| h.revision).unwrap_or(0) + 1;
            debug!(ahead_key = %String::from_utf8_lossy(&ahead.key), "waiting for older campaign to resign");

            let mut watcher = self
                .watches
                .watch(
                    KeyRange::key(ahead.key.clone()),
                    start_revision,
                    WatchFilters { no_put: true, no_delete: false },
                )
                .await?;
            'wait_delete: loop {
                match watcher.recv().await {
                    Some(crate::watch::WatchEvent::Data(events)) => {
                        if events.iter().any(|e| e.r#type == EventType::Delete as i32) {
                            break 'wait_delete;
                        }
                    }
                    Some(crate::watch::WatchEvent::Disconnected(_)) | Some(crate::watch::WatchEvent::Connected { .. }) => continue,
                    Some(crate::watch::WatchEvent::End) | Some(crate::watch::WatchEvent::Error(_)) | None => break 'wait_delete,
                }
            }
            watcher.cancel().await;
        }
    }
}

fn extract_existing_kv(response: &pb::TxnResponse) -> Result<pb::KeyValue> {
    let Some(op) = response.responses.first() else {
        return Err(ClientError::ClientRuntime("campaign else-branch returned no response".into()));
    };
    match &op.response {
        Some(pb::response_op::Response::ResponseRange(range)) => range
            .kvs
            .first()
            .cloned()
            .ok_or_else(|| ClientError::ClientRuntime("campaign key missing from else-branch Get".into())),
        _ => Err(ClientError::ClientRuntime("campaign else-branch was not a Get".into())),
    }
}

fn spawn_lease_loss_watcher(
    lease: Arc<Lease>,
    state: Arc<SyncMutex<CampaignState>>,
    events: broadcast::Sender<CampaignEvent>,
) {
    let mut lease_events = lease.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = lease_events.recv().await {
            if let LeaseEvent::Lost(err) = event {
                *state.lock() = CampaignState::Resigned;
                warn!(error = %err, "campaign lease lost");
                let _ = events.send(CampaignEvent::Error(err));
                return;
            }
        }
    });
}

/// The fixed enumeration of events an [`ElectionObserver`] can emit.
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    /// The current leader's value changed (or became/stopped being known). `None`
    /// means the election currently has no leader.
    Change(Option<Bytes>),
    Disconnected(ClientError),
    Error(ClientError),
}

/// Tracks the current leader of an election without itself campaigning, mirroring
/// the server-side concurrency library's observer loop. Cancellation is cooperative:
/// `cancel()` resolves the loop's current wait and awaits its exit.
pub struct ElectionObserver {
    events: broadcast::Sender<ObserverEvent>,
    cancel_tx: SyncMutex<Option<oneshot::Sender<()>>>,
    join: SyncMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ElectionObserver {
    pub fn new(pool: Arc<Pool>, watches: Arc<WatchManager>, name: impl AsRef<str>) -> Arc<Self> {
        let prefix = Bytes::from(format!("election/{}/", name.as_ref()));
        let (events_tx, _) = broadcast::channel(16);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let task_events = events_tx.clone();
        let join = tokio::spawn(observe_loop(pool, watches, prefix, task_events, cancel_rx));

        Arc::new(ElectionObserver {
            events: events_tx,
            cancel_tx: SyncMutex::new(Some(cancel_tx)),
            join: SyncMutex::new(Some(join)),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ObserverEvent> {
        self.events.subscribe()
    }

    /// Cooperatively cancels the observer loop and waits for it to exit.
    pub async fn cancel(&self) {
        if let Some(tx) = self.cancel_tx.lock().take() {
            let _ = tx.send(());
        }
        let handle = self.join.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn observe_loop(
    pool: Arc<Pool>,
    watches: Arc<WatchManager>,
    prefix: Bytes,
    events: broadcast::Sender<ObserverEvent>,
    mut cancel: oneshot::Receiver<()>,
) {
    let kv = crate::kv::Kv::new(pool);
    let mut current: Option<Bytes> = None;

    'outer: loop {
        let response = match kv
            .get(Bytes::new())
            .range(KeyRange::prefix(prefix.clone()))
            .sort(SORT_TARGET_CREATE, SORT_ORDER_ASCEND)
            .limit(1)
            .response()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                let _ = events.send(ObserverEvent::Error(e));
                return;
            }
        };

        let mut revision = response.header.as_ref().map(|h| h.revision).unwrap_or(0);
        let mut leader = match response.kvs.into_iter().next() {
            Some(kv) => kv,
            None => {
                let _ = events.send(ObserverEvent::Change(None));
                let mut watcher = match watches
                    .watch(
                        KeyRange::prefix(prefix.clone()),
                        revision + 1,
                        WatchFilters { no_put: false, no_delete: true },
                    )
                    .await
                {
                    Ok(w) => w,
                    Err(e) => {
                        let _ = events.send(ObserverEvent::Error(e));
                        return;
                    }
                };
                let found = tokio::select! {
                    _ = &mut cancel => { watcher.cancel().await; return; }
                    found = wait_for_first_put(&mut watcher) => found,
                };
                watcher.cancel().await;
                match found {
                    Some((kv, rev)) => {
                        revision = rev;
                        kv
                    }
                    None => continue 'outer,
                }
            }
        };

        loop {
            if current.as_deref() != Some(leader.value.as_ref()) {
                current = Some(leader.value.clone());
                let _ = events.send(ObserverEvent::Change(Some(leader.value.clone())));
            }
            let mut watcher = match watches
                .watch(KeyRange::key(leader.key.clone()), revision + 1, WatchFilters::default())
                .await
            {
                Ok(w) => w,
                Err(e) => {
                    let _ = events.send(ObserverEvent::Error(e));
                    return;
                }
            };
            let next = tokio::select! {
                _ = &mut cancel => { watcher.cancel().await; return; }
                next = wait_for_put_or_delete(&mut watcher) => next,
            };
            watcher.cancel().await;
            match next {
                Some(NextLeaderEvent::Put(kv, rev)) => {
                    leader = kv;
                    revision = rev;
                    continue;
                }
                Some(NextLeaderEvent::Delete) => {
                    let _ = events.send(ObserverEvent::Disconnected(ClientError::NoLeader));
                    continue 'outer;
                }
                None => continue 'outer,
            }
        }
    }
}

enum NextLeaderEvent {
    Put(pb::KeyValue, i64),
    Delete,
}

async fn wait_for_first_put(watcher: &mut crate::watch::Watcher) -> Option<(pb::KeyValue, i64)> {
    loop {
        match watcher.recv().await? {
            crate::watch::WatchEvent::Data(events) => {
                for event in events {
                    if event.r#type == EventType::Put as i32 {
                        if let Some(kv) = event.kv {
                            let rev = kv.mod_revision;
                            return Some((kv, rev));
                        }
                    }
                }
            }
            crate::watch::WatchEvent::End | crate::watch::WatchEvent::Error(_) => return None,
            _ => continue,
        }
    }
}

async fn wait_for_put_or_delete(watcher: &mut crate::watch::Watcher) -> Option<NextLeaderEvent> {
    loop {
        match watcher.recv().await? {
            crate::watch::WatchEvent::Data(events) => {
                for event in events {
                    if event.r#type == EventType::Delete as i32 {
                        return Some(NextLeaderEvent::Delete);
                    }
                    if let Some(kv) = event.kv {
                        let rev = kv.mod_revision;
                        return Some(NextLeaderEvent::Put(kv, rev));
                    }
                }
            }
            crate::watch::WatchEvent::End | crate::watch::WatchEvent::Error(_) => return None,
            _ => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_key_is_prefix_plus_decimal_lease_id() {
        assert_eq!(own_key(b"election/name/", 42), Bytes::from_static(b"election/name/42"));
    }
}
