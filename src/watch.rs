// src/watch.rs

//! The watch multiplexer: a singleton per pool that multiplexes N logical watchers
//! onto one bidirectional `Watch` stream, handling reconnection/replay, cancellation
//! bookkeeping, and revision progress tracking. All mutable state lives inside a
//! single dedicated task reached through an `mpsc` command inbox, so it needs no
//! locking of its own.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::error::ClientError;
use crate::pb::{self, Event};
use crate::pool::{Pool, ServiceKind};
use crate::range::KeyRange;

/// Which event kinds the server should suppress on a watcher's stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchFilters {
    pub no_put: bool,
    pub no_delete: bool,
}

/// The fixed enumeration of events a [`Watcher`] can emit.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Connected { revision: i64 },
    Disconnected(ClientError),
    Data(Vec<Event>),
    End,
    Error(ClientError),
}

struct WatcherSlot {
    server_id: Option<i64>,
    key: Bytes,
    range_end: Bytes,
    start_revision: i64,
    filters: WatchFilters,
    pending_cancel: bool,
    events_tx: mpsc::Sender<WatchEvent>,
}

impl WatcherSlot {
    fn create_request(&self) -> pb::WatchRequest {
        let mut filters = Vec::new();
        if self.filters.no_put {
            filters.push(0); // WatchCreateRequest::FilterType::NOPUT
        }
        if self.filters.no_delete {
            filters.push(1); // WatchCreateRequest::FilterType::NODELETE
        }
        pb::WatchRequest {
            request_union: Some(pb::watch_request::RequestUnion::CreateRequest(pb::WatchCreateRequest {
                key: self.key.clone(),
                range_end: self.range_end.clone(),
                start_revision: self.start_revision,
                progress_notify: true,
                filters,
                prev_kv: false,
                watch_id: 0,
                fragment: false,
            })),
        }
    }
}

enum MuxCommand {
    Attach {
        key: Bytes,
        range_end: Bytes,
        start_revision: i64,
        filters: WatchFilters,
        events_tx: mpsc::Sender<WatchEvent>,
        reply: oneshot::Sender<u64>,
    },
    Detach {
        local_id: u64,
        reply: oneshot::Sender<()>,
    },
}

/// A handle to a live subscription. Detach with `cancel()`; the multiplexer also
/// exposes `start_revision()` so callers can diff/reconcile across a reconnect
/// themselves, since the upstream transport can in rare cases drop frames during
/// server-side resumption.
pub struct Watcher {
    local_id: u64,
    cmd_tx: mpsc::Sender<MuxCommand>,
    events: mpsc::Receiver<WatchEvent>,
}

impl Watcher {
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    /// Cancels this watcher. Safe to call from any context, idempotent.
    pub async fn cancel(&mut self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(MuxCommand::Detach { local_id: self.local_id, reply: reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }
    }
}

/// The multiplexer entry point: `manager.watch(range, start_revision, filters)`.
#[derive(Clone)]
pub struct WatchManager {
    cmd_tx: mpsc::Sender<MuxCommand>,
}

impl WatchManager {
    pub fn new(pool: Arc<Pool>, backoff_cap: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        tokio::spawn(run(pool, backoff_cap, cmd_rx));
        WatchManager { cmd_tx }
    }

    pub async fn watch(
        &self,
        range: KeyRange,
        start_revision: i64,
        filters: WatchFilters,
    ) -> Result<Watcher, ClientError> {
        let (events_tx, events_rx) = mpsc::channel(256);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(MuxCommand::Attach {
                key: range.start,
                range_end: range.end,
                start_revision,
                filters,
                events_tx,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ClientError::ClientClosed)?;
        let local_id = reply_rx.await.map_err(|_| ClientError::ClientClosed)?;
        Ok(Watcher { local_id, cmd_tx: self.cmd_tx.clone(), events: events_rx })
    }
}

struct MuxState {
    watchers: HashMap<u64, WatcherSlot>,
    server_to_local: HashMap<i64, u64>,
    id_queue: VecDeque<u64>,
    expected_closers: HashSet<i64>,
    next_id: u64,
}

impl MuxState {
    fn new() -> Self {
        MuxState {
            watchers: HashMap::new(),
            server_to_local: HashMap::new(),
            id_queue: VecDeque::new(),
            expected_closers: HashSet::new(),
            next_id: 1,
        }
    }

    fn notify_all_disconnected(&self, err: &ClientError) {
        for slot in self.watchers.values() {
            let _ = slot.events_tx.try_send(WatchEvent::Disconnected(err.clone()));
        }
    }

    fn mark_all_unassigned(&mut self) {
        for server_id in self.expected_closers.drain() {
            if let Some(local_id) = self.server_to_local.get(&server_id) {
                if let Some(slot) = self.watchers.remove(local_id) {
                    let _ = slot.events_tx.try_send(WatchEvent::End);
                }
            }
        }
        for slot in self.watchers.values_mut() {
            slot.server_id = None;
        }
        self.server_to_local.clear();
        self.id_queue.clear();
    }
}

/// Exponential backoff with decorrelated jitter, capped at `cap`.
struct Backoff {
    cap: Duration,
    current: Duration,
}

impl Backoff {
    fn new(cap: Duration) -> Self {
        Backoff { cap, current: Duration::from_millis(100) }
    }

    fn next(&mut self) -> Duration {
        let base_ms = self.current.as_millis().max(1) as u64;
        let jittered_ms = rand::thread_rng().gen_range(base_ms..=(base_ms * 3).min(self.cap.as_millis() as u64).max(base_ms));
        self.current = Duration::from_millis(jittered_ms).min(self.cap);
        self.current
    }

    fn reset(&mut self) {
        self.current = Duration::from_millis(100);
    }
}

async fn run(pool: Arc<Pool>, backoff_cap: Duration, mut cmd_rx: mpsc::Receiver<MuxCommand>) {
    let mut state = MuxState::new();
    let mut backoff = Backoff::new(backoff_cap);

    'outer: loop {
        if state.watchers.is_empty() {
            match cmd_rx.recv().await {
                Some(cmd) => handle_idle_command(cmd, &mut state),
                None => return,
            }
            continue 'outer;
        }

        let (_, client, _md) = match pool.pick_streaming_client(ServiceKind::Watch).await {
            Ok(v) => v,
            Err(e) => {
                state.notify_all_disconnected(&e);
                tokio::time::sleep(backoff.next()).await;
                continue 'outer;
            }
        };
        let mut client = client.into_watch();
        let (out_tx, out_rx) = mpsc::channel::<pb::WatchRequest>(64);

        let mut inbound = match client.watch(ReceiverStream::new(out_rx)).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                state.notify_all_disconnected(&ClientError::classify(status));
                tokio::time::sleep(backoff.next()).await;
                continue 'outer;
            }
        };
        backoff.reset();
        info!("watch stream (re)established");

        state.mark_all_unassigned();
        let mut ordered_ids: Vec<u64> = state.watchers.keys().copied().collect();
        ordered_ids.sort_unstable();
        let mut write_failed = false;
        for local_id in ordered_ids {
            let request = state.watchers.get(&local_id).unwrap().create_request();
            if out_tx.send(request).await.is_err() {
                write_failed = true;
                break;
            }
            state.id_queue.push_back(local_id);
        }
        if write_failed {
            state.notify_all_disconnected(&ClientError::WatchStreamEnded);
            tokio::time::sleep(backoff.next()).await;
            continue 'outer;
        }

        loop {
            tokio::select! {
                maybe_cmd = cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(cmd) => handle_connected_command(cmd, &mut state, &out_tx).await,
                        None => return,
                    }
                }
                frame = inbound.message() => {
                    match frame {
                        Ok(Some(response)) => dispatch_frame(response, &mut state, &out_tx).await,
                        Ok(None) => {
                            state.notify_all_disconnected(&ClientError::WatchStreamEnded);
                            continue 'outer;
                        }
                        Err(status) => {
                            let err = ClientError::classify(status);
                            warn!(error = %err, "watch stream error, reconnecting");
                            state.notify_all_disconnected(&err);
                            continue 'outer;
                        }
                    }
                }
            }
            if state.watchers.is_empty() {
                continue 'outer;
            }
        }
    }
}

fn handle_idle_command(cmd: MuxCommand, state: &mut MuxState) {
    match cmd {
        MuxCommand::Attach { key, range_end, start_revision, filters, events_tx, reply } => {
            let local_id = state.next_id;
            state.next_id += 1;
            state.watchers.insert(
                local_id,
                WatcherSlot {
                    server_id: None,
                    key,
                    range_end,
                    start_revision,
                    filters,
                    pending_cancel: false,
                    events_tx,
                },
            );
            let _ = reply.send(local_id);
        }
        MuxCommand::Detach { local_id, reply } => {
            state.watchers.remove(&local_id);
            let _ = reply.send(());
        }
    }
}

async fn handle_connected_command(
    cmd: MuxCommand,
    state: &mut MuxState,
    out_tx: &mpsc::Sender<pb::WatchRequest>,
) {
    match cmd {
        MuxCommand::Attach { key, range_end, start_revision, filters, events_tx, reply } => {
            let local_id = state.next_id;
            state.next_id += 1;
            let slot = WatcherSlot {
                server_id: None,
                key,
                range_end,
                start_revision,
                filters,
                pending_cancel: false,
                events_tx,
            };
            let request = slot.create_request();
            state.watchers.insert(local_id, slot);
            let _ = out_tx.send(request).await;
            state.id_queue.push_back(local_id);
            let _ = reply.send(local_id);
        }
        MuxCommand::Detach { local_id, reply } => {
            if let Some(slot) = state.watchers.get_mut(&local_id) {
                match slot.server_id {
                    Some(server_id) => {
                        state.expected_closers.insert(server_id);
                        let _ = out_tx
                            .send(pb::WatchRequest {
                                request_union: Some(pb::watch_request::RequestUnion::CancelRequest(
                                    pb::WatchCancelRequest { watch_id: server_id },
                                )),
                            })
                            .await;
                    }
                    None => {
                        // Creation in flight: cancel as soon as the server assigns an
                        // id (see dispatch_frame's `created` branch).
                        slot.pending_cancel = true;
                    }
                }
            } else {
                state.watchers.remove(&local_id);
            }
            let _ = reply.send(());
        }
    }
}

async fn dispatch_frame(
    response: pb::WatchResponse,
    state: &mut MuxState,
    out_tx: &mpsc::Sender<pb::WatchRequest>,
) {
    if response.created {
        let Some(local_id) = state.id_queue.pop_front() else { return };
        let Some(slot) = state.watchers.get_mut(&local_id) else { return };
        let server_id = response.watch_id;

        // Server-side compaction can force a later floor than we requested; adopt it.
        if let Some(header) = &response.header {
            if header.revision + 1 < slot.start_revision || slot.start_revision == 0 {
                slot.start_revision = header.revision + 1;
            }
        }

        if slot.pending_cancel {
            state.expected_closers.insert(server_id);
            let _ = out_tx
                .send(pb::WatchRequest {
                    request_union: Some(pb::watch_request::RequestUnion::CancelRequest(
                        pb::WatchCancelRequest { watch_id: server_id },
                    )),
                })
                .await;
            slot.server_id = Some(server_id);
            state.server_to_local.insert(server_id, local_id);
        } else {
            slot.server_id = Some(server_id);
            state.server_to_local.insert(server_id, local_id);
            let revision = response.header.as_ref().map(|h| h.revision).unwrap_or(0);
            let _ = slot.events_tx.try_send(WatchEvent::Connected { revision });
        }
        return;
    }

    if response.canceled {
        let Some(local_id) = state.server_to_local.remove(&response.watch_id) else { return };
        if state.expected_closers.remove(&response.watch_id) {
            if let Some(slot) = state.watchers.remove(&local_id) {
                let _ = slot.events_tx.try_send(WatchEvent::End);
            }
        } else if let Some(slot) = state.watchers.get(&local_id) {
            let reason = if response.cancel_reason.is_empty() {
                ClientError::WatchStreamEnded
            } else {
                ClientError::Internal(response.cancel_reason)
            };
            let _ = slot.events_tx.try_send(WatchEvent::Error(reason));
        }
        return;
    }

    let Some(&local_id) = state.server_to_local.get(&response.watch_id) else { return };
    if let Some(slot) = state.watchers.get_mut(&local_id) {
        if let Some(header) = &response.header {
            slot.start_revision = header.revision + 1;
        }
        let _ = slot.events_tx.try_send(WatchEvent::Data(response.events));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_stays_within_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(500));
        for _ in 0..20 {
            let next = backoff.next();
            assert!(next <= Duration::from_millis(500));
        }
    }

    #[test]
    fn create_request_carries_progress_notify() {
        let (tx, _rx) = mpsc::channel(1);
        let slot = WatcherSlot {
            server_id: None,
            key: Bytes::from_static(b"foo"),
            range_end: Bytes::new(),
            start_revision: 5,
            filters: WatchFilters::default(),
            pending_cancel: false,
            events_tx: tx,
        };
        let request = slot.create_request();
        match request.request_union {
            Some(pb::watch_request::RequestUnion::CreateRequest(create)) => {
                assert!(create.progress_notify);
                assert_eq!(create.start_revision, 5);
            }
            _ => panic!("expected a create request"),
        }
    }
}
