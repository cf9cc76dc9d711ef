// src/lease.rs

//! Long-lived keep-alive loop for a single lease: grants it, maintains the
//! `LeaseKeepAlive` duplex stream, and emits lifecycle events. Puts issued through
//! [`Lease::put`] automatically piggy-back the lease ID.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataMap;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::kv::PutBuilder;
use crate::pb::{self, LeaseKeepAliveResponse};
use crate::pool::{AnyClient, Pool, ServiceKind};

/// The fixed enumeration of events a [`Lease`] can emit.
#[derive(Debug, Clone)]
pub enum LeaseEvent {
    Lost(ClientError),
    KeepaliveFired,
    KeepaliveSucceeded(i64),
    KeepaliveFailed(ClientError),
    KeepaliveEstablished,
}

struct LeaseShared {
    revoked: AtomicBool,
    last_keepalive_at: SyncMutex<Instant>,
}

/// A granted lease and its background keep-alive loop.
pub struct Lease {
    pool: Arc<Pool>,
    id: i64,
    ttl: i64,
    state: Arc<LeaseShared>,
    events: broadcast::Sender<LeaseEvent>,
    stop: SyncMutex<Option<oneshot::Sender<()>>>,
}

impl Lease {
    /// Grants a new lease with the given TTL (seconds, must be >= 1) and starts its
    /// keep-alive loop.
    pub async fn grant(pool: Arc<Pool>, ttl_seconds: i64) -> Result<Lease> {
        if ttl_seconds < 1 {
            return Err(ClientError::InvalidArgument("lease TTL must be >= 1 second".into()));
        }

        let request = pb::LeaseGrantRequest { ttl: ttl_seconds, id: 0 };
        let response = pool
            .exec(ServiceKind::Lease, move |client, md: MetadataMap| {
                let request = request.clone();
                let mut client = client.into_lease();
                async move {
                    let mut rpc = tonic::Request::new(request);
                    *rpc.metadata_mut() = md;
                    client.lease_grant(rpc).await.map(|r| r.into_inner()).map_err(ClientError::classify)
                }
            })
            .await?;

        if !response.error.is_empty() {
            return Err(ClientError::Internal(response.error));
        }

        let granted_ttl = response.ttl.max(1);
        info!(lease_id = response.id, ttl = granted_ttl, "lease granted");

        let state = Arc::new(LeaseShared {
            revoked: AtomicBool::new(false),
            last_keepalive_at: SyncMutex::new(Instant::now()),
        });
        let (events_tx, _) = broadcast::channel(64);
        let (stop_tx, stop_rx) = oneshot::channel();

        let task_pool = pool.clone();
        let task_state = state.clone();
        let task_events = events_tx.clone();
        let lease_id = response.id;
        tokio::spawn(async move {
            keepalive_loop(task_pool, lease_id, granted_ttl, task_state, task_events, stop_rx).await;
        });

        Ok(Lease {
            pool,
            id: response.id,
            ttl: granted_ttl,
            state,
            events: events_tx,
            stop: SyncMutex::new(Some(stop_tx)),
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn ttl(&self) -> i64 {
        self.ttl
    }

    pub fn revoked(&self) -> bool {
        self.state.revoked.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LeaseEvent> {
        self.events.subscribe()
    }

    fn stop_keepalive(&self) {
        if let Some(tx) = self.stop.lock().take() {
            let _ = tx.send(());
        }
    }

    fn mark_lost(&self, err: ClientError) {
        if !self.state.revoked.swap(true, Ordering::AcqRel) {
            let _ = self.events.send(LeaseEvent::Lost(err));
        }
    }

    /// Issues one `LeaseKeepAlive` round trip outside the background loop. A
    /// `TTL == 0` response (or an `InvalidAuthToken`/not-found error) means the
    /// server no longer knows this lease: marks it lost and raises `LeaseInvalid`.
    pub async fn keepalive_once(&self) -> Result<LeaseKeepAliveResponse> {
        let (_, client, _md) = self.pool.pick_streaming_client(ServiceKind::Lease).await?;
        let mut client = client.into_lease();
        let (tx, rx) = mpsc::channel(1);
        tx.send(pb::LeaseKeepAliveRequest { id: self.id })
            .await
            .map_err(|_| ClientError::ClientRuntime("keepalive_once channel closed".into()))?;
        drop(tx);

        let mut inbound = client
            .lease_keep_alive(ReceiverStream::new(rx))
            .await
            .map_err(ClientError::classify)?
            .into_inner();

        match inbound.message().await.map_err(ClientError::classify)? {
            Some(response) if response.ttl == 0 => {
                self.mark_lost(ClientError::LeaseInvalid);
                Err(ClientError::LeaseInvalid)
            }
            Some(response) => {
                *self.state.last_keepalive_at.lock() = Instant::now();
                Ok(response)
            }
            None => Err(ClientError::WatchStreamEnded),
        }
    }

    /// Closes the keep-alive loop and revokes the lease server-side. Idempotent.
    pub async fn revoke(&self) -> Result<()> {
        let already_revoked = self.state.revoked.swap(true, Ordering::AcqRel);
        self.stop_keepalive();
        if already_revoked {
            return Ok(());
        }
        let id = self.id;
        self.pool
            .exec(ServiceKind::Lease, move |client, md: MetadataMap| {
                let mut client = client.into_lease();
                async move {
                    let mut rpc = tonic::Request::new(pb::LeaseRevokeRequest { id });
                    *rpc.metadata_mut() = md;
                    client.lease_revoke(rpc).await.map(|_| ()).map_err(ClientError::classify)
                }
            })
            .await
    }

    /// Closes the keep-alive loop without revoking; the lease's TTL continues to run
    /// server-side until it expires naturally.
    pub async fn release(&self) {
        self.state.revoked.store(true, Ordering::Release);
        self.stop_keepalive();
    }

    /// Starts a put that automatically piggy-backs this lease's ID, waiting for the
    /// grant if still in flight. If the server responds `LeaseInvalid`, the lease is
    /// marked lost before the error propagates to the caller.
    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> LeasePutBuilder<'_> {
        LeasePutBuilder { lease: self, inner: PutBuilder::new(self.pool.clone(), key.into(), value.into()) }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.stop_keepalive();
    }
}

/// A [`PutBuilder`] bound to a lease, pre-seeded with its lease ID.
pub struct LeasePutBuilder<'a> {
    lease: &'a Lease,
    inner: PutBuilder,
}

impl<'a> LeasePutBuilder<'a> {
    pub fn prev_kv(mut self, prev_kv: bool) -> Self {
        self.inner = self.inner.prev_kv(prev_kv);
        self
    }

    pub async fn exec(self) -> Result<pb::PutResponse> {
        let result = self.inner.lease(self.lease.id).exec().await;
        if let Err(ClientError::LeaseInvalid) = &result {
            self.lease.mark_lost(ClientError::LeaseInvalid);
        }
        result
    }
}

async fn keepalive_loop(
    pool: Arc<Pool>,
    id: i64,
    ttl: i64,
    state: Arc<LeaseShared>,
    events: broadcast::Sender<LeaseEvent>,
    mut stop: oneshot::Receiver<()>,
) {
    let period = Duration::from_secs((ttl / 3).max(1) as u64);
    let loss_window = Duration::from_secs((ttl.max(1) as u64) * 2);

    loop {
        if state.revoked.load(Ordering::Acquire) {
            return;
        }

        let (_, client, _md) = match pool.pick_streaming_client(ServiceKind::Lease).await {
            Ok(v) => v,
            Err(e) => {
                let _ = events.send(LeaseEvent::KeepaliveFailed(e));
                if elapsed_since(&state) > loss_window {
                    events_send_lost(&state, &events, ClientError::Unavailable("no host reachable".into()));
                    return;
                }
                if wait_or_stop(&mut stop, Duration::from_millis(100)).await {
                    return;
                }
                continue;
            }
        };

        if run_stream(client, id, period, &state, &events, &mut stop).await {
            return;
        }

        if elapsed_since(&state) > loss_window {
            events_send_lost(&state, &events, ClientError::Unavailable("keepalive window exceeded".into()));
            return;
        }
        if wait_or_stop(&mut stop, Duration::from_millis(100)).await {
            return;
        }
    }
}

/// Runs one incarnation of the keep-alive stream. Returns `true` if the loop should
/// terminate entirely (lease lost or stopped), `false` if it should reconnect.
async fn run_stream(
    client: AnyClient,
    id: i64,
    period: Duration,
    state: &Arc<LeaseShared>,
    events: &broadcast::Sender<LeaseEvent>,
    stop: &mut oneshot::Receiver<()>,
) -> bool {
    let mut client = client.into_lease();
    let (tx, rx) = mpsc::channel::<pb::LeaseKeepAliveRequest>(4);

    let mut inbound = match client.lease_keep_alive(ReceiverStream::new(rx)).await {
        Ok(response) => response.into_inner(),
        Err(status) => {
            let _ = events.send(LeaseEvent::KeepaliveFailed(ClientError::classify(status)));
            return false;
        }
    };
    let _ = events.send(LeaseEvent::KeepaliveEstablished);

    let mut ticker = tokio::time::interval(period);
    ticker.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = &mut *stop => return true,
            _ = ticker.tick() => {
                if tx.send(pb::LeaseKeepAliveRequest { id }).await.is_err() {
                    return false;
                }
                let _ = events.send(LeaseEvent::KeepaliveFired);

                match inbound.message().await {
                    Ok(Some(response)) if response.ttl == 0 => {
                        events_send_lost(state, events, ClientError::LeaseInvalid);
                        return true;
                    }
                    Ok(Some(response)) => {
                        *state.last_keepalive_at.lock() = Instant::now();
                        let _ = events.send(LeaseEvent::KeepaliveSucceeded(response.ttl));
                    }
                    Ok(None) => {
                        debug!(lease_id = id, "keepalive stream ended");
                        return false;
                    }
                    Err(status) => {
                        let _ = events.send(LeaseEvent::KeepaliveFailed(ClientError::classify(status)));
                        return false;
                    }
                }
            }
        }
    }
}

fn elapsed_since(state: &LeaseShared) -> Duration {
    state.last_keepalive_at.lock().elapsed()
}

fn events_send_lost(state: &LeaseShared, events: &broadcast::Sender<LeaseEvent>, err: ClientError) {
    if !state.revoked.swap(true, Ordering::AcqRel) {
        warn!(error = %err, "lease lost");
        let _ = events.send(LeaseEvent::Lost(err));
    }
}

/// Sleeps for `duration` unless `stop` fires first. Returns `true` if stopped.
async fn wait_or_stop(stop: &mut oneshot::Receiver<()>, duration: Duration) -> bool {
    tokio::select! {
        _ = &mut *stop => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_window_is_twice_ttl() {
        let ttl = 10_i64;
        let loss_window = Duration::from_secs((ttl.max(1) as u64) * 2);
        assert_eq!(loss_window, Duration::from_secs(20));
    }

    #[test]
    fn period_is_ttl_over_three_floored_at_one_second() {
        assert_eq!(Duration::from_secs((1_i64 / 3).max(1) as u64), Duration::from_secs(1));
        assert_eq!(Duration::from_secs((9_i64 / 3).max(1) as u64), Duration::from_secs(3));
    }
}
