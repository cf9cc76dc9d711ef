// src/pool/host.rs

//! A single peer: a lazily-dialed `tonic` channel plus the per-service client
//! wrappers built from it, guarded by the host's own circuit-breaker policy.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tracing::{debug, warn};

use crate::config::Credentials;
use crate::error::ClientError;
use crate::pb::{AuthClient, ClusterClient, KvClient, LeaseClient, MaintenanceClient, WatchClient};
use crate::pool::policy::CircuitBreaker;

/// The six gRPC services the core subsystems consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Kv,
    Watch,
    Lease,
    Auth,
    Cluster,
    Maintenance,
}

/// A cached, already-constructed typed client for one of the six services. Each
/// variant is a thin wrapper around a cloned `Channel` handle, so cloning is cheap;
/// the cache exists to avoid re-materialising the wrapper type on every call.
#[derive(Clone)]
pub enum AnyClient {
    Kv(KvClient<Channel>),
    Watch(WatchClient<Channel>),
    Lease(LeaseClient<Channel>),
    Auth(AuthClient<Channel>),
    Cluster(ClusterClient<Channel>),
    Maintenance(MaintenanceClient<Channel>),
}

impl AnyClient {
    pub fn into_kv(self) -> KvClient<Channel> {
        match self {
            AnyClient::Kv(c) => c,
            _ => unreachable!("service kind mismatch"),
        }
    }
    pub fn into_watch(self) -> WatchClient<Channel> {
        match self {
            AnyClient::Watch(c) => c,
            _ => unreachable!("service kind mismatch"),
        }
    }
    pub fn into_lease(self) -> LeaseClient<Channel> {
        match self {
            AnyClient::Lease(c) => c,
            _ => unreachable!("service kind mismatch"),
        }
    }
    pub fn into_auth(self) -> AuthClient<Channel> {
        match self {
            AnyClient::Auth(c) => c,
            _ => unreachable!("service kind mismatch"),
        }
    }
    pub fn into_cluster(self) -> ClusterClient<Channel> {
        match self {
            AnyClient::Cluster(c) => c,
            _ => unreachable!("service kind mismatch"),
        }
    }
    pub fn into_maintenance(self) -> MaintenanceClient<Channel> {
        match self {
            AnyClient::Maintenance(c) => c,
            _ => unreachable!("service kind mismatch"),
        }
    }
}

enum ChannelState {
    Empty,
    Ready(Channel),
}

/// Holds lazily-created per-service RPC clients to one peer, guarded by a host-level
/// fault-handling policy.
pub struct Host {
    pub endpoint: String,
    credentials: Option<Credentials>,
    dial_timeout: Duration,
    channel: Mutex<ChannelState>,
    clients: Mutex<HashMap<ServiceKind, AnyClient>>,
    closed: AtomicBool,
    pub breaker: CircuitBreaker,
}

impl Host {
    pub fn new(
        endpoint: String,
        credentials: Option<Credentials>,
        dial_timeout: Duration,
        breaker: CircuitBreaker,
    ) -> Self {
        Host {
            endpoint,
            credentials,
            dial_timeout,
            channel: Mutex::new(ChannelState::Empty),
            clients: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            breaker,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn channel(&self) -> Result<Channel, ClientError> {
        if self.is_closed() {
            return Err(ClientError::ClientClosed);
        }
        let mut guard = self.channel.lock().await;
        if let ChannelState::Ready(channel) = &*guard {
            return Ok(channel.clone());
        }
        let channel = dial(&self.endpoint, self.credentials.as_ref(), self.dial_timeout).await?;
        *guard = ChannelState::Ready(channel.clone());
        Ok(channel)
    }

    /// Returns the cached client for `service`, dialing and constructing it on first
    /// use. Fails with `ClientClosed` if the host has been closed.
    pub async fn client_for(&self, service: ServiceKind) -> Result<AnyClient, ClientError> {
        if self.is_closed() {
            return Err(ClientError::ClientClosed);
        }
        {
            let cache = self.clients.lock().await;
            if let Some(client) = cache.get(&service) {
                return Ok(client.clone());
            }
        }
        let channel = self.channel().await?;
        let client = match service {
            ServiceKind::Kv => AnyClient::Kv(KvClient::new(channel)),
            ServiceKind::Watch => AnyClient::Watch(WatchClient::new(channel)),
            ServiceKind::Lease => AnyClient::Lease(LeaseClient::new(channel)),
            ServiceKind::Auth => AnyClient::Auth(AuthClient::new(channel)),
            ServiceKind::Cluster => AnyClient::Cluster(ClusterClient::new(channel)),
            ServiceKind::Maintenance => AnyClient::Maintenance(MaintenanceClient::new(channel)),
        };
        let mut cache = self.clients.lock().await;
        cache.insert(service, client.clone());
        Ok(client)
    }

    /// Drains cached clients and the dialed channel. If a dial is in flight, the old
    /// channel handle is dropped after a bounded grace period rather than
    /// immediately, to work around a transport race where in-flight requests on the
    /// old channel can be aborted before the response arrives.
    pub async fn reset(&self) {
        self.clients.lock().await.clear();
        let old = {
            let mut guard = self.channel.lock().await;
            std::mem::replace(&mut *guard, ChannelState::Empty)
        };
        if let ChannelState::Ready(channel) = old {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                drop(channel);
            });
        }
        debug!(endpoint = %self.endpoint, "host reset");
    }

    /// Resets and permanently marks the host closed; no client may be handed out
    /// afterwards.
    pub async fn close(&self) {
        self.reset().await;
        self.closed.store(true, Ordering::Release);
        warn!(endpoint = %self.endpoint, "host closed");
    }
}

fn endpoint_url(raw: &str, tls: bool) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else if tls {
        format!("https://{raw}")
    } else {
        format!("http://{raw}")
    }
}

async fn dial(
    endpoint: &str,
    credentials: Option<&Credentials>,
    dial_timeout: Duration,
) -> Result<Channel, ClientError> {
    let uses_tls = endpoint.starts_with("https://") || credentials.is_some();
    let url = endpoint_url(endpoint, uses_tls);

    let mut builder = Endpoint::from_shared(url.clone())
        .map_err(|e| ClientError::Config(format!("invalid host '{endpoint}': {e}")))?
        .connect_timeout(dial_timeout)
        .timeout(dial_timeout);

    if uses_tls {
        let mut tls = ClientTlsConfig::new();
        if let Some(creds) = credentials {
            let root = fs::read(&creds.root_certificate).map_err(|e| {
                ClientError::Config(format!("reading root_certificate: {e}"))
            })?;
            tls = tls.ca_certificate(Certificate::from_pem(root));
            if let (Some(key_path), Some(chain_path)) = (&creds.private_key, &creds.cert_chain) {
                let key = fs::read(key_path)
                    .map_err(|e| ClientError::Config(format!("reading private_key: {e}")))?;
                let chain = fs::read(chain_path)
                    .map_err(|e| ClientError::Config(format!("reading cert_chain: {e}")))?;
                tls = tls.identity(Identity::from_pem(chain, key));
            }
        } else {
            tls = tls.with_native_roots();
        }
        builder = builder
            .tls_config(tls)
            .map_err(|e| ClientError::Config(format!("invalid TLS config: {e}")))?;
    }

    debug!(%url, "dialing host");
    Ok(builder.connect_lazy())
}
