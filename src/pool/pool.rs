// src/pool/pool.rs

//! The connection pool itself: host set, global policy, authenticator, and the
//! Fisher-Yates host rotation used by every unary and streaming call.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tonic::metadata::MetadataMap;
use tracing::debug;

use crate::config::Config;
use crate::error::ClientError;
use crate::pool::auth::Authenticator;
use crate::pool::host::{AnyClient, Host, ServiceKind};
use crate::pool::policy::{CircuitBreaker, RetryPolicy};

/// Describes the call a user-supplied call-options factory is being asked to
/// customise: which service/method is being invoked, and whether it is a streaming
/// call.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub service: ServiceKind,
    pub method: &'static str,
    pub is_stream: bool,
}

/// Per-call overrides: additional gRPC metadata merged on top of whatever the
/// connection pool already attaches (auth token). Per-call values win over defaults.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub metadata: MetadataMap,
}

impl CallOptions {
    fn merge_into(self, base: &mut MetadataMap) {
        for key_and_value in self.metadata.into_headers() {
            let (key, value) = key_and_value;
            if let Some(key) = key {
                base.insert(key, value);
            }
        }
    }
}

/// Owns a set of [`Host`]s; for each call, executes under the global retry policy,
/// iterating hosts under their own circuit-breaker policy, and transparently injects
/// auth metadata.
pub struct Pool {
    hosts: Vec<Arc<Host>>,
    global_policy: RetryPolicy,
    authenticator: Authenticator,
    deterministic: bool,
    rotation: AtomicUsize,
}

impl Pool {
    /// Builds a pool from a validated [`Config`]. At least one host is required (the
    /// config's own `validate()` already enforces this).
    pub fn connect(config: &Config) -> Result<Pool, ClientError> {
        config.validate()?;
        let hosts = config
            .hosts
            .iter()
            .map(|endpoint| {
                let breaker = CircuitBreaker::new(
                    config.fault_handling.host_break_threshold,
                    config.fault_handling.host_break_duration,
                );
                Arc::new(Host::new(
                    endpoint.clone(),
                    config.credentials.clone(),
                    config.dial_timeout,
                    breaker,
                ))
            })
            .collect();
        Ok(Pool {
            hosts,
            global_policy: RetryPolicy::new(config.fault_handling.global_max_retries),
            authenticator: Authenticator::new(config.auth.clone()),
            deterministic: config.deterministic_ordering,
            rotation: AtomicUsize::new(0),
        })
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Fisher-Yates shuffle of the host set, unless `deterministic_ordering` is set, in
    /// which case hosts rotate in insertion order (used by tests).
    fn ordered_hosts(&self) -> Vec<Arc<Host>> {
        if self.deterministic {
            let start = self.rotation.fetch_add(1, Ordering::Relaxed) % self.hosts.len().max(1);
            let mut ordered = self.hosts.clone();
            ordered.rotate_left(start);
            ordered
        } else {
            let mut ordered = self.hosts.clone();
            let mut rng = SmallRng::from_entropy();
            ordered.shuffle(&mut rng);
            ordered
        }
    }

    /// Unary call contract: runs `op` against each host in turn under the host's
    /// circuit breaker, retrying the whole host iteration under the global policy.
    pub async fn exec<T, F, Fut>(&self, service: ServiceKind, op: F) -> Result<T, ClientError>
    where
        F: Fn(AnyClient, MetadataMap) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, ClientError>> + Send,
    {
        self.exec_opts(service, CallOptions::default(), op).await
    }

    /// Like [`Pool::exec`] but merges `opts` (e.g. per-call deadline metadata) on top
    /// of the auth metadata the pool already attaches; per-call values win.
    pub async fn exec_opts<T, F, Fut>(
        &self,
        service: ServiceKind,
        opts: CallOptions,
        op: F,
    ) -> Result<T, ClientError>
    where
        F: Fn(AnyClient, MetadataMap) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, ClientError>> + Send,
    {
        match self.exec_with_retry(service, &opts, &op).await {
            Err(ClientError::InvalidAuthToken) => {
                debug!("invalid auth token, invalidating and retrying once");
                self.authenticator.invalidate().await;
                self.exec_with_retry(service, &opts, &op).await
            }
            other => other,
        }
    }

    async fn exec_with_retry<T, F, Fut>(
        &self,
        service: ServiceKind,
        opts: &CallOptions,
        op: &F,
    ) -> Result<T, ClientError>
    where
        F: Fn(AnyClient, MetadataMap) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, ClientError>> + Send,
    {
        let mut most_specific: Option<ClientError> = None;
        let mut last_err = ClientError::Unavailable("no hosts attempted".into());
        for attempt in 0..=self.global_policy.max_retries {
            match self.with_connection(service, opts, op).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if !e.recoverable() {
                        return Err(e);
                    }
                    if !matches!(e, ClientError::Unavailable(_)) {
                        most_specific = Some(e.clone());
                    }
                    last_err = e;
                    debug!(attempt, error = %last_err, "global retry after recoverable error");
                }
            }
        }
        Err(most_specific.unwrap_or(last_err))
    }

    /// Fetches auth metadata once, then iterates up to `len(hosts)` hosts, running
    /// `op` under each host's circuit breaker.
    async fn with_connection<T, F, Fut>(
        &self,
        service: ServiceKind,
        opts: &CallOptions,
        op: &F,
    ) -> Result<T, ClientError>
    where
        F: Fn(AnyClient, MetadataMap) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut metadata = self.authenticator.get_metadata(&self.hosts).await?;
        opts.clone().merge_into(&mut metadata);
        let order = self.ordered_hosts();
        let mut last_err = ClientError::Unavailable("no hosts available".into());

        for host in order.iter().take(self.hosts.len().max(1)) {
            let metadata = metadata.clone();
            let outcome = host
                .breaker
                .call(|| async {
                    let client = host.client_for(service).await?;
                    op(client, metadata).await
                })
                .await;
            match outcome {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if e.recoverable() {
                        host.reset().await;
                        last_err = e;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
        Err(last_err)
    }

    /// Picks a host and hands back its client for `service` directly, for streaming
    /// subsystems (watch, lease keep-alive) that manage their own stream lifecycle
    /// rather than going through `exec`'s unary retry loop.
    pub async fn pick_streaming_client(
        &self,
        service: ServiceKind,
    ) -> Result<(Arc<Host>, AnyClient, MetadataMap), ClientError> {
        let metadata = self.authenticator.get_metadata(&self.hosts).await?;
        let order = self.ordered_hosts();
        let mut last_err = ClientError::Unavailable("no hosts available".into());
        for host in order {
            match host.client_for(service).await {
                Ok(client) => return Ok((host, client, metadata)),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    pub async fn shutdown(&self) {
        for host in &self.hosts {
            host.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    fn config() -> Config {
        ConfigBuilder::new()
            .hosts(["http://127.0.0.1:23790", "http://127.0.0.1:23791"])
            .deterministic_ordering(true)
            .build()
            .unwrap()
    }

    #[test]
    fn connect_builds_one_host_per_endpoint() {
        let pool = Pool::connect(&config()).unwrap();
        assert_eq!(pool.host_count(), 2);
    }

    #[test]
    fn deterministic_ordering_rotates() {
        let pool = Pool::connect(&config()).unwrap();
        let first = pool.ordered_hosts();
        let second = pool.ordered_hosts();
        assert_ne!(first[0].endpoint, second[0].endpoint);
    }
}
