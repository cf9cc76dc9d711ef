// src/client.rs

//! The client facade: wires the connection pool, authenticator, and watch
//! multiplexer together behind a single entry point. `Client::connect` is the sole
//! constructor; every subsystem accessor (`kv`, `lease`, `watch`, `election`, `lock`,
//! `auth_role`, `auth_user`, `cluster`, `maintenance`) hangs off the resulting handle.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::filter::EnvFilter;

use crate::auth_role::AuthRole;
use crate::auth_user::AuthUser;
use crate::cluster::Cluster;
use crate::config::Config;
use crate::election::{Election, ElectionObserver};
use crate::error::{ClientError, Result};
use crate::kv::Kv;
use crate::lease::Lease;
use crate::lock::Lock;
use crate::maintenance::Maintenance;
use crate::pool::Pool;
use crate::stm::{self, Isolation};
use crate::txn::TxnBuilder;
use crate::watch::WatchManager;

/// Installs a `tracing-subscriber` `fmt` layer filtered by `RUST_LOG` (falling back to
/// `level` when unset), matching this codebase's own `main.rs` subscriber setup. Safe
/// to call more than once; subsequent calls are no-ops.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).compact().try_init();
}

/// The library's single entry point. Owns the connection pool, the watch
/// multiplexer, and exposes every coordination subsystem as an accessor.
#[derive(Clone)]
pub struct Client {
    pool: Arc<Pool>,
    watches: Arc<WatchManager>,
}

impl Client {
    /// Builds a pool, authenticator, and watch multiplexer from `config` and returns
    /// the resulting facade. The only fallible step is [`Pool::connect`], which
    /// validates `config` first.
    pub async fn connect(config: Config) -> Result<Client> {
        let pool = Arc::new(Pool::connect(&config)?);
        let watches = Arc::new(WatchManager::new(pool.clone(), config.fault_handling.watch_backoff_cap));
        info!(hosts = config.hosts.len(), "client connected");
        Ok(Client { pool, watches })
    }

    pub fn kv(&self) -> Kv {
        Kv::new(self.pool.clone())
    }

    pub fn txn(&self) -> TxnBuilder {
        TxnBuilder::new(self.pool.clone())
    }

    pub fn watch(&self) -> Arc<WatchManager> {
        self.watches.clone()
    }

    /// Grants a new lease with the given TTL (seconds) and starts its keep-alive loop.
    pub async fn lease(&self, ttl_seconds: i64) -> Result<Lease> {
        Lease::grant(self.pool.clone(), ttl_seconds).await
    }

    /// Runs `body` against a fresh STM transaction under `isolation`, committing as
    /// one conditional atomic transaction and retrying on conflict up to `retries`
    /// additional times.
    pub async fn transact<F, Fut, T>(
        &self,
        isolation: Isolation,
        retries: usize,
        body: F,
    ) -> Result<T>
    where
        F: FnMut(&mut stm::Stm) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        stm::transact(self.pool.clone(), isolation, retries, body).await
    }

    /// A distributed lock on `key` with the default 30s lease TTL; chain
    /// `.with_ttl(seconds)` on the result to override it before calling `acquire()`.
    pub fn lock(&self, key: impl Into<bytes::Bytes>) -> Lock {
        Lock::new(self.pool.clone(), key)
    }

    /// An election scoped to `election/<name>/`, with campaigns using a lease of
    /// `lease_ttl` seconds (the lock/election default is 30s; pass it explicitly if a
    /// different window is required).
    pub fn election(&self, name: impl AsRef<str>, lease_ttl: i64) -> Election {
        Election::new(self.pool.clone(), self.watches.clone(), name, lease_ttl)
    }

    pub fn election_observer(&self, name: impl AsRef<str>) -> Arc<ElectionObserver> {
        ElectionObserver::new(self.pool.clone(), self.watches.clone(), name)
    }

    pub fn auth_role(&self) -> AuthRole {
        AuthRole::new(self.pool.clone())
    }

    pub fn auth_user(&self) -> AuthUser {
        AuthUser::new(self.pool.clone())
    }

    pub fn cluster(&self) -> Cluster {
        Cluster::new(self.pool.clone())
    }

    pub fn maintenance(&self) -> Maintenance {
        Maintenance::new(self.pool.clone())
    }

    /// Closes every host in the pool. Any subsequent call through this client (or any
    /// handle derived from it) that reaches a closed host fails with `ClientClosed`.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    #[tokio::test]
    async fn connect_rejects_invalid_config() {
        let config = Config { hosts: vec![], ..Config::default() };
        let err = Client::connect(config).await.unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[tokio::test]
    async fn connect_builds_a_usable_client() {
        let config = ConfigBuilder::new().hosts(["http://127.0.0.1:23790"]).build().unwrap();
        let client = Client::connect(config).await.unwrap();
        let _ = client.kv();
    }
}
