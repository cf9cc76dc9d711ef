// src/lock.rs

//! Distributed lock: lease-backed mutual exclusion. `acquire()` races a single
//! atomic transaction against every other holder attempting the same key; only one
//! of them sees `Create(key) == 0`.

use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use crate::error::{ClientError, Result};
use crate::lease::Lease;
use crate::pool::Pool;
use crate::txn::{Cmp, CompareOp, Op, TxnBuilder};

const DEFAULT_TTL_SECONDS: i64 = 30;

/// A held (or about-to-be-held) distributed lock on a single key.
pub struct Lock {
    pool: Arc<Pool>,
    key: Bytes,
    ttl_seconds: i64,
}

impl Lock {
    pub fn new(pool: Arc<Pool>, key: impl Into<Bytes>) -> Self {
        Lock { pool, key: key.into(), ttl_seconds: DEFAULT_TTL_SECONDS }
    }

    pub fn with_ttl(mut self, ttl_seconds: i64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// Allocates a lease and attempts to create `key` under it. If another holder
    /// wins the race, the lease is revoked and `LockFailed` is raised.
    pub async fn acquire(&self) -> Result<HeldLock> {
        let lease = Lease::grant(self.pool.clone(), self.ttl_seconds).await?;

        let txn = TxnBuilder::new(self.pool.clone())
            .if_(Cmp::create_revision(self.key.clone(), CompareOp::Equal, 0))
            .then([Op::put_with_lease(self.key.clone(), Bytes::new(), lease.id())]);
        let response = txn.commit().await?;

        if !response.succeeded {
            let _ = lease.revoke().await;
            return Err(ClientError::LockFailed);
        }

        info!(key = %String::from_utf8_lossy(&self.key), lease_id = lease.id(), "lock acquired");
        Ok(HeldLock { lease: Arc::new(lease), key: self.key.clone() })
    }

    /// Acquires the lock, runs `body`, then releases — on either the success or the
    /// error path. A release error never masks a body error; a body error is
    /// re-raised after the (best-effort) release completes.
    pub async fn with_lock<F, Fut, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let held = self.acquire().await?;
        let outcome = body().await;
        let release_result = held.release().await;
        match outcome {
            Ok(value) => {
                release_result?;
                Ok(value)
            }
            Err(body_err) => Err(body_err),
        }
    }
}

/// A successfully acquired lock. Dropping this without calling [`HeldLock::release`]
/// leaves the lease's keep-alive loop running (and the lock held) until the lease
/// object itself is dropped, matching [`Lease`]'s own drop semantics.
pub struct HeldLock {
    lease: Arc<Lease>,
    key: Bytes,
}

impl HeldLock {
    /// Revokes the backing lease, which deletes `key` server-side.
    pub async fn release(&self) -> Result<()> {
        self.lease.revoke().await
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn lease_id(&self) -> i64 {
        self.lease.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttl_matches_spec() {
        assert_eq!(DEFAULT_TTL_SECONDS, 30);
    }
}
