// src/stm.rs

//! Software-transactional-memory engine: buffers reads and writes under an isolation
//! policy and compiles the whole transaction into a single conditional atomic
//! transaction, retrying on conflict. `transact(pool, isolation, retries, body)` is
//! the sole entry point; `body` receives an [`Stm`] handle it reads/writes through.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::kv::Kv;
use crate::pb;
use crate::pool::Pool;
use crate::range::KeyRange;
use crate::txn::{Cmp, CompareOp, Op, TxnBuilder};

/// Isolation levels, weakest to strongest, per the STM engine's conflict-check table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    ReadCommitted,
    RepeatableReads,
    Serializable,
    SerializableSnapshot,
}

impl Isolation {
    fn pins_revision(self) -> bool {
        matches!(self, Isolation::Serializable | Isolation::SerializableSnapshot)
    }

    fn reuses_cached_reads(self) -> bool {
        !matches!(self, Isolation::ReadCommitted)
    }

    fn checks_reads_on_commit(self) -> bool {
        !matches!(self, Isolation::ReadCommitted)
    }

    fn rejects_delete_range(self) -> bool {
        matches!(self, Isolation::SerializableSnapshot)
    }
}

#[derive(Debug, Clone)]
enum WriteOp {
    Put { value: Bytes },
    DeleteKey,
}

/// Per-transaction-attempt read/write buffer. Handed to the user's closure by
/// [`transact`]; reads issue RPCs through a namespace-agnostic [`Kv`] handle on first
/// access of a key not already cached or written.
pub struct Stm {
    kv: Kv,
    isolation: Isolation,
    pinned_revision: Option<i64>,
    cached_values: HashMap<Bytes, Option<Bytes>>,
    read_mod_revisions: HashMap<Bytes, i64>,
    earliest_read_mod_revision: Option<i64>,
    writes: HashMap<Bytes, WriteOp>,
    write_order: Vec<Bytes>,
    delete_ranges: Vec<KeyRange>,
}

impl Stm {
    fn new(pool: Arc<Pool>, isolation: Isolation) -> Self {
        Stm {
            kv: Kv::new(pool),
            isolation,
            pinned_revision: None,
            cached_values: HashMap::new(),
            read_mod_revisions: HashMap::new(),
            earliest_read_mod_revision: None,
            writes: HashMap::new(),
            write_order: Vec::new(),
            delete_ranges: Vec::new(),
        }
    }

    /// Reads a single key. If the key has a pending write, the read is synthesised
    /// from the write set without contacting the server; a deleted key (single-key or
    /// range) reads as `None`.
    pub async fn get(&mut self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        let key = key.into();
        if let Some(op) = self.writes.get(&key) {
            return Ok(match op {
                WriteOp::Put { value } => Some(value.clone()),
                WriteOp::DeleteKey => None,
            });
        }
        if self.delete_ranges.iter().any(|r| range_contains(r, &key)) {
            return Ok(None);
        }

        if self.isolation.reuses_cached_reads() {
            if let Some(cached) = self.cached_values.get(&key) {
                return Ok(cached.clone());
            }
        }

        let mut builder = self.kv.get(key.clone());
        if self.isolation.pins_revision() {
            if let Some(revision) = self.pinned_revision {
                builder = builder.revision(revision).serializable(true);
            }
        }
        let response = builder.response().await?;
        let found = response.kvs.into_iter().next();

        // Pin the *cluster* revision this read was taken at (not the key's own
        // mod_revision) so later reads of other keys see the same consistent
        // snapshot, per spec §4.7.
        if self.isolation.pins_revision() && self.pinned_revision.is_none() {
            self.pinned_revision = Some(response.header.as_ref().map(|h| h.revision).unwrap_or(0));
        }

        let mod_revision = found.as_ref().map(|kv| kv.mod_revision).unwrap_or(0);
        self.read_mod_revisions.insert(key.clone(), mod_revision);
        self.earliest_read_mod_revision = Some(match self.earliest_read_mod_revision {
            Some(existing) => existing.min(mod_revision),
            None => mod_revision,
        });

        let value = found.map(|kv| kv.value);
        self.cached_values.insert(key, value.clone());
        Ok(value)
    }

    pub async fn get_string(&mut self, key: impl Into<Bytes>) -> Result<Option<String>> {
        Ok(self.get(key).await?.map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    /// Buffers a put. Last write wins: any earlier Put/DeleteKey against the same key
    /// is purged (DeleteRange entries are never purged by this).
    pub fn put(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        let key = key.into();
        if !self.write_order.iter().any(|k| k == &key) {
            self.write_order.push(key.clone());
        }
        self.writes.insert(key, WriteOp::Put { value: value.into() });
    }

    /// Buffers a single-key delete. Last write wins against earlier Put/DeleteKey.
    pub fn delete(&mut self, key: impl Into<Bytes>) {
        let key = key.into();
        if !self.write_order.iter().any(|k| k == &key) {
            self.write_order.push(key.clone());
        }
        self.writes.insert(key, WriteOp::DeleteKey);
    }

    /// Buffers a range delete. Disallowed under `SerializableSnapshot`: there is no
    /// bounded way to check every key in the range against the read-set revision.
    pub fn delete_range(&mut self, range: KeyRange) -> Result<()> {
        reject_delete_range_if_snapshot(self.isolation)?;
        self.delete_ranges.push(range);
        Ok(())
    }

    fn compile(&self) -> pb::TxnRequest {
        let mut compares = Vec::new();

        if self.isolation.checks_reads_on_commit() {
            for (key, &mod_revision) in &self.read_mod_revisions {
                compares.push(Cmp::mod_revision(key.clone(), CompareOp::Equal, mod_revision));
            }
        }

        if self.isolation == Isolation::SerializableSnapshot {
            let floor = self.earliest_read_mod_revision.unwrap_or(0) + 1;
            for key in &self.write_order {
                compares.push(Cmp::mod_revision(key.clone(), CompareOp::Less, floor));
            }
        }

        let mut success: Vec<pb::RequestOp> = Vec::new();
        for key in &self.write_order {
            match self.writes.get(key) {
                Some(WriteOp::Put { value }) => success.push(Op::put(key.clone(), value.clone())),
                Some(WriteOp::DeleteKey) => success.push(Op::delete(key.clone())),
                None => {}
            }
        }
        for range in &self.delete_ranges {
            success.push(Op::delete_range(range.clone()));
        }

        pb::TxnRequest { compare: compares, success, failure: Vec::new() }
    }
}

fn reject_delete_range_if_snapshot(isolation: Isolation) -> Result<()> {
    if isolation.rejects_delete_range() {
        return Err(ClientError::InvalidArgument(
            "DeleteRange is not permitted inside a SerializableSnapshot transaction".into(),
        ));
    }
    Ok(())
}

fn range_contains(range: &KeyRange, key: &[u8]) -> bool {
    if key < range.start.as_ref() {
        return false;
    }
    if range.end.is_empty() {
        return key == range.start.as_ref();
    }
    if range.end.as_ref() == [0u8] {
        return true;
    }
    key < range.end.as_ref()
}

/// Runs `body` against a fresh [`Stm`] and commits it as one conditional atomic
/// transaction, retrying on conflict up to `retries` additional times. Any other
/// error aborts immediately without retrying.
pub async fn transact<F, Fut, T>(
    pool: Arc<Pool>,
    isolation: Isolation,
    retries: usize,
    mut body: F,
) -> Result<T>
where
    F: FnMut(&mut Stm) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    for attempt in 0..=retries {
        let mut stm = Stm::new(pool.clone(), isolation);
        let outcome = body(&mut stm).await?;
        let request = stm.compile();

        let mut txn = TxnBuilder::new(pool.clone());
        for compare in request.compare {
            txn = txn.if_(compare);
        }
        txn = txn.then(request.success);
        let response = txn.commit().await?;

        if response.succeeded {
            return Ok(outcome);
        }
        debug!(attempt, "STM commit lost the race, retrying");
    }
    Err(ClientError::STMConflict)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_isolation_rejects_delete_range() {
        let result = reject_delete_range_if_snapshot(Isolation::SerializableSnapshot);
        assert!(matches!(result, Err(ClientError::InvalidArgument(_))));
    }

    #[test]
    fn other_isolations_allow_delete_range() {
        assert!(reject_delete_range_if_snapshot(Isolation::ReadCommitted).is_ok());
        assert!(reject_delete_range_if_snapshot(Isolation::RepeatableReads).is_ok());
        assert!(reject_delete_range_if_snapshot(Isolation::Serializable).is_ok());
    }

    #[test]
    fn range_contains_checks_half_open_bound() {
        let range = KeyRange::prefix(Bytes::from_static(b"fo"));
        assert!(range_contains(&range, b"foo1"));
        assert!(!range_contains(&range, b"bar"));
    }

    #[test]
    fn full_keyspace_range_contains_everything() {
        assert!(range_contains(&KeyRange::all(), b"anything"));
    }
}
