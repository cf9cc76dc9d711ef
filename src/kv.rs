// src/kv.rs

//! Thin fluent CRUD builders over the `Range`/`Put`/`DeleteRange` request shapes: a
//! builder accumulates a request shape until a terminal method executes the call and
//! shapes the result.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tonic::metadata::MetadataMap;

use crate::error::{ClientError, Result};
use crate::pb::{self, KeyValue, PutResponse, RangeResponse};
use crate::pool::{Pool, ServiceKind};
use crate::range::KeyRange;

/// Entry point for key-value operations: `client.kv().get(...)`, `.put(...)`,
/// `.delete(...)`.
#[derive(Clone)]
pub struct Kv {
    pool: Arc<Pool>,
}

impl Kv {
    pub fn new(pool: Arc<Pool>) -> Self {
        Kv { pool }
    }

    pub fn get(&self, key: impl Into<Bytes>) -> GetBuilder {
        GetBuilder::new(self.pool.clone(), KeyRange::key(key))
    }

    /// Starts a range query over the full keyspace; narrow it with `.prefix(...)` or
    /// `.range(...)`.
    pub fn get_all(&self) -> GetBuilder {
        GetBuilder::new(self.pool.clone(), KeyRange::all())
    }

    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> PutBuilder {
        PutBuilder::new(self.pool.clone(), key.into(), value.into())
    }

    pub fn delete(&self, key: impl Into<Bytes>) -> DeleteBuilder {
        DeleteBuilder::new(self.pool.clone(), KeyRange::key(key))
    }

    pub fn delete_range(&self, range: KeyRange) -> DeleteBuilder {
        DeleteBuilder::new(self.pool.clone(), range)
    }
}

/// Accumulates a `RangeRequest`; terminal methods pick the result shape.
pub struct GetBuilder {
    pool: Arc<Pool>,
    range: KeyRange,
    revision: Option<i64>,
    limit: i64,
    serializable: bool,
    keys_only: bool,
    min_mod_revision: i64,
    max_mod_revision: i64,
    min_create_revision: i64,
    max_create_revision: i64,
    sort_order: i32,
    sort_target: i32,
}

/// `RangeRequest.SortTarget::CREATE`, used by the election and lock subsystems to
/// find the oldest/newest key in a prefix.
pub const SORT_TARGET_CREATE: i32 = 2;
pub const SORT_ORDER_ASCEND: i32 = 1;
pub const SORT_ORDER_DESCEND: i32 = 2;

impl GetBuilder {
    fn new(pool: Arc<Pool>, range: KeyRange) -> Self {
        GetBuilder {
            pool,
            range,
            revision: None,
            limit: 0,
            serializable: false,
            keys_only: false,
            min_mod_revision: 0,
            max_mod_revision: 0,
            min_create_revision: 0,
            max_create_revision: 0,
            sort_order: 0,
            sort_target: 0,
        }
    }

    /// Sorts results by `target` (a `RangeRequest::SortTarget`) in `order` (a
    /// `RangeRequest::SortOrder`); see [`SORT_TARGET_CREATE`] and friends.
    pub fn sort(mut self, target: i32, order: i32) -> Self {
        self.sort_target = target;
        self.sort_order = order;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<Bytes>) -> Self {
        self.range = KeyRange::prefix(prefix);
        self
    }

    pub fn range(mut self, range: KeyRange) -> Self {
        self.range = range;
        self
    }

    pub fn revision(mut self, revision: i64) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn serializable(mut self, serializable: bool) -> Self {
        self.serializable = serializable;
        self
    }

    pub fn keys_only(mut self, keys_only: bool) -> Self {
        self.keys_only = keys_only;
        self
    }

    pub fn min_mod_revision(mut self, rev: i64) -> Self {
        self.min_mod_revision = rev;
        self
    }

    pub fn max_mod_revision(mut self, rev: i64) -> Self {
        self.max_mod_revision = rev;
        self
    }

    pub fn min_create_revision(mut self, rev: i64) -> Self {
        self.min_create_revision = rev;
        self
    }

    pub fn max_create_revision(mut self, rev: i64) -> Self {
        self.max_create_revision = rev;
        self
    }

    pub fn to_request(&self) -> pb::RangeRequest {
        pb::RangeRequest {
            key: self.range.start.clone(),
            range_end: self.range.end.clone(),
            limit: self.limit,
            revision: self.revision.unwrap_or(0),
            sort_order: self.sort_order,
            sort_target: self.sort_target,
            serializable: self.serializable,
            keys_only: self.keys_only,
            count_only: false,
            min_mod_revision: self.min_mod_revision,
            max_mod_revision: self.max_mod_revision,
            min_create_revision: self.min_create_revision,
            max_create_revision: self.max_create_revision,
        }
    }

    pub(crate) async fn exec(&self) -> Result<RangeResponse> {
        let request = self.to_request();
        self.pool
            .exec(ServiceKind::Kv, move |client, md: MetadataMap| {
                let request = request.clone();
                let mut client = client.into_kv();
                async move {
                    let mut rpc = tonic::Request::new(request);
                    *rpc.metadata_mut() = md;
                    client.range(rpc).await.map(|r| r.into_inner()).map_err(ClientError::classify)
                }
            })
            .await
    }

    /// The first matching key-value pair, or `None`.
    pub async fn key_value(self) -> Result<Option<KeyValue>> {
        let response = self.exec().await?;
        Ok(response.kvs.into_iter().next())
    }

    /// The first matching value decoded as UTF-8, or `None`.
    pub async fn string(self) -> Result<Option<String>> {
        let kv = self.key_value().await?;
        Ok(match kv {
            Some(kv) => Some(String::from_utf8_lossy(&kv.value).into_owned()),
            None => None,
        })
    }

    /// The first matching value decoded as JSON, or `None`.
    pub async fn json<T: DeserializeOwned>(self) -> Result<Option<T>> {
        let kv = self.key_value().await?;
        match kv {
            Some(kv) => {
                let value = serde_json::from_slice(&kv.value)
                    .map_err(|e| ClientError::InvalidArgument(format!("invalid JSON: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// The raw bytes of the first matching value, or `None`.
    pub async fn buffer(self) -> Result<Option<Bytes>> {
        let kv = self.key_value().await?;
        Ok(kv.map(|kv| kv.value))
    }

    /// All matching key-value pairs.
    pub async fn all(self) -> Result<Vec<KeyValue>> {
        Ok(self.exec().await?.kvs)
    }

    /// All matching keys, decoded as UTF-8.
    pub async fn keys(self) -> Result<Vec<String>> {
        Ok(self
            .exec()
            .await?
            .kvs
            .into_iter()
            .map(|kv| String::from_utf8_lossy(&kv.key).into_owned())
            .collect())
    }

    /// All matching key-value pairs as a `key -> value` string map.
    pub async fn strings(self) -> Result<HashMap<String, String>> {
        Ok(self
            .exec()
            .await?
            .kvs
            .into_iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(&kv.key).into_owned(),
                    String::from_utf8_lossy(&kv.value).into_owned(),
                )
            })
            .collect())
    }

    /// The number of matching keys (requires no additional round trip: the server
    /// reports `count` on every `RangeResponse`).
    pub async fn count(self) -> Result<i64> {
        Ok(self.exec().await?.count)
    }

    /// The full server response, including its `header` (cluster revision at the time
    /// of the read) — used by the election and lock subsystems, which need the
    /// revision a leader scan was taken at to start a watch without a race.
    pub async fn response(self) -> Result<RangeResponse> {
        self.exec().await
    }
}

/// Accumulates a `PutRequest`.
pub struct PutBuilder {
    pool: Arc<Pool>,
    key: Bytes,
    value: Bytes,
    lease: i64,
    prev_kv: bool,
    ignore_value: bool,
    ignore_lease: bool,
}

impl PutBuilder {
    pub(crate) fn new(pool: Arc<Pool>, key: Bytes, value: Bytes) -> Self {
        PutBuilder { pool, key, value, lease: 0, prev_kv: false, ignore_value: false, ignore_lease: false }
    }

    pub fn lease(mut self, lease_id: i64) -> Self {
        self.lease = lease_id;
        self
    }

    pub fn prev_kv(mut self, prev_kv: bool) -> Self {
        self.prev_kv = prev_kv;
        self
    }

    pub fn ignore_value(mut self, ignore: bool) -> Self {
        self.ignore_value = ignore;
        self
    }

    pub fn ignore_lease(mut self, ignore: bool) -> Self {
        self.ignore_lease = ignore;
        self
    }

    pub fn to_request(&self) -> pb::PutRequest {
        pb::PutRequest {
            key: self.key.clone(),
            value: self.value.clone(),
            lease: self.lease,
            prev_kv: self.prev_kv,
            ignore_value: self.ignore_value,
            ignore_lease: self.ignore_lease,
        }
    }

    pub async fn exec(self) -> Result<PutResponse> {
        let request = self.to_request();
        self.pool
            .exec(ServiceKind::Kv, move |client, md: MetadataMap| {
                let request = request.clone();
                let mut client = client.into_kv();
                async move {
                    let mut rpc = tonic::Request::new(request);
                    *rpc.metadata_mut() = md;
                    client.put(rpc).await.map(|r| r.into_inner()).map_err(ClientError::classify)
                }
            })
            .await
    }
}

/// Accumulates a `DeleteRangeRequest`.
pub struct DeleteBuilder {
    pool: Arc<Pool>,
    range: KeyRange,
    prev_kv: bool,
}

impl DeleteBuilder {
    pub(crate) fn new(pool: Arc<Pool>, range: KeyRange) -> Self {
        DeleteBuilder { pool, range, prev_kv: false }
    }

    pub fn prefix(mut self, prefix: impl Into<Bytes>) -> Self {
        self.range = KeyRange::prefix(prefix);
        self
    }

    pub fn prev_kv(mut self, prev_kv: bool) -> Self {
        self.prev_kv = prev_kv;
        self
    }

    pub fn to_request(&self) -> pb::DeleteRangeRequest {
        pb::DeleteRangeRequest {
            key: self.range.start.clone(),
            range_end: self.range.end.clone(),
            prev_kv: self.prev_kv,
        }
    }

    /// Executes the delete, returning the number of keys deleted.
    pub async fn exec(self) -> Result<i64> {
        let request = self.to_request();
        let response = self
            .pool
            .exec(ServiceKind::Kv, move |client, md: MetadataMap| {
                let request = request.clone();
                let mut client = client.into_kv();
                async move {
                    let mut rpc = tonic::Request::new(request);
                    *rpc.metadata_mut() = md;
                    client
                        .delete_range(rpc)
                        .await
                        .map(|r| r.into_inner())
                        .map_err(ClientError::classify)
                }
            })
            .await?;
        Ok(response.deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_all_defaults_to_full_keyspace() {
        // Exercise the builder shape without a live pool: just the request it forms.
        let range = KeyRange::all();
        assert_eq!(range.start.as_ref(), &[0]);
        assert_eq!(range.end.as_ref(), &[0]);
    }

    #[test]
    fn put_request_defaults_have_no_lease() {
        // Constructed directly since PutBuilder requires a Pool; verify the shape
        // independent of the constructor wiring.
        let req = pb::PutRequest {
            key: Bytes::from_static(b"foo1"),
            value: Bytes::from_static(b"bar1"),
            lease: 0,
            prev_kv: false,
            ignore_value: false,
            ignore_lease: false,
        };
        assert_eq!(req.lease, 0);
    }
}
