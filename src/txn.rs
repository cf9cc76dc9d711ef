// src/txn.rs

//! The conditional-transaction builder: `client.txn().if_(cmp).then(ops).or_else(ops).commit()`.
//! Used directly by application code and internally by the STM engine, the election
//! state machine, and the distributed lock.

use std::sync::Arc;

use bytes::Bytes;
use tonic::metadata::MetadataMap;

use crate::error::{ClientError, Result};
use crate::pb::{self, compare, request_op};
use crate::pool::{Pool, ServiceKind};
use crate::range::KeyRange;

/// `Compare.result`: the relational operator applied between the comparison target
/// and the value supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    Greater,
    Less,
    NotEqual,
}

impl CompareOp {
    fn into_proto(self) -> i32 {
        match self {
            CompareOp::Equal => 0,
            CompareOp::Greater => 1,
            CompareOp::Less => 2,
            CompareOp::NotEqual => 3,
        }
    }
}

/// Builds `Compare` clauses for a transaction's condition list.
pub struct Cmp;

impl Cmp {
    pub fn value(key: impl Into<Bytes>, op: CompareOp, value: impl Into<Bytes>) -> pb::Compare {
        pb::Compare {
            result: op.into_proto(),
            target: compare::CompareTarget::Value as i32,
            key: key.into(),
            range_end: Bytes::new(),
            target_union: Some(compare::TargetUnion::Value(value.into())),
        }
    }

    pub fn version(key: impl Into<Bytes>, op: CompareOp, version: i64) -> pb::Compare {
        pb::Compare {
            result: op.into_proto(),
            target: compare::CompareTarget::Version as i32,
            key: key.into(),
            range_end: Bytes::new(),
            target_union: Some(compare::TargetUnion::Version(version)),
        }
    }

    pub fn create_revision(key: impl Into<Bytes>, op: CompareOp, revision: i64) -> pb::Compare {
        pb::Compare {
            result: op.into_proto(),
            target: compare::CompareTarget::Create as i32,
            key: key.into(),
            range_end: Bytes::new(),
            target_union: Some(compare::TargetUnion::CreateRevision(revision)),
        }
    }

    pub fn mod_revision(key: impl Into<Bytes>, op: CompareOp, revision: i64) -> pb::Compare {
        pb::Compare {
            result: op.into_proto(),
            target: compare::CompareTarget::Mod as i32,
            key: key.into(),
            range_end: Bytes::new(),
            target_union: Some(compare::TargetUnion::ModRevision(revision)),
        }
    }

    pub fn lease(key: impl Into<Bytes>, op: CompareOp, lease_id: i64) -> pb::Compare {
        pb::Compare {
            result: op.into_proto(),
            target: compare::CompareTarget::Lease as i32,
            key: key.into(),
            range_end: Bytes::new(),
            target_union: Some(compare::TargetUnion::Lease(lease_id)),
        }
    }
}

/// Builds `RequestOp` entries for a transaction's `success`/`failure` branches.
pub struct Op;

impl Op {
    pub fn put(key: impl Into<Bytes>, value: impl Into<Bytes>) -> pb::RequestOp {
        Op::put_with_lease(key, value, 0)
    }

    pub fn put_with_lease(key: impl Into<Bytes>, value: impl Into<Bytes>, lease_id: i64) -> pb::RequestOp {
        pb::RequestOp {
            request: Some(request_op::Request::RequestPut(pb::PutRequest {
                key: key.into(),
                value: value.into(),
                lease: lease_id,
                prev_kv: false,
                ignore_value: false,
                ignore_lease: false,
            })),
        }
    }

    pub fn get(key: impl Into<Bytes>) -> pb::RequestOp {
        Op::get_range(KeyRange::key(key))
    }

    pub fn get_range(range: KeyRange) -> pb::RequestOp {
        pb::RequestOp {
            request: Some(request_op::Request::RequestRange(pb::RangeRequest {
                key: range.start,
                range_end: range.end,
                ..Default::default()
            })),
        }
    }

    pub fn delete(key: impl Into<Bytes>) -> pb::RequestOp {
        Op::delete_range(KeyRange::key(key))
    }

    pub fn delete_range(range: KeyRange) -> pb::RequestOp {
        pb::RequestOp {
            request: Some(request_op::Request::RequestDeleteRange(pb::DeleteRangeRequest {
                key: range.start,
                range_end: range.end,
                prev_kv: false,
            })),
        }
    }
}

/// Accumulates a `TxnRequest`; `commit()` is the sole terminal method.
#[derive(Clone)]
pub struct TxnBuilder {
    pool: Arc<Pool>,
    compares: Vec<pb::Compare>,
    success: Vec<pb::RequestOp>,
    failure: Vec<pb::RequestOp>,
}

impl TxnBuilder {
    pub fn new(pool: Arc<Pool>) -> Self {
        TxnBuilder { pool, compares: Vec::new(), success: Vec::new(), failure: Vec::new() }
    }

    pub fn if_(mut self, compare: pb::Compare) -> Self {
        self.compares.push(compare);
        self
    }

    pub fn then(mut self, ops: impl IntoIterator<Item = pb::RequestOp>) -> Self {
        self.success.extend(ops);
        self
    }

    pub fn or_else(mut self, ops: impl IntoIterator<Item = pb::RequestOp>) -> Self {
        self.failure.extend(ops);
        self
    }

    pub fn to_request(&self) -> pb::TxnRequest {
        pb::TxnRequest {
            compare: self.compares.clone(),
            success: self.success.clone(),
            failure: self.failure.clone(),
        }
    }

    pub async fn commit(self) -> Result<pb::TxnResponse> {
        let request = self.to_request();
        let pool = self.pool.clone();
        pool.exec(ServiceKind::Kv, move |client, md: MetadataMap| {
            let request = request.clone();
            let mut client = client.into_kv();
            async move {
                let mut rpc = tonic::Request::new(request);
                *rpc.metadata_mut() = md;
                client.txn(rpc).await.map(|r| r.into_inner()).map_err(ClientError::classify)
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmp_value_sets_target_union() {
        let cmp = Cmp::value("foo1", CompareOp::Equal, "bar1");
        assert_eq!(cmp.target, compare::CompareTarget::Value as i32);
        assert!(matches!(cmp.target_union, Some(compare::TargetUnion::Value(ref v)) if v.as_ref() == b"bar1"));
    }

    #[test]
    fn op_put_builds_request_put() {
        let op = Op::put("foo1", "bar2");
        assert!(matches!(op.request, Some(request_op::Request::RequestPut(_))));
    }
}
