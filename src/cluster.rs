// src/cluster.rs

//! Cluster administration: a straight 1:1 mapping onto the `Cluster` service's
//! member-list RPC. No retry/branching logic beyond what the pool's `exec` already
//! provides.

use std::sync::Arc;

use tonic::metadata::MetadataMap;

use crate::error::{ClientError, Result};
use crate::pb::{MemberListRequest, MemberListResponse};
use crate::pool::{Pool, ServiceKind};

/// Entry point for cluster administration: `client.cluster()`.
#[derive(Clone)]
pub struct Cluster {
    pool: Arc<Pool>,
}

impl Cluster {
    pub fn new(pool: Arc<Pool>) -> Self {
        Cluster { pool }
    }

    /// Lists the cluster's members. `linearizable` forces the read through the
    /// current leader rather than whichever peer answers.
    pub async fn member_list(&self, linearizable: bool) -> Result<MemberListResponse> {
        let request = MemberListRequest { linearizable };
        self.pool
            .exec(ServiceKind::Cluster, move |client, md: MetadataMap| {
                let request = request.clone();
                let mut client = client.into_cluster();
                async move {
                    let mut rpc = tonic::Request::new(request);
                    *rpc.metadata_mut() = md;
                    client.member_list(rpc).await.map(|r| r.into_inner()).map_err(ClientError::classify)
                }
            })
            .await
    }
}
